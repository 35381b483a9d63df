//! Incremental frame parser.
//!
//! [`FrameBuffer`] wraps a growable byte buffer and yields whole [`Frame`]s as
//! they become available, so it can be fed arbitrary, arbitrarily-chopped
//! chunks read off a socket. On a successful parse the consumed bytes are
//! shifted out of the front of the buffer; on [`ParseOutcome::Incomplete`]
//! the buffer is left untouched so the caller can read more and retry.
//!
//! This plays the same role the teacher's `CountBuffer`
//! (`parser/read_buffer.rs`) plays for the XDR parser — a buffer that can be
//! retried once more bytes arrive — but framed around an explicit
//! `Incomplete` outcome instead of reinterpreting an `UnexpectedEof` I/O
//! error, since the wire format here is self-describing enough to tell the
//! difference up front.

use std::fmt;

use super::frame::Frame;

/// Frames from a client always start with `*` or `$`. Frames read off a
/// replication peer's reply channel (the handshake) may be any of the five
/// prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    ClientRequest,
    PeerReply,
}

/// Failure to decode a frame. The caller's recovery policy is always to
/// close the connection (§4.A).
#[derive(Debug)]
pub enum ParseError {
    UnexpectedPrefix(u8),
    MalformedLength,
    LengthOverflow,
    MalformedTrailer,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnexpectedPrefix(b) => write!(f, "unexpected frame prefix {b:#04x}"),
            ParseError::MalformedLength => write!(f, "malformed length field"),
            ParseError::LengthOverflow => write!(f, "length field overflows"),
            ParseError::MalformedTrailer => write!(f, "frame missing trailing CRLF"),
        }
    }
}

impl std::error::Error for ParseError {}

const INITIAL_CAPACITY: usize = 4096;

/// A growable byte buffer that incrementally parses [`Frame`]s out of itself.
pub struct FrameBuffer {
    data: Vec<u8>,
    filled: usize,
    mode: ParseMode,
}

impl FrameBuffer {
    pub fn new(mode: ParseMode) -> Self {
        Self { data: vec![0u8; INITIAL_CAPACITY], filled: 0, mode }
    }

    /// Appends `bytes` to the buffer, doubling capacity as many times as
    /// needed to fit them.
    pub fn extend(&mut self, bytes: &[u8]) {
        while self.data.len() - self.filled < bytes.len() {
            let new_len = self.data.len() * 2;
            self.data.resize(new_len, 0);
        }
        self.data[self.filled..self.filled + bytes.len()].copy_from_slice(bytes);
        self.filled += bytes.len();
    }

    /// The write slice new socket bytes should be read into.
    pub fn spare_capacity(&mut self, min_len: usize) -> &mut [u8] {
        while self.data.len() - self.filled < min_len {
            let new_len = self.data.len() * 2;
            self.data.resize(new_len, 0);
        }
        &mut self.data[self.filled..]
    }

    /// Marks `n` freshly written bytes (via [`Self::spare_capacity`]) as filled.
    pub fn commit_written(&mut self, n: usize) {
        self.filled += n;
    }

    /// Attempts to parse one frame from the front of the buffer.
    ///
    /// Returns `Ok(Some(frame))` and consumes those bytes (shifting the
    /// remainder to offset 0), `Ok(None)` if the buffer holds an incomplete
    /// frame (buffer unchanged), or `Err` on malformed input.
    pub fn try_parse(&mut self) -> Result<Option<Frame>, ParseError> {
        Ok(self.try_parse_sized()?.map(|(frame, _)| frame))
    }

    /// Same as [`Self::try_parse`], but also returns the exact wire length
    /// consumed. Replication ingestion needs this to keep its applied-offset
    /// counter byte-accurate.
    pub fn try_parse_sized(&mut self) -> Result<Option<(Frame, usize)>, ParseError> {
        match parse_frame(&self.data[..self.filled], true, self.mode)? {
            Some((frame, consumed)) => {
                self.data.copy_within(consumed..self.filled, 0);
                self.filled -= consumed;
                Ok(Some((frame, consumed)))
            }
            None => Ok(None),
        }
    }
}

fn find_crlf(buf: &[u8], start: usize) -> Option<usize> {
    let mut i = start;
    while i + 1 < buf.len() {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn parse_decimal(line: &[u8]) -> Result<i64, ParseError> {
    let text = std::str::from_utf8(line).map_err(|_| ParseError::MalformedLength)?;
    text.parse::<i64>().map_err(|_| ParseError::MalformedLength)
}

/// Parses one frame starting at `buf[0]`. Returns `Ok(None)` if `buf` does
/// not yet contain a whole frame. `top` gates the client-request top-level
/// prefix restriction; nested frames are never restricted this way.
fn parse_frame(
    buf: &[u8],
    top: bool,
    mode: ParseMode,
) -> Result<Option<(Frame, usize)>, ParseError> {
    if buf.is_empty() {
        return Ok(None);
    }
    let prefix = buf[0];
    if top && mode == ParseMode::ClientRequest && prefix != b'*' && prefix != b'$' {
        return Err(ParseError::UnexpectedPrefix(prefix));
    }
    match prefix {
        b'+' | b'-' => {
            let Some(crlf) = find_crlf(buf, 1) else { return Ok(None) };
            let body = buf[1..crlf].to_vec();
            let consumed = crlf + 2;
            let frame = if prefix == b'+' { Frame::SimpleString(body) } else { Frame::Error(body) };
            Ok(Some((frame, consumed)))
        }
        b':' => {
            let Some(crlf) = find_crlf(buf, 1) else { return Ok(None) };
            let n = parse_decimal(&buf[1..crlf])?;
            Ok(Some((Frame::Integer(n), crlf + 2)))
        }
        b'$' => {
            let Some(crlf) = find_crlf(buf, 1) else { return Ok(None) };
            let len = parse_decimal(&buf[1..crlf])?;
            if len == -1 {
                return Ok(Some((Frame::BulkString(None), crlf + 2)));
            }
            if len < -1 {
                return Err(ParseError::MalformedLength);
            }
            let len = usize::try_from(len).map_err(|_| ParseError::LengthOverflow)?;
            let body_start = crlf + 2;
            let body_end = body_start.checked_add(len).ok_or(ParseError::LengthOverflow)?;
            let total = body_end.checked_add(2).ok_or(ParseError::LengthOverflow)?;
            if buf.len() < total {
                return Ok(None);
            }
            if &buf[body_end..total] != b"\r\n" {
                return Err(ParseError::MalformedTrailer);
            }
            let body = buf[body_start..body_end].to_vec();
            Ok(Some((Frame::BulkString(Some(body)), total)))
        }
        b'*' => {
            let Some(crlf) = find_crlf(buf, 1) else { return Ok(None) };
            let len = parse_decimal(&buf[1..crlf])?;
            if len == -1 {
                return Ok(Some((Frame::Array(None), crlf + 2)));
            }
            if len < -1 {
                return Err(ParseError::MalformedLength);
            }
            let len = usize::try_from(len).map_err(|_| ParseError::LengthOverflow)?;
            let mut items = Vec::with_capacity(len);
            let mut offset = crlf + 2;
            for _ in 0..len {
                match parse_frame(&buf[offset..], false, mode)? {
                    Some((item, consumed)) => {
                        items.push(item);
                        offset += consumed;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((Frame::Array(Some(items)), offset)))
        }
        other => Err(ParseError::UnexpectedPrefix(other)),
    }
}
