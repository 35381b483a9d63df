//! The wire value type and its RESP-style encoding.
//!
//! Every frame begins with one prefix byte and ends in `\r\n`. Bytes carried
//! inside a frame are opaque — not necessarily UTF-8 — so [`Frame`] stores
//! raw [`Vec<u8>`] rather than [`String`].

use std::fmt;

/// One decoded (or to-be-encoded) protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `+...\r\n`
    SimpleString(Vec<u8>),
    /// `-...\r\n`
    Error(Vec<u8>),
    /// `:...\r\n`
    Integer(i64),
    /// `$<n>\r\n<n bytes>\r\n`, or `$-1\r\n` for the null bulk.
    BulkString(Option<Vec<u8>>),
    /// `*<n>\r\n<n frames>`, or `*-1\r\n` for the null array.
    Array(Option<Vec<Frame>>),
}

impl Frame {
    /// Shorthand for a `+OK\r\n`-style reply.
    pub fn simple(s: impl Into<Vec<u8>>) -> Frame {
        Frame::SimpleString(s.into())
    }

    /// Shorthand for a `-ERR ...\r\n`-style reply.
    pub fn error(msg: impl Into<Vec<u8>>) -> Frame {
        Frame::Error(msg.into())
    }

    /// Shorthand for a bulk string carrying `bytes`.
    pub fn bulk(bytes: impl Into<Vec<u8>>) -> Frame {
        Frame::BulkString(Some(bytes.into()))
    }

    /// The null bulk string (`$-1\r\n`).
    pub fn null_bulk() -> Frame {
        Frame::BulkString(None)
    }

    /// The null array (`*-1\r\n`).
    pub fn null_array() -> Frame {
        Frame::Array(None)
    }

    /// A bulk string formatted via [`Display`](fmt::Display), e.g. `Frame::bulk_display(42)`.
    pub fn bulk_display(value: impl fmt::Display) -> Frame {
        Frame::bulk(value.to_string().into_bytes())
    }

    /// An array of bulk strings, the shape every client request takes.
    pub fn array_of_bulks<I, S>(items: I) -> Frame
    where
        I: IntoIterator<Item = S>,
        S: Into<Vec<u8>>,
    {
        Frame::Array(Some(items.into_iter().map(Frame::bulk).collect()))
    }

    /// Encodes this frame to a freshly allocated byte buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    /// Appends this frame's encoding to `out`, recursing with no intermediate
    /// copies for nested arrays beyond the one allocation per inner frame's
    /// own `encode_into` call.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Frame::SimpleString(s) => {
                out.push(b'+');
                out.extend_from_slice(s);
                out.extend_from_slice(b"\r\n");
            }
            Frame::Error(s) => {
                out.push(b'-');
                out.extend_from_slice(s);
                out.extend_from_slice(b"\r\n");
            }
            Frame::Integer(n) => {
                out.push(b':');
                out.extend_from_slice(n.to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Frame::BulkString(None) => out.extend_from_slice(b"$-1\r\n"),
            Frame::BulkString(Some(bytes)) => {
                out.push(b'$');
                out.extend_from_slice(bytes.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(bytes);
                out.extend_from_slice(b"\r\n");
            }
            Frame::Array(None) => out.extend_from_slice(b"*-1\r\n"),
            Frame::Array(Some(items)) => {
                out.push(b'*');
                out.extend_from_slice(items.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                for item in items {
                    item.encode_into(out);
                }
            }
        }
    }

    /// Returns this frame's bytes if it is a non-null bulk string.
    pub fn as_bulk(&self) -> Option<&[u8]> {
        match self {
            Frame::BulkString(Some(bytes)) => Some(bytes),
            _ => None,
        }
    }

    /// Returns this frame's items if it is a non-null array.
    pub fn as_array(&self) -> Option<&[Frame]> {
        match self {
            Frame::Array(Some(items)) => Some(items),
            _ => None,
        }
    }
}
