//! Follower-side replication: the startup handshake and the ingest loop that
//! consumes and applies the leader's replicated command stream.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::dispatch::{self, ConnectionState};
use crate::protocol::{Frame, FrameBuffer, ParseMode};
use crate::state::AppState;

#[derive(Debug)]
pub enum HandshakeError {
    Io(std::io::Error),
    Parse(crate::protocol::ParseError),
    UnexpectedReply { expected: &'static str, step: &'static str },
    ConnectionClosed { step: &'static str },
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::Io(e) => write!(f, "handshake I/O error: {e}"),
            HandshakeError::Parse(e) => write!(f, "handshake parse error: {e}"),
            HandshakeError::UnexpectedReply { expected, step } => {
                write!(f, "unexpected reply to {step}, expected {expected}")
            }
            HandshakeError::ConnectionClosed { step } => write!(f, "master closed connection during {step}"),
        }
    }
}

impl std::error::Error for HandshakeError {}

impl From<std::io::Error> for HandshakeError {
    fn from(e: std::io::Error) -> Self {
        HandshakeError::Io(e)
    }
}

impl From<crate::protocol::ParseError> for HandshakeError {
    fn from(e: crate::protocol::ParseError) -> Self {
        HandshakeError::Parse(e)
    }
}

async fn send_and_expect_simple(
    stream: &mut TcpStream,
    buf: &mut FrameBuffer,
    request: Frame,
    step: &'static str,
) -> Result<Frame, HandshakeError> {
    stream.write_all(&request.encode()).await?;
    loop {
        if let Some(frame) = buf.try_parse()? {
            return Ok(frame);
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(HandshakeError::ConnectionClosed { step });
        }
        buf.extend(&chunk[..n]);
    }
}

/// Performs the five-step handshake against the configured master (§4.F),
/// then discards the (empty, in this core) snapshot body. Returns the
/// connected socket, ready to be handed to [`run_follower_ingest`].
pub async fn follower_handshake(
    master_host: &str,
    master_port: u16,
    self_port: u16,
) -> Result<TcpStream, HandshakeError> {
    let mut stream = TcpStream::connect((master_host, master_port)).await?;
    let mut buf = FrameBuffer::new(ParseMode::PeerReply);

    let reply = send_and_expect_simple(&mut stream, &mut buf, Frame::array_of_bulks(["PING"]), "PING").await?;
    match reply {
        Frame::SimpleString(s) if s.starts_with(b"PONG") => {}
        _ => return Err(HandshakeError::UnexpectedReply { expected: "+PONG", step: "PING" }),
    }

    let reply = send_and_expect_simple(
        &mut stream,
        &mut buf,
        Frame::array_of_bulks(["REPLCONF", "listening-port", self_port.to_string().as_str()]),
        "REPLCONF listening-port",
    )
    .await?;
    expect_ok(reply, "REPLCONF listening-port")?;

    let reply = send_and_expect_simple(
        &mut stream,
        &mut buf,
        Frame::array_of_bulks(["REPLCONF", "capa", "psync2"]),
        "REPLCONF capa",
    )
    .await?;
    expect_ok(reply, "REPLCONF capa")?;

    let reply =
        send_and_expect_simple(&mut stream, &mut buf, Frame::array_of_bulks(["PSYNC", "?", "-1"]), "PSYNC").await?;
    match reply {
        Frame::SimpleString(s) if s.starts_with(b"FULLRESYNC") => {}
        _ => return Err(HandshakeError::UnexpectedReply { expected: "+FULLRESYNC", step: "PSYNC" }),
    }

    // Consume and discard the snapshot bulk body that follows.
    loop {
        if buf.try_parse()?.is_some() {
            break;
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(HandshakeError::ConnectionClosed { step: "snapshot body" });
        }
        buf.extend(&chunk[..n]);
    }

    Ok(stream)
}

fn expect_ok(frame: Frame, step: &'static str) -> Result<(), HandshakeError> {
    match frame {
        Frame::SimpleString(s) if s == b"OK" => Ok(()),
        _ => Err(HandshakeError::UnexpectedReply { expected: "+OK", step }),
    }
}

fn is_replconf_getack(frame: &Frame) -> bool {
    let Some(items) = frame.as_array() else { return false };
    let Some(name) = items.first().and_then(Frame::as_bulk) else { return false };
    let Some(sub) = items.get(1).and_then(Frame::as_bulk) else { return false };
    name.eq_ignore_ascii_case(b"REPLCONF") && sub.eq_ignore_ascii_case(b"GETACK")
}

/// Reads replicated command frames off `stream` and applies each through
/// the ordinary dispatcher, propagation-to-further-followers naturally
/// suppressed (this process is not a leader). Replies are discarded except
/// for `REPLCONF GETACK *`, whose `REPLCONF ACK <offset>` must be written
/// back to the master.
pub async fn run_follower_ingest(state: Arc<AppState>, mut stream: TcpStream) -> std::io::Result<()> {
    let mut buf = FrameBuffer::new(ParseMode::ClientRequest);
    let mut conn = ConnectionState::new();
    let mut scratch = [0u8; 4096];

    loop {
        loop {
            let parsed = match buf.try_parse_sized() {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!(error = %e, "malformed frame from master, closing replication link");
                    return Ok(());
                }
            };
            let Some((frame, wire_len)) = parsed else { break };

            // The REPLCONF GETACK handler reads `repl_offset` before this
            // frame's own bytes are folded in, matching "not including this
            // REPLCONF" in §4.E.
            let getack = is_replconf_getack(&frame);
            let reply = dispatch::handle_frame(&state, &mut conn, frame).await;
            state.replication.repl_offset.fetch_add(wire_len as u64, Ordering::SeqCst);

            if getack {
                if let Some(reply) = reply {
                    stream.write_all(&reply.encode()).await?;
                }
            }
        }

        let n = stream.read(&mut scratch).await?;
        if n == 0 {
            tracing::info!("replication link to master closed");
            return Ok(());
        }
        buf.extend(&scratch[..n]);
    }
}
