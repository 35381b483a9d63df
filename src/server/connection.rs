//! Per-connection worker loop (§4.G): read, parse, dispatch, write, repeated
//! until EOF, a parser error, or a write failure.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::dispatch::{self, ConnectionState};
use crate::protocol::{Frame, FrameBuffer, ParseMode};
use crate::replication::EMPTY_SNAPSHOT;
use crate::state::AppState;

/// Runs the ordinary client read-parse-dispatch-write loop. `PSYNC` is
/// special-cased: its leader-side reply carries a raw trailing payload that
/// [`Frame`] cannot encode, so on seeing it this hands the connection over
/// to [`become_follower_link`] instead of looping back for another request.
pub async fn handle_connection(state: Arc<AppState>, mut socket: TcpStream) -> std::io::Result<()> {
    let mut buf = FrameBuffer::new(ParseMode::ClientRequest);
    let mut conn = ConnectionState::new();
    let mut scratch = [0u8; 1024];

    loop {
        loop {
            let frame = match buf.try_parse() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "malformed frame, closing connection");
                    return Ok(());
                }
            };

            if dispatch::is_psync(&frame) {
                return become_follower_link(state, socket, buf).await;
            }

            let reply = dispatch::handle_frame(&state, &mut conn, frame).await;
            if let Some(reply) = reply {
                socket.write_all(&reply.encode()).await?;
            }
        }

        let n = socket.read(&mut scratch).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend(&scratch[..n]);
    }
}

/// Completes the leader side of `PSYNC`: writes `+FULLRESYNC <id> <offset>`
/// followed by the 17-byte empty snapshot with no trailing CRLF (§6), then
/// splits the socket so propagated writes (driven by other connections'
/// mutations) and incoming `REPLCONF ACK` replies can flow independently —
/// the same read/write task split the teacher's connection handling uses,
/// applied here because a follower link is inherently bidirectional but
/// decoupled: writes come from whichever task is propagating, reads come
/// from the peer's unsolicited acks.
async fn become_follower_link(state: Arc<AppState>, mut socket: TcpStream, mut buf: FrameBuffer) -> std::io::Result<()> {
    let Some(leader) = state.replication.as_leader() else {
        socket.write_all(&Frame::error("ERR PSYNC is only available in leader mode").encode()).await?;
        return Ok(());
    };

    let offset = state.replication.repl_offset.load(Ordering::SeqCst);
    let mut header = Frame::simple(format!("FULLRESYNC {} {}", state.replication.replication_id, offset)).encode();
    header.extend_from_slice(format!("${}\r\n", EMPTY_SNAPSHOT.len()).as_bytes());
    header.extend_from_slice(&EMPTY_SNAPSHOT);
    socket.write_all(&header).await?;

    let (follower_id, mut outbox) = leader.add_follower();
    tracing::info!(follower_id, "follower registered");

    let (mut read_half, mut write_half) = socket.into_split();
    let writer = tokio::spawn(async move {
        while let Some(bytes) = outbox.recv().await {
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    let mut conn = ConnectionState { follower_id: Some(follower_id), ..ConnectionState::new() };
    let mut scratch = [0u8; 1024];
    'link: loop {
        loop {
            match buf.try_parse() {
                // Replies are suppressed on a follower link; a leader never
                // expects a reply back except via the ordinary REPLCONF ACK
                // path, which carries no direct reply of its own.
                Ok(Some(frame)) => {
                    let _ = dispatch::handle_frame(&state, &mut conn, frame).await;
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(follower_id, error = %e, "malformed frame from follower, closing link");
                    break 'link;
                }
            }
        }
        match read_half.read(&mut scratch).await {
            Ok(0) | Err(_) => break 'link,
            Ok(n) => buf.extend(&scratch[..n]),
        }
    }

    leader.remove_follower(follower_id);
    writer.abort();
    tracing::info!(follower_id, "follower disconnected");
    Ok(())
}
