//! TCP listener and per-connection worker, §4.G/§5's "fixed-size worker
//! pool" realized as one tokio task per accepted connection scheduled across
//! a multi-thread runtime, rather than a hand-rolled thread pool.

mod connection;

pub use connection::handle_connection;

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::state::AppState;

/// Binds `state.config.bind:state.config.port` and serves forever, spawning
/// one task per accepted connection.
pub async fn run(state: Arc<AppState>) -> std::io::Result<()> {
    let addr = format!("{}:{}", state.config.bind, state.config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, role = state.replication.role_name(), "listening");

    loop {
        let (socket, peer) = listener.accept().await?;
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            tracing::debug!(%peer, "connection accepted");
            match handle_connection(state, socket).await {
                Ok(()) => tracing::debug!(%peer, "connection closed"),
                Err(e) => tracing::debug!(%peer, error = %e, "connection closed with error"),
            }
        });
    }
}
