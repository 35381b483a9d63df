//! Process entry point: parses configuration, stands up replication role,
//! and serves connections until the listener errs out.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use kvault::config::{Cli, ServerConfig};
use kvault::replication::{follower_handshake, run_follower_ingest, ReplicationState};
use kvault::server;
use kvault::state::AppState;

#[tokio::main(worker_threads = 8)]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = match ServerConfig::load(cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let replication = match &config.replicaof {
        Some((host, port)) => ReplicationState::new_follower(host.clone(), *port),
        None => ReplicationState::new_leader(),
    };

    let state = Arc::new(AppState::new(config, replication));

    if let Some((host, port)) = state.config.replicaof.clone() {
        match follower_handshake(&host, port, state.config.port).await {
            Ok(stream) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(e) = run_follower_ingest(state, stream).await {
                        tracing::warn!(error = %e, "replication link ended");
                    }
                });
            }
            Err(e) => {
                tracing::error!(error = %e, master = %host, port, "replication handshake failed");
                return ExitCode::FAILURE;
            }
        }
    }

    if let Err(e) = server::run(state).await {
        tracing::error!(error = %e, "server stopped");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
