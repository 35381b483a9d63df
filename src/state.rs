//! The process-wide shared state every connection task reaches: keyspace,
//! stream wakeups, the snapshot reader, replication bookkeeping, and config.

use crate::config::ServerConfig;
use crate::replication::ReplicationState;
use crate::snapshot::SnapshotReader;
use crate::store::stream::StreamBlockState;
use crate::store::Keyspace;

pub struct AppState {
    pub keyspace: Keyspace,
    pub stream_block: StreamBlockState,
    pub snapshot: SnapshotReader,
    pub replication: ReplicationState,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(config: ServerConfig, replication: ReplicationState) -> Self {
        let snapshot = SnapshotReader::new(config.dir.clone(), config.dbfilename.clone());
        Self { keyspace: Keyspace::new(), stream_block: StreamBlockState::new(), snapshot, replication, config }
    }
}
