//! Leader/follower replication: handshake, command propagation, and the
//! acknowledgement-based `WAIT`.

pub mod follower;
pub mod leader;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub use follower::{follower_handshake, run_follower_ingest, HandshakeError};
pub use leader::{AckEvent, LeaderState};

/// The 17-byte "empty RDB" payload a leader sends a follower in lieu of a
/// real snapshot, since partial resync and disk persistence are non-goals.
pub const EMPTY_SNAPSHOT: [u8; 17] =
    [0x52, 0x45, 0x44, 0x49, 0x53, 0x30, 0x30, 0x30, 0x39, 0xFF, 0x09, 0x0A, 0x40, 0x3F, 0x72, 0x6E, 0x64];

/// Generates a 40-hex-character id once at boot. Not cryptographically
/// random — a small xorshift seeded from the process start time, the same
/// class of non-cryptographic generator the source's `rand()` call played,
/// without adding a dependency the teacher doesn't carry.
pub fn generate_replication_id() -> String {
    let seed = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64;
    let mut x = seed | 1;
    let mut out = String::with_capacity(40);
    while out.len() < 40 {
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        out.push_str(&format!("{:016x}", x));
    }
    out.truncate(40);
    out
}

#[derive(Debug)]
pub enum Role {
    Leader(LeaderState),
    Follower(FollowerMeta),
}

/// Static identity of the configured master, known for the process lifetime.
#[derive(Debug, Clone)]
pub struct FollowerMeta {
    pub master_host: String,
    pub master_port: u16,
}

/// Shared replication state: one instance, held by the server and reached
/// from every connection task.
pub struct ReplicationState {
    pub replication_id: String,
    /// Bytes of replicated command stream: produced (leader) or applied
    /// (follower). A single counter regardless of role, per §3/§9.
    pub repl_offset: AtomicU64,
    pub role: Role,
}

impl fmt::Debug for ReplicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicationState")
            .field("replication_id", &self.replication_id)
            .field("repl_offset", &self.repl_offset.load(Ordering::SeqCst))
            .field("role", &self.role)
            .finish()
    }
}

impl ReplicationState {
    pub fn new_leader() -> Self {
        Self { replication_id: generate_replication_id(), repl_offset: AtomicU64::new(0), role: Role::Leader(LeaderState::new()) }
    }

    pub fn new_follower(master_host: String, master_port: u16) -> Self {
        Self {
            replication_id: generate_replication_id(),
            repl_offset: AtomicU64::new(0),
            role: Role::Follower(FollowerMeta { master_host, master_port }),
        }
    }

    pub fn is_leader(&self) -> bool {
        matches!(self.role, Role::Leader(_))
    }

    pub fn as_leader(&self) -> Option<&LeaderState> {
        match &self.role {
            Role::Leader(l) => Some(l),
            Role::Follower(_) => None,
        }
    }

    pub fn role_name(&self) -> &'static str {
        match self.role {
            Role::Leader(_) => "master",
            Role::Follower(_) => "slave",
        }
    }

    /// Renders the `INFO` bulk-string body: `role:`/`master_replid:`/
    /// `master_repl_offset:`, CRLF-separated, per §4.E.
    pub fn info_body(&self) -> String {
        format!(
            "role:{}\r\nmaster_replid:{}\r\nmaster_repl_offset:{}\r\n",
            self.role_name(),
            self.replication_id,
            self.repl_offset.load(Ordering::SeqCst)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_id_is_exactly_40_hex_chars() {
        let id = generate_replication_id();
        assert_eq!(id.len(), 40);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn info_body_reflects_role_and_offset() {
        let state = ReplicationState::new_leader();
        state.repl_offset.store(42, Ordering::SeqCst);
        let body = state.info_body();
        assert!(body.contains("role:master"));
        assert!(body.contains("master_repl_offset:42"));
    }
}
