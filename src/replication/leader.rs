//! Leader-side replication bookkeeping: the follower set, command
//! propagation, and `WAIT`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

/// A single follower's outbound link. The connection task that completed
/// this follower's `PSYNC` owns the socket; this handle is how every other
/// task hands it bytes to write.
struct FollowerHandle {
    id: u64,
    outbox: mpsc::UnboundedSender<Vec<u8>>,
    ack_offset: AtomicU64,
}

/// Broadcast when any follower's `REPLCONF ACK` arrives, so concurrent
/// `WAIT` calls can each count the acks relevant to their own burst.
#[derive(Debug, Clone)]
pub struct AckEvent {
    pub follower_id: u64,
    pub offset: u64,
}

/// Leader-side replication state: the live follower set plus the
/// acknowledgement channel `WAIT` subscribes to. There is deliberately no
/// `WaitState` singleton here (§9 Open Question): each `wait()` call owns
/// its own counter and subscription.
pub struct LeaderState {
    followers: Mutex<Vec<FollowerHandle>>,
    next_id: AtomicU64,
    ack_events: broadcast::Sender<AckEvent>,
}

impl std::fmt::Debug for LeaderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderState").field("followers", &self.follower_count()).finish()
    }
}

impl LeaderState {
    pub fn new() -> Self {
        let (ack_events, _rx) = broadcast::channel(256);
        Self { followers: Mutex::new(Vec::new()), next_id: AtomicU64::new(1), ack_events }
    }

    /// Registers a freshly `PSYNC`'d follower. Returns its id, the receiving
    /// end of its outbox (the caller's writer task drains this), and the
    /// atomic its ack offset is tracked in (useful for diagnostics/`INFO`
    /// extensions, unused by `wait()` itself since that counts events, not
    /// per-follower offsets).
    pub fn add_follower(&self) -> (u64, mpsc::UnboundedReceiver<Vec<u8>>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.followers.lock().unwrap().push(FollowerHandle { id, outbox: tx, ack_offset: AtomicU64::new(0) });
        (id, rx)
    }

    pub fn remove_follower(&self, id: u64) {
        self.followers.lock().unwrap().retain(|f| f.id != id);
    }

    pub fn follower_count(&self) -> usize {
        self.followers.lock().unwrap().len()
    }

    /// Writes `bytes` to every live follower, dropping any whose outbox has
    /// closed (the follower's connection task has exited). Does not touch
    /// `repl_offset` — the caller advances that once, per §9's resolved
    /// "bytes produced" accounting, regardless of how many followers
    /// actually receive it.
    pub fn propagate(&self, bytes: &[u8]) {
        let mut followers = self.followers.lock().unwrap();
        followers.retain(|f| {
            let ok = f.outbox.send(bytes.to_vec()).is_ok();
            if !ok {
                tracing::warn!(follower_id = f.id, "dropping follower with closed outbox");
            }
            ok
        });
    }

    /// Applies a `REPLCONF ACK <offset>` received from follower `id`.
    pub fn record_ack(&self, id: u64, offset: u64) {
        if let Some(f) = self.followers.lock().unwrap().iter().find(|f| f.id == id) {
            f.ack_offset.store(offset, Ordering::SeqCst);
        }
        let _ = self.ack_events.send(AckEvent { follower_id: id, offset });
    }

    fn getack_burst(&self) {
        let frame = crate::protocol::Frame::array_of_bulks(["REPLCONF", "GETACK", "*"]).encode();
        self.propagate(&frame);
    }

    /// `WAIT numreplicas timeout_ms`, per §4.F. Returns the count of acks
    /// observed after the burst this call issues. If the leader has never
    /// propagated anything (`repl_offset == 0`), returns the current
    /// follower count immediately without waiting, per the special case.
    pub async fn wait(&self, num_replicas: usize, timeout_ms: u64, repl_offset_snapshot: u64) -> usize {
        if repl_offset_snapshot == 0 {
            return self.follower_count();
        }
        let mut rx = self.ack_events.subscribe();
        self.getack_burst();

        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        let mut acks = 0usize;
        while acks < num_replicas {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Ok(_event)) => acks += 1,
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) => break,
                Err(_timed_out) => break,
            }
        }
        acks
    }
}

impl Default for LeaderState {
    fn default() -> Self {
        Self::new()
    }
}
