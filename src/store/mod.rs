//! The shared keyspace: a concurrent map from key bytes to typed entries,
//! each carrying an optional absolute expiry.

pub mod stream;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

pub use stream::{Stream, StreamEntry, StreamId};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// The typed payload of a keyspace entry.
#[derive(Clone)]
pub enum Variant {
    String(Vec<u8>),
    Stream(Arc<Stream>),
}

/// A keyspace entry: its value plus an optional absolute expiry.
#[derive(Clone)]
struct KeyEntry {
    value: Variant,
    expiry_ms: Option<u64>,
}

impl KeyEntry {
    fn is_expired(&self, now: u64) -> bool {
        matches!(self.expiry_ms, Some(exp) if exp <= now)
    }
}

/// The `TYPE` command's result shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    String,
    Stream,
    None,
}

/// A separately-chained concurrent hash table mapping key bytes to typed
/// entries. Backed by [`DashMap`], a sharded concurrent map: each shard is
/// guarded independently, so distinct keys never contend and every
/// operation here returns owned copies, matching the "single reader/writer
/// lock, owned-copy reads" discipline §4.B/§5 describe while giving finer
/// concurrency than one global lock would.
#[derive(Default)]
pub struct Keyspace {
    entries: DashMap<Vec<u8>, KeyEntry>,
}

impl Keyspace {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    /// Writes a `String` entry, freeing any prior value (string or stream)
    /// and clearing any expiry.
    pub fn set(&self, key: Vec<u8>, value: Vec<u8>) {
        self.entries.insert(key, KeyEntry { value: Variant::String(value), expiry_ms: None });
    }

    /// Returns a copy of the string at `key`, or `None` on miss, expiry, or
    /// wrong type.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let now = now_ms();
        let entry = self.entries.get(key)?;
        if entry.is_expired(now) {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        match &entry.value {
            Variant::String(bytes) => Some(bytes.clone()),
            Variant::Stream(_) => None,
        }
    }

    /// Sets `key`'s absolute expiry in milliseconds since the epoch. Returns
    /// `false` if the key is absent.
    pub fn set_expiry(&self, key: &[u8], absolute_ms: u64) -> bool {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.expiry_ms = Some(absolute_ms);
                true
            }
            None => false,
        }
    }

    /// The type of `key`, respecting expiry.
    pub fn type_of(&self, key: &[u8]) -> KeyType {
        let now = now_ms();
        match self.entries.get(key) {
            Some(entry) if entry.is_expired(now) => KeyType::None,
            Some(entry) => match entry.value {
                Variant::String(_) => KeyType::String,
                Variant::Stream(_) => KeyType::Stream,
            },
            None => KeyType::None,
        }
    }

    /// Returns the stream at `key`, creating it on first use. A `String`
    /// entry at `key` (or an expired one) is overwritten with a fresh
    /// `Stream`, the same type-change `SET` followed by `XADD` is specified
    /// to produce.
    pub fn get_or_create_stream(&self, key: &[u8]) -> Arc<Stream> {
        let now = now_ms();
        if let Some(entry) = self.entries.get(key) {
            if let Variant::Stream(stream) = &entry.value {
                if !entry.is_expired(now) {
                    return Arc::clone(stream);
                }
            }
        }
        let stream = Arc::new(Stream::new());
        self.entries
            .insert(key.to_vec(), KeyEntry { value: Variant::Stream(Arc::clone(&stream)), expiry_ms: None });
        stream
    }

    /// Returns the stream at `key` if present and not expired, without
    /// creating one.
    pub fn get_stream(&self, key: &[u8]) -> Option<Arc<Stream>> {
        let now = now_ms();
        let entry = self.entries.get(key)?;
        if entry.is_expired(now) {
            return None;
        }
        match &entry.value {
            Variant::Stream(stream) => Some(Arc::clone(stream)),
            Variant::String(_) => None,
        }
    }

    /// Removes `key` outright, whatever its type. Returns whether it was
    /// present (and not already expired).
    pub fn remove(&self, key: &[u8]) -> bool {
        match self.entries.remove(key) {
            Some((_, entry)) => !entry.is_expired(now_ms()),
            None => false,
        }
    }

    /// Removes every entry whose expiry has elapsed. Intended for periodic
    /// maintenance, not called from the request path.
    pub fn clear_expired(&self) {
        let now = now_ms();
        self.entries.retain(|_, entry| !entry.is_expired(now));
    }

    /// All non-expired keys currently in the in-memory map (used only by
    /// tests — the live `KEYS *` path is served from the snapshot per §4.E).
    #[cfg(test)]
    pub fn keys(&self) -> Vec<Vec<u8>> {
        let now = now_ms();
        self.entries
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.key().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips_and_types_as_string() {
        let ks = Keyspace::new();
        ks.set(b"k".to_vec(), b"v".to_vec());
        assert_eq!(ks.get(b"k"), Some(b"v".to_vec()));
        assert_eq!(ks.type_of(b"k"), KeyType::String);
    }

    #[test]
    fn expired_entry_reads_as_absent() {
        let ks = Keyspace::new();
        ks.set(b"k".to_vec(), b"v".to_vec());
        assert!(ks.set_expiry(b"k", now_ms().saturating_sub(1)));
        assert_eq!(ks.get(b"k"), None);
        assert_eq!(ks.type_of(b"k"), KeyType::None);
    }

    #[test]
    fn set_expiry_on_absent_key_fails() {
        let ks = Keyspace::new();
        assert!(!ks.set_expiry(b"missing", now_ms() + 1000));
    }

    #[test]
    fn stream_add_overwrites_string_type() {
        let ks = Keyspace::new();
        ks.set(b"k".to_vec(), b"v".to_vec());
        ks.get_or_create_stream(b"k");
        assert_eq!(ks.type_of(b"k"), KeyType::Stream);
        assert_eq!(ks.get(b"k"), None, "the old string value must be gone");
    }

    #[test]
    fn get_on_stream_key_returns_absent() {
        let ks = Keyspace::new();
        ks.get_or_create_stream(b"s");
        assert_eq!(ks.get(b"s"), None);
        assert_eq!(ks.type_of(b"s"), KeyType::Stream);
    }

    #[test]
    fn concurrent_set_get_on_distinct_keys_never_corrupts_values() {
        use std::thread;

        let ks = Arc::new(Keyspace::new());
        let mut handles = Vec::new();
        for i in 0..8u32 {
            let ks = Arc::clone(&ks);
            handles.push(thread::spawn(move || {
                let key = format!("k{i}").into_bytes();
                for n in 0..200u32 {
                    ks.set(key.clone(), n.to_string().into_bytes());
                    let got = ks.get(&key).unwrap();
                    assert_eq!(got, n.to_string().into_bytes());
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
