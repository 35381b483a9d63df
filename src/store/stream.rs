//! The append-only, monotonically-keyed log backing a `Stream` keyspace entry.

use std::fmt;
use std::sync::Mutex;

use super::now_ms;

/// A 128-bit stream identifier, ordered lexicographically by `(ms, seq)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const MIN: StreamId = StreamId { ms: 0, seq: 0 };
    pub const MAX: StreamId = StreamId { ms: u64::MAX, seq: u64::MAX };

    pub fn is_zero(&self) -> bool {
        self.ms == 0 && self.seq == 0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// One appended record: an identifier plus an ordered list of field/value
/// pairs. Entries are never modified or removed once appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: StreamId,
    pub pairs: Vec<(Vec<u8>, Vec<u8>)>,
}

/// How the caller asked for the new entry's identifier to be assigned.
#[derive(Debug, Clone, Copy)]
pub enum IdSpec {
    /// `ms-seq`, used exactly.
    Full(StreamId),
    /// `ms-*`: sequence auto-assigned for the given milliseconds.
    PartialMs(u64),
    /// `*`: both fields auto-assigned from the wall clock.
    Auto,
}

/// Errors the stream-id grammar and monotonicity rules can raise. Message
/// text matches the wording callers relay verbatim in a `-ERR` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    ZeroId,
    NotMonotonic,
    MalformedId,
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::ZeroId => {
                write!(f, "ERR The ID specified in XADD must be greater than 0-0")
            }
            StreamError::NotMonotonic => write!(
                f,
                "ERR The ID specified in XADD is equal or smaller than the target stream top item"
            ),
            StreamError::MalformedId => write!(f, "ERR Invalid stream ID specified as stream command argument"),
        }
    }
}

impl std::error::Error for StreamError {}

/// Parses the XDR-free, textual id grammar accepted by `XADD`: a full
/// `ms-seq`, a partial `ms-*`, or the bare `*` sentinel.
pub fn parse_id_spec(text: &[u8]) -> Result<IdSpec, StreamError> {
    if text == b"*" {
        return Ok(IdSpec::Auto);
    }
    let text = std::str::from_utf8(text).map_err(|_| StreamError::MalformedId)?;
    match text.split_once('-') {
        Some((ms, "*")) => {
            let ms: u64 = ms.parse().map_err(|_| StreamError::MalformedId)?;
            Ok(IdSpec::PartialMs(ms))
        }
        Some((ms, seq)) => {
            let ms: u64 = ms.parse().map_err(|_| StreamError::MalformedId)?;
            let seq: u64 = seq.parse().map_err(|_| StreamError::MalformedId)?;
            Ok(IdSpec::Full(StreamId { ms, seq }))
        }
        None => {
            let ms: u64 = text.parse().map_err(|_| StreamError::MalformedId)?;
            Ok(IdSpec::PartialMs(ms))
        }
    }
}

/// Parses an `XRANGE` endpoint: `-` (absolute min), `+` (absolute max), a
/// bare `ms` (seq defaults per `is_start`), or a full `ms-seq`.
pub fn parse_range_bound(text: &[u8], is_start: bool) -> Result<StreamId, StreamError> {
    if text == b"-" {
        return Ok(StreamId::MIN);
    }
    if text == b"+" {
        return Ok(StreamId::MAX);
    }
    let text = std::str::from_utf8(text).map_err(|_| StreamError::MalformedId)?;
    match text.split_once('-') {
        Some((ms, seq)) => {
            let ms: u64 = ms.parse().map_err(|_| StreamError::MalformedId)?;
            let seq: u64 = seq.parse().map_err(|_| StreamError::MalformedId)?;
            Ok(StreamId { ms, seq })
        }
        None => {
            let ms: u64 = text.parse().map_err(|_| StreamError::MalformedId)?;
            let seq = if is_start { 0 } else { u64::MAX };
            Ok(StreamId { ms, seq })
        }
    }
}

struct StreamInner {
    entries: Vec<StreamEntry>,
}

/// An append-only, monotonically-keyed log. Appends and reads are guarded by
/// a per-stream mutex — the source is missing this (§5, §9); the port adds
/// it rather than folding stream mutation under the keyspace lock, so a
/// stream read never blocks on unrelated keyspace traffic.
pub struct Stream {
    inner: Mutex<StreamInner>,
}

impl Stream {
    pub fn new() -> Self {
        Self { inner: Mutex::new(StreamInner { entries: Vec::new() }) }
    }

    /// The identifier of the most recently appended entry, if any.
    pub fn tail_id(&self) -> Option<StreamId> {
        self.inner.lock().unwrap().entries.last().map(|e| e.id)
    }

    /// Resolves `spec` against the current tail and validates monotonicity,
    /// without appending anything.
    fn resolve_id(entries: &[StreamEntry], spec: IdSpec) -> Result<StreamId, StreamError> {
        let tail = entries.last().map(|e| e.id);
        let id = match spec {
            IdSpec::Full(id) => id,
            IdSpec::PartialMs(ms) => {
                let mut seq = match tail {
                    Some(last) if last.ms == ms => last.seq + 1,
                    _ => 0,
                };
                if ms == 0 && seq == 0 && entries.is_empty() {
                    seq = 1;
                }
                StreamId { ms, seq }
            }
            IdSpec::Auto => {
                let ms = now_ms();
                let mut seq = match tail {
                    Some(last) if last.ms == ms => last.seq + 1,
                    _ => 0,
                };
                if ms == 0 && seq == 0 && entries.is_empty() {
                    seq = 1;
                }
                StreamId { ms, seq }
            }
        };
        if id.is_zero() {
            return Err(StreamError::ZeroId);
        }
        if let Some(tail) = tail {
            if id <= tail {
                return Err(StreamError::NotMonotonic);
            }
        }
        Ok(id)
    }

    /// Appends a new entry, copying `pairs` into the stream. Returns the
    /// entry's final identifier.
    pub fn append(
        &self,
        spec: IdSpec,
        pairs: Vec<(Vec<u8>, Vec<u8>)>,
    ) -> Result<StreamId, StreamError> {
        let mut inner = self.inner.lock().unwrap();
        let id = Self::resolve_id(&inner.entries, spec)?;
        inner.entries.push(StreamEntry { id, pairs });
        Ok(id)
    }

    /// Entries with `start <= id <= end`, deep-copied.
    pub fn range(&self, start: StreamId, end: StreamId) -> Vec<StreamEntry> {
        let inner = self.inner.lock().unwrap();
        inner.entries.iter().filter(|e| e.id >= start && e.id <= end).cloned().collect()
    }

    /// Entries with `id > after`, deep-copied.
    pub fn read_after(&self, after: StreamId) -> Vec<StreamEntry> {
        let inner = self.inner.lock().unwrap();
        inner.entries.iter().filter(|e| e.id > after).cloned().collect()
    }
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide broadcast used by blocking `XREAD`: any `XADD` on any
/// stream wakes every blocked reader, which then rechecks its own streams.
/// A coarse broadcast is explicitly permitted by §4.C; per-stream condvars
/// are a refinement, not a requirement.
#[derive(Default)]
pub struct StreamBlockState {
    notify: tokio::sync::Notify,
}

impl StreamBlockState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify_all(&self) {
        self.notify.notify_waiters();
    }

    /// Returns a future that resolves the next time [`Self::notify_all`] is
    /// called after this method returns. Callers must register this
    /// *before* checking whether the condition they're waiting on already
    /// holds: registering afterward leaves a window where a `notify_all`
    /// landing between the check and the registration is silently missed,
    /// since `notify_waiters` only wakes futures that already exist.
    pub fn registered(&self) -> impl std::future::Future<Output = ()> + '_ {
        self.notify.notified()
    }
}

/// Awaits a future returned by [`StreamBlockState::registered`], bounded by
/// `block_ms` (`None` = wait indefinitely). Spurious wakes are the caller's
/// concern: it should recheck its streams and re-register if still empty.
pub async fn wait_for_notification(notified: impl std::future::Future<Output = ()>, block_ms: Option<u64>) {
    match block_ms {
        None => notified.await,
        Some(ms) => {
            let _ = tokio::time::timeout(std::time::Duration::from_millis(ms), notified).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_strictly_increase_under_lexicographic_order() {
        let s = Stream::new();
        let a = s.append(IdSpec::Full(StreamId { ms: 1, seq: 0 }), vec![]).unwrap();
        let b = s.append(IdSpec::Full(StreamId { ms: 1, seq: 1 }), vec![]).unwrap();
        let c = s.append(IdSpec::Full(StreamId { ms: 2, seq: 0 }), vec![]).unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn zero_zero_is_always_rejected() {
        let s = Stream::new();
        assert_eq!(s.append(IdSpec::Full(StreamId::MIN), vec![]), Err(StreamError::ZeroId));
    }

    #[test]
    fn non_increasing_id_is_rejected() {
        let s = Stream::new();
        s.append(IdSpec::Full(StreamId { ms: 5, seq: 0 }), vec![]).unwrap();
        assert_eq!(
            s.append(IdSpec::Full(StreamId { ms: 5, seq: 0 }), vec![]),
            Err(StreamError::NotMonotonic)
        );
        assert_eq!(
            s.append(IdSpec::Full(StreamId { ms: 4, seq: 9 }), vec![]),
            Err(StreamError::NotMonotonic)
        );
    }

    #[test]
    fn partial_ms_increments_sequence_within_same_millisecond() {
        let s = Stream::new();
        let a = s.append(IdSpec::PartialMs(100), vec![]).unwrap();
        let b = s.append(IdSpec::PartialMs(100), vec![]).unwrap();
        assert_eq!(a, StreamId { ms: 100, seq: 0 });
        assert_eq!(b, StreamId { ms: 100, seq: 1 });
    }

    #[test]
    fn ms_zero_partial_on_empty_stream_becomes_zero_one() {
        let s = Stream::new();
        let id = s.append(IdSpec::PartialMs(0), vec![]).unwrap();
        assert_eq!(id, StreamId { ms: 0, seq: 1 });
    }

    #[test]
    fn range_is_inclusive_on_both_ends() {
        let s = Stream::new();
        s.append(IdSpec::Full(StreamId { ms: 1, seq: 0 }), vec![]).unwrap();
        s.append(IdSpec::Full(StreamId { ms: 2, seq: 0 }), vec![]).unwrap();
        s.append(IdSpec::Full(StreamId { ms: 3, seq: 0 }), vec![]).unwrap();
        let got = s.range(StreamId { ms: 1, seq: 0 }, StreamId { ms: 2, seq: 0 });
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn read_after_returns_strictly_greater_entries() {
        let s = Stream::new();
        let a = s.append(IdSpec::Full(StreamId { ms: 1, seq: 0 }), vec![]).unwrap();
        s.append(IdSpec::Full(StreamId { ms: 2, seq: 0 }), vec![]).unwrap();
        let got = s.read_after(a);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, StreamId { ms: 2, seq: 0 });
    }

    #[tokio::test]
    async fn blocked_reader_wakes_shortly_after_an_append_elsewhere() {
        use std::sync::Arc;
        use std::time::Instant;

        let block = Arc::new(StreamBlockState::new());
        let waiter = {
            let block = Arc::clone(&block);
            tokio::spawn(async move {
                let start = Instant::now();
                let notified = block.registered();
                wait_for_notification(notified, Some(2_000)).await;
                start.elapsed()
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        block.notify_all();
        let elapsed = waiter.await.unwrap();
        assert!(elapsed < std::time::Duration::from_millis(500));
    }

    #[test]
    fn parses_range_bounds() {
        assert_eq!(parse_range_bound(b"-", true).unwrap(), StreamId::MIN);
        assert_eq!(parse_range_bound(b"+", false).unwrap(), StreamId::MAX);
        assert_eq!(parse_range_bound(b"5", true).unwrap(), StreamId { ms: 5, seq: 0 });
        assert_eq!(parse_range_bound(b"5", false).unwrap(), StreamId { ms: 5, seq: u64::MAX });
        assert_eq!(parse_range_bound(b"5-2", true).unwrap(), StreamId { ms: 5, seq: 2 });
    }
}
