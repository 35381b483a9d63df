//! The command dispatcher: table-driven arity/lookup, transaction queueing,
//! and the mutation-propagation hook into replication.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;

use crate::protocol::Frame;
use crate::state::AppState;
use crate::store::stream::{parse_id_spec, parse_range_bound, wait_for_notification, StreamEntry, StreamId};
use crate::store::{now_ms, KeyType};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Per-connection dispatcher state: the transaction queue, and (leader side
/// only) which follower this connection became after completing `PSYNC`.
#[derive(Default)]
pub struct ConnectionState {
    pub in_transaction: bool,
    pub queue: Vec<Frame>,
    pub follower_id: Option<u64>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }
}

struct CommandSpec {
    name: &'static str,
    min_args: usize,
    /// `-1` means unbounded.
    max_args: i64,
    mutation: bool,
}

const COMMANDS: &[CommandSpec] = &[
    CommandSpec { name: "PING", min_args: 1, max_args: 2, mutation: false },
    CommandSpec { name: "ECHO", min_args: 2, max_args: 2, mutation: false },
    CommandSpec { name: "SET", min_args: 3, max_args: 5, mutation: true },
    CommandSpec { name: "GET", min_args: 2, max_args: 2, mutation: false },
    CommandSpec { name: "TYPE", min_args: 2, max_args: 2, mutation: false },
    CommandSpec { name: "INCR", min_args: 2, max_args: 2, mutation: true },
    CommandSpec { name: "DEL", min_args: 2, max_args: -1, mutation: true },
    CommandSpec { name: "XADD", min_args: 5, max_args: -1, mutation: true },
    CommandSpec { name: "XRANGE", min_args: 4, max_args: 4, mutation: false },
    CommandSpec { name: "XREAD", min_args: 4, max_args: -1, mutation: false },
    CommandSpec { name: "MULTI", min_args: 1, max_args: 1, mutation: false },
    CommandSpec { name: "EXEC", min_args: 1, max_args: 1, mutation: false },
    CommandSpec { name: "DISCARD", min_args: 1, max_args: 1, mutation: false },
    CommandSpec { name: "CONFIG", min_args: 3, max_args: 3, mutation: false },
    CommandSpec { name: "KEYS", min_args: 2, max_args: 2, mutation: false },
    CommandSpec { name: "INFO", min_args: 1, max_args: 2, mutation: false },
    CommandSpec { name: "REPLCONF", min_args: 2, max_args: -1, mutation: false },
    CommandSpec { name: "PSYNC", min_args: 3, max_args: 3, mutation: false },
    CommandSpec { name: "WAIT", min_args: 3, max_args: 3, mutation: false },
];

fn find_spec(name_upper: &[u8]) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|c| c.name.as_bytes() == name_upper)
}

fn arity_ok(spec: &CommandSpec, len: usize) -> bool {
    len >= spec.min_args && (spec.max_args == -1 || (len as i64) <= spec.max_args)
}

/// True for a well-formed `PSYNC` request; used by the connection worker to
/// intercept the handshake before it ever reaches [`handle_frame`], since
/// its reply has a non-RESP trailing payload that [`Frame`] cannot
/// represent. Arity is checked here too, against the same `COMMANDS` entry
/// `handle_frame` would have checked it against — a malformed-arity `PSYNC`
/// falls through to the ordinary dispatcher instead of being handed a full
/// resync, and gets the same `-ERR wrong number of arguments` any other
/// command would.
pub fn is_psync(frame: &Frame) -> bool {
    let Some(items) = frame.as_array() else { return false };
    let Some(name) = items.first().and_then(Frame::as_bulk) else { return false };
    if !name.eq_ignore_ascii_case(b"PSYNC") {
        return false;
    }
    find_spec(b"PSYNC").is_some_and(|spec| arity_ok(spec, items.len()))
}

/// Runs the full pre-handler pipeline (§4.E) for one decoded frame: shape
/// validation, lookup, arity, transaction queueing, execution, and
/// mutation propagation. Recurses into itself for `EXEC`'s queued commands,
/// which is why this returns a boxed future rather than a plain `async fn`.
pub fn handle_frame<'a>(state: &'a AppState, conn: &'a mut ConnectionState, frame: Frame) -> BoxFuture<'a, Option<Frame>> {
    Box::pin(async move {
        let Some(items) = frame.as_array() else {
            return Some(Frame::error("ERR Protocol error: expected array of bulk strings"));
        };
        if items.is_empty() {
            return Some(Frame::error("ERR Protocol error: empty command"));
        }
        let mut args = Vec::with_capacity(items.len());
        for item in items {
            let Some(bytes) = item.as_bulk() else {
                return Some(Frame::error("ERR Protocol error: expected bulk string"));
            };
            args.push(bytes.to_vec());
        }

        let name_upper = args[0].to_ascii_uppercase();
        let Some(spec) = find_spec(&name_upper) else {
            return Some(Frame::error(format!("ERR unknown command '{}'", String::from_utf8_lossy(&args[0]))));
        };
        if !arity_ok(spec, args.len()) {
            return Some(Frame::error(format!("ERR wrong number of arguments for '{}' command", spec.name.to_ascii_lowercase())));
        }

        let is_transaction_control = matches!(name_upper.as_slice(), b"MULTI" | b"EXEC" | b"DISCARD");
        if conn.in_transaction && !is_transaction_control {
            conn.queue.push(frame.clone());
            return Some(Frame::simple("QUEUED"));
        }

        let reply = execute_one(&name_upper, &args, state, conn).await;

        if spec.mutation {
            if let Some(leader) = state.replication.as_leader() {
                let bytes = frame.encode();
                leader.propagate(&bytes);
                state.replication.repl_offset.fetch_add(bytes.len() as u64, Ordering::SeqCst);
            }
        }

        reply
    })
}

async fn execute_one(name: &[u8], args: &[Vec<u8>], state: &AppState, conn: &mut ConnectionState) -> Option<Frame> {
    match name {
        b"PING" => Some(cmd_ping(args)),
        b"ECHO" => Some(Frame::bulk(args[1].clone())),
        b"SET" => Some(cmd_set(state, args)),
        b"GET" => Some(cmd_get(state, args)),
        b"TYPE" => Some(cmd_type(state, args)),
        b"INCR" => Some(cmd_incr(state, args)),
        b"DEL" => Some(cmd_del(state, args)),
        b"XADD" => Some(cmd_xadd(state, args)),
        b"XRANGE" => Some(cmd_xrange(state, args)),
        b"XREAD" => cmd_xread(state, args).await,
        b"MULTI" => Some(cmd_multi(conn)),
        b"EXEC" => Some(cmd_exec(state, conn).await),
        b"DISCARD" => Some(cmd_discard(conn)),
        b"CONFIG" => Some(cmd_config(state, args)),
        b"KEYS" => Some(cmd_keys(state, args)),
        b"INFO" => Some(Frame::bulk(state.replication.info_body())),
        b"REPLCONF" => cmd_replconf(state, conn, args),
        // The connection worker intercepts PSYNC before it ever reaches here
        // (its reply carries a raw trailing payload `Frame` can't encode).
        b"PSYNC" => None,
        b"WAIT" => Some(cmd_wait(state, args).await),
        _ => Some(Frame::error("ERR unknown command")),
    }
}

fn cmd_ping(args: &[Vec<u8>]) -> Frame {
    match args.get(1) {
        Some(msg) => Frame::bulk(msg.clone()),
        None => Frame::simple("PONG"),
    }
}

fn cmd_set(state: &AppState, args: &[Vec<u8>]) -> Frame {
    let key = args[1].clone();
    let value = args[2].clone();
    match args.len() {
        3 => {
            state.keyspace.set(key, value);
        }
        5 => {
            if !args[3].eq_ignore_ascii_case(b"PX") {
                return Frame::error("ERR syntax error");
            }
            let Some(ms) = std::str::from_utf8(&args[4]).ok().and_then(|s| s.parse::<i64>().ok()) else {
                return Frame::error("ERR value is not an integer or out of range");
            };
            state.keyspace.set(key.clone(), value);
            if ms > 0 {
                state.keyspace.set_expiry(&key, now_ms() + ms as u64);
            }
        }
        _ => return Frame::error("ERR syntax error"),
    }
    Frame::simple("OK")
}

fn cmd_get(state: &AppState, args: &[Vec<u8>]) -> Frame {
    let key = &args[1];
    if let Some(v) = state.keyspace.get(key) {
        return Frame::bulk(v);
    }
    if let Some(v) = state.snapshot.get_value(key) {
        return Frame::bulk(v);
    }
    Frame::null_bulk()
}

fn cmd_type(state: &AppState, args: &[Vec<u8>]) -> Frame {
    match state.keyspace.type_of(&args[1]) {
        KeyType::String => Frame::simple("string"),
        KeyType::Stream => Frame::simple("stream"),
        KeyType::None => Frame::simple("none"),
    }
}

fn cmd_incr(state: &AppState, args: &[Vec<u8>]) -> Frame {
    let key = &args[1];
    let current = state.keyspace.get(key);
    let current_val: i64 = match &current {
        Some(bytes) => match std::str::from_utf8(bytes).ok().and_then(|s| s.parse::<i64>().ok()) {
            Some(n) => n,
            None => return Frame::error("ERR value is not an integer or out of range"),
        },
        None => 0,
    };
    let Some(next) = current_val.checked_add(1) else {
        return Frame::error("ERR value is not an integer or out of range");
    };
    state.keyspace.set(key.clone(), next.to_string().into_bytes());
    Frame::Integer(next)
}

fn cmd_del(state: &AppState, args: &[Vec<u8>]) -> Frame {
    let count = args[1..].iter().filter(|key| state.keyspace.remove(key)).count();
    Frame::Integer(count as i64)
}

fn cmd_xadd(state: &AppState, args: &[Vec<u8>]) -> Frame {
    let key = &args[1];
    let id_spec = match parse_id_spec(&args[2]) {
        Ok(spec) => spec,
        Err(e) => return Frame::error(e.to_string()),
    };
    let rest = &args[3..];
    if rest.is_empty() || rest.len() % 2 != 0 {
        return Frame::error("ERR wrong number of arguments for 'xadd' command");
    }
    let pairs: Vec<(Vec<u8>, Vec<u8>)> = rest.chunks_exact(2).map(|c| (c[0].clone(), c[1].clone())).collect();
    let stream = state.keyspace.get_or_create_stream(key);
    match stream.append(id_spec, pairs) {
        Ok(id) => {
            state.stream_block.notify_all();
            Frame::bulk(id.to_string())
        }
        Err(e) => Frame::error(e.to_string()),
    }
}

fn entry_to_frame(entry: StreamEntry) -> Frame {
    let mut fields = Vec::with_capacity(entry.pairs.len() * 2);
    for (field, value) in entry.pairs {
        fields.push(Frame::bulk(field));
        fields.push(Frame::bulk(value));
    }
    Frame::Array(Some(vec![Frame::bulk(entry.id.to_string()), Frame::Array(Some(fields))]))
}

fn cmd_xrange(state: &AppState, args: &[Vec<u8>]) -> Frame {
    let key = &args[1];
    let start = match parse_range_bound(&args[2], true) {
        Ok(id) => id,
        Err(e) => return Frame::error(e.to_string()),
    };
    let end = match parse_range_bound(&args[3], false) {
        Ok(id) => id,
        Err(e) => return Frame::error(e.to_string()),
    };
    let entries = state.keyspace.get_stream(key).map(|s| s.range(start, end)).unwrap_or_default();
    Frame::Array(Some(entries.into_iter().map(entry_to_frame).collect()))
}

async fn cmd_xread(state: &AppState, args: &[Vec<u8>]) -> Option<Frame> {
    let mut idx = 1;
    let mut block_ms: Option<u64> = None;

    if args.get(idx).map(|a| a.eq_ignore_ascii_case(b"BLOCK")).unwrap_or(false) {
        idx += 1;
        let ms = match args.get(idx).and_then(|a| std::str::from_utf8(a).ok()).and_then(|s| s.parse::<u64>().ok()) {
            Some(ms) => ms,
            None => return Some(Frame::error("ERR syntax error")),
        };
        block_ms = Some(ms);
        idx += 1;
    }

    if args.get(idx).map(|a| a.eq_ignore_ascii_case(b"STREAMS")).unwrap_or(false) {
        idx += 1;
    } else {
        return Some(Frame::error("ERR syntax error"));
    }

    let remaining = &args[idx..];
    if remaining.is_empty() || remaining.len() % 2 != 0 {
        return Some(Frame::error(
            "ERR Unbalanced XREAD list of streams: for each stream key an ID or '$' must be specified.",
        ));
    }
    let n = remaining.len() / 2;
    let keys = &remaining[..n];
    let id_args = &remaining[n..];

    let mut after_ids = Vec::with_capacity(n);
    for (key, id_arg) in keys.iter().zip(id_args.iter()) {
        let after = if id_arg.as_slice() == b"$" {
            state.keyspace.get_stream(key).and_then(|s| s.tail_id()).unwrap_or(StreamId::MIN)
        } else {
            match parse_range_bound(id_arg, true) {
                Ok(id) => id,
                Err(e) => return Some(Frame::error(e.to_string())),
            }
        };
        after_ids.push(after);
    }

    let deadline =
        block_ms.filter(|ms| *ms > 0).map(|ms| tokio::time::Instant::now() + std::time::Duration::from_millis(ms));

    loop {
        // Register for the next wakeup before checking for new entries: a
        // notify_all() landing between the check and the registration would
        // otherwise be missed, since notify_waiters only reaches futures
        // that already exist at the time it's called.
        let notified = state.stream_block.registered();

        let mut per_stream = Vec::new();
        for (key, after) in keys.iter().zip(after_ids.iter()) {
            if let Some(stream) = state.keyspace.get_stream(key) {
                let entries = stream.read_after(*after);
                if !entries.is_empty() {
                    per_stream.push((key.clone(), entries));
                }
            }
        }
        if !per_stream.is_empty() {
            let items = per_stream
                .into_iter()
                .map(|(key, entries)| {
                    Frame::Array(Some(vec![
                        Frame::bulk(key),
                        Frame::Array(Some(entries.into_iter().map(entry_to_frame).collect())),
                    ]))
                })
                .collect();
            return Some(Frame::Array(Some(items)));
        }

        match block_ms {
            None => return Some(Frame::null_bulk()),
            Some(0) => wait_for_notification(notified, None).await,
            Some(_) => {
                let remaining = deadline.unwrap().saturating_duration_since(tokio::time::Instant::now());
                if remaining.is_zero() {
                    return Some(Frame::null_bulk());
                }
                wait_for_notification(notified, Some(remaining.as_millis() as u64)).await;
            }
        }
    }
}

fn cmd_multi(conn: &mut ConnectionState) -> Frame {
    if conn.in_transaction {
        return Frame::error("ERR MULTI calls can not be nested");
    }
    conn.in_transaction = true;
    Frame::simple("OK")
}

async fn cmd_exec(state: &AppState, conn: &mut ConnectionState) -> Frame {
    if !conn.in_transaction {
        return Frame::error("ERR EXEC without MULTI");
    }
    let queued = std::mem::take(&mut conn.queue);
    conn.in_transaction = false;
    let mut results = Vec::with_capacity(queued.len());
    for queued_frame in queued {
        let reply = handle_frame(state, conn, queued_frame).await.unwrap_or_else(Frame::null_bulk);
        results.push(reply);
    }
    Frame::Array(Some(results))
}

fn cmd_discard(conn: &mut ConnectionState) -> Frame {
    if !conn.in_transaction {
        return Frame::error("ERR DISCARD without MULTI");
    }
    conn.queue.clear();
    conn.in_transaction = false;
    Frame::simple("OK")
}

fn cmd_config(state: &AppState, args: &[Vec<u8>]) -> Frame {
    if !args[1].eq_ignore_ascii_case(b"GET") {
        return Frame::error("ERR syntax error");
    }
    if args[2].eq_ignore_ascii_case(b"dir") {
        return Frame::array_of_bulks(["dir", state.config.dir.as_str()]);
    }
    Frame::Array(Some(vec![]))
}

fn cmd_keys(state: &AppState, args: &[Vec<u8>]) -> Frame {
    if args[1] != b"*" {
        return Frame::Array(Some(vec![]));
    }
    Frame::Array(Some(state.snapshot.get_keys().into_iter().map(Frame::bulk).collect()))
}

fn cmd_replconf(state: &AppState, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Option<Frame> {
    let sub = &args[1];
    if sub.eq_ignore_ascii_case(b"GETACK") {
        let offset = state.replication.repl_offset.load(Ordering::SeqCst);
        return Some(Frame::array_of_bulks(["REPLCONF", "ACK", offset.to_string().as_str()]));
    }
    if sub.eq_ignore_ascii_case(b"ACK") {
        if let (Some(leader), Some(id)) = (state.replication.as_leader(), conn.follower_id) {
            if let Some(offset) = args.get(2).and_then(|a| std::str::from_utf8(a).ok()).and_then(|s| s.parse::<u64>().ok())
            {
                leader.record_ack(id, offset);
            }
        }
        return None;
    }
    if sub.eq_ignore_ascii_case(b"listening-port") || sub.eq_ignore_ascii_case(b"capa") {
        return Some(Frame::simple("OK"));
    }
    Some(Frame::error("ERR unknown REPLCONF subcommand"))
}

async fn cmd_wait(state: &AppState, args: &[Vec<u8>]) -> Frame {
    let Some(leader) = state.replication.as_leader() else {
        return Frame::error("ERR WAIT is only available in leader mode");
    };
    let Some(num_replicas) = std::str::from_utf8(&args[1]).ok().and_then(|s| s.parse::<usize>().ok()) else {
        return Frame::error("ERR value is not an integer or out of range");
    };
    let Some(timeout_ms) = std::str::from_utf8(&args[2]).ok().and_then(|s| s.parse::<u64>().ok()) else {
        return Frame::error("ERR value is not an integer or out of range");
    };
    let snapshot = state.replication.repl_offset.load(Ordering::SeqCst);
    let acks = leader.wait(num_replicas, timeout_ms, snapshot).await;
    Frame::Integer(acks as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::replication::ReplicationState;

    fn test_state() -> AppState {
        AppState::new(ServerConfig::default(), ReplicationState::new_leader())
    }

    async fn run(state: &AppState, conn: &mut ConnectionState, parts: &[&str]) -> Frame {
        let frame = Frame::array_of_bulks(parts.iter().map(|s| s.as_bytes().to_vec()));
        handle_frame(state, conn, frame).await.expect("reply")
    }

    #[test]
    fn is_psync_rejects_wrong_arity() {
        assert!(!is_psync(&Frame::array_of_bulks(["PSYNC"])));
        assert!(!is_psync(&Frame::array_of_bulks(["PSYNC", "?"])));
        assert!(is_psync(&Frame::array_of_bulks(["PSYNC", "?", "-1"])));
    }

    #[tokio::test]
    async fn ping_replies_pong() {
        let state = test_state();
        let mut conn = ConnectionState::new();
        assert_eq!(run(&state, &mut conn, &["PING"]).await, Frame::simple("PONG"));
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let state = test_state();
        let mut conn = ConnectionState::new();
        assert_eq!(run(&state, &mut conn, &["SET", "foo", "bar"]).await, Frame::simple("OK"));
        assert_eq!(run(&state, &mut conn, &["GET", "foo"]).await, Frame::bulk("bar"));
    }

    #[tokio::test]
    async fn incr_on_absent_key_starts_at_one() {
        let state = test_state();
        let mut conn = ConnectionState::new();
        assert_eq!(run(&state, &mut conn, &["INCR", "counter"]).await, Frame::Integer(1));
        assert_eq!(run(&state, &mut conn, &["INCR", "counter"]).await, Frame::Integer(2));
    }

    #[tokio::test]
    async fn incr_on_non_numeric_value_errors() {
        let state = test_state();
        let mut conn = ConnectionState::new();
        run(&state, &mut conn, &["SET", "k", "notanumber"]).await;
        assert_eq!(run(&state, &mut conn, &["INCR", "k"]).await, Frame::error("ERR value is not an integer or out of range"));
    }

    #[tokio::test]
    async fn unknown_command_errors_but_keeps_connection_usable() {
        let state = test_state();
        let mut conn = ConnectionState::new();
        let reply = run(&state, &mut conn, &["NOTACOMMAND"]).await;
        assert!(matches!(reply, Frame::Error(_)));
        assert_eq!(run(&state, &mut conn, &["PING"]).await, Frame::simple("PONG"));
    }

    #[tokio::test]
    async fn wrong_arity_errors() {
        let state = test_state();
        let mut conn = ConnectionState::new();
        let reply = run(&state, &mut conn, &["SET", "onlykey"]).await;
        assert!(matches!(reply, Frame::Error(_)));
    }

    #[tokio::test]
    async fn multi_exec_queues_and_executes_in_order() {
        let state = test_state();
        let mut conn = ConnectionState::new();
        assert_eq!(run(&state, &mut conn, &["MULTI"]).await, Frame::simple("OK"));
        assert_eq!(run(&state, &mut conn, &["SET", "a", "10"]).await, Frame::simple("QUEUED"));
        assert_eq!(run(&state, &mut conn, &["INCR", "a"]).await, Frame::simple("QUEUED"));
        let reply = run(&state, &mut conn, &["EXEC"]).await;
        assert_eq!(reply, Frame::Array(Some(vec![Frame::simple("OK"), Frame::Integer(11)])));
    }

    #[tokio::test]
    async fn exec_without_multi_errors() {
        let state = test_state();
        let mut conn = ConnectionState::new();
        assert_eq!(run(&state, &mut conn, &["EXEC"]).await, Frame::error("ERR EXEC without MULTI"));
    }

    #[tokio::test]
    async fn discard_clears_queue_without_applying_it() {
        let state = test_state();
        let mut conn = ConnectionState::new();
        run(&state, &mut conn, &["MULTI"]).await;
        run(&state, &mut conn, &["SET", "a", "1"]).await;
        assert_eq!(run(&state, &mut conn, &["DISCARD"]).await, Frame::simple("OK"));
        assert_eq!(run(&state, &mut conn, &["GET", "a"]).await, Frame::null_bulk());
    }

    #[tokio::test]
    async fn xadd_rejects_zero_id_and_non_monotonic_id() {
        let state = test_state();
        let mut conn = ConnectionState::new();
        assert_eq!(
            run(&state, &mut conn, &["XADD", "s", "0-1", "f", "v"]).await,
            Frame::bulk("0-1")
        );
        assert_eq!(
            run(&state, &mut conn, &["XADD", "s", "0-1", "f", "v"]).await,
            Frame::error("ERR The ID specified in XADD is equal or smaller than the target stream top item")
        );
    }

    #[tokio::test]
    async fn xadd_on_a_string_key_overwrites_its_type_to_stream() {
        let state = test_state();
        let mut conn = ConnectionState::new();
        run(&state, &mut conn, &["SET", "k", "v"]).await;
        assert_eq!(run(&state, &mut conn, &["XADD", "k", "1-1", "f", "v"]).await, Frame::bulk("1-1"));
        assert_eq!(run(&state, &mut conn, &["TYPE", "k"]).await, Frame::simple("stream"));
        assert_eq!(run(&state, &mut conn, &["GET", "k"]).await, Frame::null_bulk());
    }

    #[tokio::test]
    async fn config_get_dir_reflects_configured_dir() {
        let state = test_state();
        let mut conn = ConnectionState::new();
        let reply = run(&state, &mut conn, &["CONFIG", "GET", "dir"]).await;
        assert_eq!(reply, Frame::array_of_bulks(["dir", "/tmp"]));
    }

    #[tokio::test]
    async fn config_get_unknown_parameter_returns_empty_array() {
        let state = test_state();
        let mut conn = ConnectionState::new();
        let reply = run(&state, &mut conn, &["CONFIG", "GET", "maxmemory"]).await;
        assert_eq!(reply, Frame::Array(Some(vec![])));
    }

    #[tokio::test]
    async fn replconf_getack_replies_with_current_offset() {
        let state = test_state();
        let mut conn = ConnectionState::new();
        let reply = run(&state, &mut conn, &["REPLCONF", "GETACK", "*"]).await;
        assert_eq!(reply, Frame::array_of_bulks(["REPLCONF", "ACK", "0"]));
    }

    #[tokio::test]
    async fn xread_non_blocking_on_empty_stream_returns_null() {
        let state = test_state();
        let mut conn = ConnectionState::new();
        let reply = run(&state, &mut conn, &["XREAD", "STREAMS", "s", "0"]).await;
        assert_eq!(reply, Frame::null_bulk());
    }

    #[tokio::test]
    async fn xread_returns_entries_added_after_the_given_id() {
        let state = test_state();
        let mut conn = ConnectionState::new();
        run(&state, &mut conn, &["XADD", "s", "1-1", "f", "v"]).await;
        let reply = run(&state, &mut conn, &["XREAD", "STREAMS", "s", "0"]).await;
        assert_eq!(
            reply,
            Frame::Array(Some(vec![Frame::Array(Some(vec![
                Frame::bulk("s"),
                Frame::Array(Some(vec![Frame::Array(Some(vec![
                    Frame::bulk("1-1"),
                    Frame::Array(Some(vec![Frame::bulk("f"), Frame::bulk("v")])),
                ]))])),
            ]))]))
        );
    }

    #[tokio::test]
    async fn xread_block_wakes_on_concurrent_xadd_instead_of_hanging() {
        let state = std::sync::Arc::new(test_state());
        let mut conn = ConnectionState::new();

        let producer_state = std::sync::Arc::clone(&state);
        let producer = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            let mut producer_conn = ConnectionState::new();
            run(&producer_state, &mut producer_conn, &["XADD", "s", "1-1", "f", "v"]).await;
        });

        let reply = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            run(&state, &mut conn, &["XREAD", "BLOCK", "0", "STREAMS", "s", "0"]),
        )
        .await
        .expect("XREAD BLOCK 0 should wake once the concurrent XADD lands, not hang");

        producer.await.unwrap();
        assert_eq!(
            reply,
            Frame::Array(Some(vec![Frame::Array(Some(vec![
                Frame::bulk("s"),
                Frame::Array(Some(vec![Frame::Array(Some(vec![
                    Frame::bulk("1-1"),
                    Frame::Array(Some(vec![Frame::bulk("f"), Frame::bulk("v")])),
                ]))])),
            ]))]))
        );
    }
}
