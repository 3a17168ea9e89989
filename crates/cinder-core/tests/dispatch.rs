//! End-to-end command scenarios through the dispatcher.
//!
//! Every command travels the full path: raw RESP bytes in, dispatch,
//! handler execution against the keyspace, encoded reply out. The
//! clock is manual, so expiry scenarios are deterministic.

use std::sync::Arc;

use cinder_core::{
    DispatchError, Engine, EvictionPolicy, KeyspaceConfig, ManualClock, SessionContext,
};
use cinder_protocol::encode_command;

/// Engine start time: an arbitrary fixed unix timestamp.
const START_MS: i64 = 1_000_000;

struct Harness {
    engine: Arc<Engine>,
    clock: Arc<ManualClock>,
    session: SessionContext,
}

impl Harness {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(START_MS));
        let engine = Engine::builder("scenario-test")
            .clock(clock.clone())
            .synchronous_cache_updates()
            .build();
        let session = engine.session("conn-1");
        Self {
            engine,
            clock,
            session,
        }
    }

    fn run(&self, tokens: &[&str]) -> Result<Vec<u8>, DispatchError> {
        let raw = encode_command(&tokens.iter().map(|t| t.to_string()).collect::<Vec<_>>());
        self.engine
            .handle_command(&self.session, &raw, None, false, false)
    }

    fn reply(&self, tokens: &[&str]) -> Vec<u8> {
        self.run(tokens).expect("command should succeed")
    }

    fn error(&self, tokens: &[&str]) -> String {
        self.run(tokens).expect_err("command should fail").to_string()
    }
}

#[test]
fn set_then_get_round_trips() {
    let h = Harness::new();
    assert_eq!(h.reply(&["SET", "SetKey1", "value1"]), b"+OK\r\n");
    assert_eq!(h.reply(&["GET", "SetKey1"]), b"$6\r\nvalue1\r\n");
}

#[test]
fn set_nx_on_existing_key_fails_and_preserves_value() {
    let h = Harness::new();
    h.reply(&["SET", "SetKey5", "preset-value5"]);

    let err = h.error(&["SET", "SetKey5", "value5", "NX"]);
    assert!(err.contains("key SetKey5 already exists"), "got: {err}");
    assert_eq!(h.reply(&["GET", "SetKey5"]), b"$13\r\npreset-value5\r\n");
}

#[test]
fn set_nx_on_missing_key_succeeds() {
    let h = Harness::new();
    assert_eq!(h.reply(&["SET", "SetKey4", "value4", "NX"]), b"+OK\r\n");
    assert_eq!(h.reply(&["GET", "SetKey4"]), b"$6\r\nvalue4\r\n");
}

#[test]
fn set_xx_on_missing_key_fails() {
    let h = Harness::new();
    let err = h.error(&["SET", "SetKey7", "value7", "XX"]);
    assert!(err.contains("key SetKey7 does not exist"), "got: {err}");
    assert_eq!(h.reply(&["GET", "SetKey7"]), b"$-1\r\n");
}

#[test]
fn set_xx_on_existing_key_replaces_value() {
    let h = Harness::new();
    h.reply(&["SET", "SetKey6", "preset-value6"]);
    assert_eq!(h.reply(&["SET", "SetKey6", "value6", "XX"]), b"+OK\r\n");
    assert_eq!(h.reply(&["GET", "SetKey6"]), b"$6\r\nvalue6\r\n");
}

#[test]
fn set_with_ex_reports_absolute_expiretime() {
    let h = Harness::new();
    assert_eq!(h.reply(&["SET", "SetKey10", "value10", "EX", "100"]), b"+OK\r\n");
    // unix seconds at the manual clock start + 100
    let expected = format!(":{}\r\n", START_MS / 1000 + 100);
    assert_eq!(h.reply(&["EXPIRETIME", "SetKey10"]), expected.as_bytes());
}

#[test]
fn set_exat_pins_the_absolute_expiry() {
    let h = Harness::new();
    let at_secs = START_MS / 1000 + 500;
    h.reply(&["SET", "k", "v", "EXAT", &at_secs.to_string()]);
    assert_eq!(
        h.reply(&["EXPIRETIME", "k"]),
        format!(":{at_secs}\r\n").as_bytes()
    );
    assert_eq!(
        h.reply(&["PEXPIRETIME", "k"]),
        format!(":{}\r\n", at_secs * 1000).as_bytes()
    );
}

#[test]
fn mset_then_mget_preserves_order() {
    let h = Harness::new();
    assert_eq!(
        h.reply(&["MSET", "MsetKey1", "value1", "MsetKey2", "10", "MsetKey3", "3.142"]),
        b"+OK\r\n"
    );
    assert_eq!(
        h.reply(&["MGET", "MsetKey1", "MsetKey2", "MsetKey3"]),
        b"*3\r\n$6\r\nvalue1\r\n$2\r\n10\r\n$5\r\n3.142\r\n"
    );
}

#[test]
fn mset_odd_arguments_is_an_error() {
    let h = Harness::new();
    let err = h.error(&["MSET", "k1", "v1", "k2"]);
    assert_eq!(err, "each key must be paired with a value");
}

#[test]
fn mget_reports_nil_holes_in_request_order() {
    let h = Harness::new();
    h.reply(&["SET", "MgetKey5", "value5"]);
    h.reply(&["SET", "MgetKey6", "value6"]);
    h.reply(&["SET", "MgetKey7", "value7"]);

    assert_eq!(
        h.reply(&[
            "MGET",
            "MgetKey5",
            "MgetKey6",
            "non-existent",
            "non-existent",
            "MgetKey7",
            "non-existent"
        ]),
        b"*6\r\n$6\r\nvalue5\r\n$6\r\nvalue6\r\n$-1\r\n$-1\r\n$6\r\nvalue7\r\n$-1\r\n"
    );
}

#[test]
fn del_counts_only_removed_keys() {
    let h = Harness::new();
    for key in ["DelKey1", "DelKey2", "DelKey3", "DelKey4"] {
        h.reply(&["SET", key, "value"]);
    }
    assert_eq!(
        h.reply(&["DEL", "DelKey1", "DelKey2", "DelKey3", "DelKey4", "DelKey5"]),
        b":4\r\n"
    );
    for key in ["DelKey1", "DelKey2", "DelKey3", "DelKey4", "DelKey5"] {
        assert_eq!(h.reply(&["GET", key]), b"$-1\r\n");
    }
}

#[test]
fn exists_counts_live_keys_per_occurrence() {
    let h = Harness::new();
    h.reply(&["SET", "a", "1"]);
    assert_eq!(h.reply(&["EXISTS", "a", "missing", "a"]), b":2\r\n");
}

#[test]
fn incr_creates_then_counts() {
    let h = Harness::new();
    assert_eq!(h.reply(&["INCR", "IncrKey1"]), b":1\r\n");
    assert_eq!(h.reply(&["INCR", "IncrKey1"]), b":2\r\n");
    assert_eq!(h.reply(&["DECR", "IncrKey1"]), b":1\r\n");
    assert_eq!(h.reply(&["GET", "IncrKey1"]), b"$1\r\n1\r\n");
}

#[test]
fn decr_creates_negative_counter() {
    let h = Harness::new();
    assert_eq!(h.reply(&["DECR", "DecrKey1"]), b":-1\r\n");
}

#[test]
fn incr_on_non_integer_is_an_error() {
    let h = Harness::new();
    h.reply(&["SET", "IncrKey3", "not_an_int"]);
    assert_eq!(
        h.error(&["INCR", "IncrKey3"]),
        "value is not an integer or out of range"
    );
    // the value is untouched
    assert_eq!(h.reply(&["GET", "IncrKey3"]), b"$10\r\nnot_an_int\r\n");
}

#[test]
fn ttl_sentinels() {
    let h = Harness::new();
    assert_eq!(h.reply(&["TTL", "missing"]), b":-2\r\n");

    h.reply(&["SET", "forever", "v"]);
    assert_eq!(h.reply(&["TTL", "forever"]), b":-1\r\n");
    assert_eq!(h.reply(&["PTTL", "forever"]), b":-1\r\n");

    h.reply(&["SET", "bounded", "v", "EX", "100"]);
    assert_eq!(h.reply(&["TTL", "bounded"]), b":100\r\n");
    assert_eq!(h.reply(&["PTTL", "bounded"]), b":100000\r\n");

    h.clock.advance(40_000);
    assert_eq!(h.reply(&["TTL", "bounded"]), b":60\r\n");
}

#[test]
fn expiretime_sentinels() {
    let h = Harness::new();
    assert_eq!(h.reply(&["EXPIRETIME", "missing"]), b":-2\r\n");
    h.reply(&["SET", "forever", "v"]);
    assert_eq!(h.reply(&["EXPIRETIME", "forever"]), b":-1\r\n");
    assert_eq!(h.reply(&["PEXPIRETIME", "forever"]), b":-1\r\n");
}

#[test]
fn expired_key_reads_as_missing_everywhere() {
    let h = Harness::new();
    h.reply(&["SET", "temp", "v", "PX", "500"]);
    assert_eq!(h.reply(&["GET", "temp"]), b"$1\r\nv\r\n");

    h.clock.advance(501);
    assert_eq!(h.reply(&["GET", "temp"]), b"$-1\r\n");
    assert_eq!(h.reply(&["EXISTS", "temp"]), b":0\r\n");
    assert_eq!(h.reply(&["TTL", "temp"]), b":-2\r\n");
}

#[test]
fn set_without_expiry_option_preserves_existing_expiry() {
    let h = Harness::new();
    h.reply(&["SET", "k", "v1", "EX", "10"]);
    let before = h.reply(&["PEXPIRETIME", "k"]);
    h.reply(&["SET", "k", "v2"]);
    assert_eq!(h.reply(&["PEXPIRETIME", "k"]), before);
    assert_eq!(h.reply(&["GET", "k"]), b"$2\r\nv2\r\n");
}

#[test]
fn persist_clears_expiry_once() {
    let h = Harness::new();
    assert_eq!(h.reply(&["PERSIST", "missing"]), b":0\r\n");

    h.reply(&["SET", "k", "v"]);
    assert_eq!(h.reply(&["PERSIST", "k"]), b":0\r\n");

    h.reply(&["EXPIRE", "k", "100"]);
    assert_eq!(h.reply(&["PERSIST", "k"]), b":1\r\n");
    assert_eq!(h.reply(&["TTL", "k"]), b":-1\r\n");
    // survives past the old deadline
    h.clock.advance(200_000);
    assert_eq!(h.reply(&["GET", "k"]), b"$1\r\nv\r\n");
}

#[test]
fn expire_nx_respects_existing_expiry() {
    let h = Harness::new();
    h.reply(&["SET", "ExpireKey4", "v"]);
    h.reply(&["EXPIRE", "ExpireKey4", "100"]);
    let before = h.reply(&["PEXPIRETIME", "ExpireKey4"]);

    assert_eq!(h.reply(&["EXPIRE", "ExpireKey4", "1000", "NX"]), b":0\r\n");
    // the original expiry is unchanged
    assert_eq!(h.reply(&["PEXPIRETIME", "ExpireKey4"]), before);
}

#[test]
fn expire_xx_requires_existing_expiry() {
    let h = Harness::new();
    h.reply(&["SET", "k", "v"]);
    assert_eq!(h.reply(&["EXPIRE", "k", "100", "XX"]), b":0\r\n");
    assert_eq!(h.reply(&["TTL", "k"]), b":-1\r\n");

    h.reply(&["EXPIRE", "k", "100"]);
    assert_eq!(h.reply(&["EXPIRE", "k", "200", "XX"]), b":1\r\n");
    assert_eq!(h.reply(&["TTL", "k"]), b":200\r\n");
}

#[test]
fn expire_gt_only_extends() {
    let h = Harness::new();
    h.reply(&["SET", "k", "v"]);
    // no current expiry counts as "not greater"
    assert_eq!(h.reply(&["EXPIRE", "k", "100", "GT"]), b":0\r\n");

    h.reply(&["EXPIRE", "k", "100"]);
    assert_eq!(h.reply(&["EXPIRE", "k", "50", "GT"]), b":0\r\n");
    assert_eq!(h.reply(&["TTL", "k"]), b":100\r\n");
    assert_eq!(h.reply(&["EXPIRE", "k", "300", "GT"]), b":1\r\n");
    assert_eq!(h.reply(&["TTL", "k"]), b":300\r\n");
}

#[test]
fn expire_lt_only_shortens_and_accepts_missing_expiry() {
    let h = Harness::new();
    h.reply(&["SET", "k", "v"]);
    // no current expiry: LT applies
    assert_eq!(h.reply(&["EXPIRE", "k", "100", "LT"]), b":1\r\n");
    assert_eq!(h.reply(&["EXPIRE", "k", "300", "LT"]), b":0\r\n");
    assert_eq!(h.reply(&["TTL", "k"]), b":100\r\n");
    assert_eq!(h.reply(&["EXPIRE", "k", "10", "LT"]), b":1\r\n");
    assert_eq!(h.reply(&["TTL", "k"]), b":10\r\n");
}

#[test]
fn expireat_family_uses_absolute_times() {
    let h = Harness::new();
    h.reply(&["SET", "k", "v"]);
    let at_secs = START_MS / 1000 + 250;
    assert_eq!(
        h.reply(&["EXPIREAT", "k", &at_secs.to_string()]),
        b":1\r\n"
    );
    assert_eq!(h.reply(&["TTL", "k"]), b":250\r\n");

    let at_ms = START_MS + 90_000;
    assert_eq!(
        h.reply(&["PEXPIREAT", "k", &at_ms.to_string(), "LT"]),
        b":1\r\n"
    );
    assert_eq!(h.reply(&["PTTL", "k"]), b":90000\r\n");
}

#[test]
fn expire_on_missing_key_is_zero() {
    let h = Harness::new();
    assert_eq!(h.reply(&["EXPIRE", "ghost", "100"]), b":0\r\n");
}

#[test]
fn pexpire_uses_milliseconds() {
    let h = Harness::new();
    h.reply(&["SET", "k", "v"]);
    assert_eq!(h.reply(&["PEXPIRE", "k", "1500"]), b":1\r\n");
    assert_eq!(h.reply(&["PTTL", "k"]), b":1500\r\n");
    assert_eq!(h.reply(&["TTL", "k"]), b":1\r\n");
}

#[test]
fn ping_and_echo() {
    let h = Harness::new();
    assert_eq!(h.reply(&["PING"]), b"+PONG\r\n");
    assert_eq!(h.reply(&["PING", "hello"]), b"$5\r\nhello\r\n");
    assert_eq!(h.reply(&["ECHO", "hello"]), b"$5\r\nhello\r\n");
}

#[test]
fn max_memory_noeviction_rejects_writes_keeps_reads() {
    let clock = Arc::new(ManualClock::new(START_MS));
    let engine = Engine::builder("scenario-test")
        .clock(clock)
        .keyspace_config(KeyspaceConfig {
            max_memory: Some(100),
            eviction_policy: EvictionPolicy::NoEviction,
            ..KeyspaceConfig::default()
        })
        .synchronous_cache_updates()
        .build();
    let session = engine.session("conn-1");
    let run = |tokens: &[&str]| {
        let raw = encode_command(&tokens.iter().map(|t| t.to_string()).collect::<Vec<_>>());
        engine.handle_command(&session, &raw, None, false, false)
    };

    // the first write fits under the limit; the second finds usage at
    // or above it and is refused
    assert_eq!(run(&["SET", "first", "value"]).unwrap(), b"+OK\r\n");
    let err = run(&["SET", "second", "value"]).unwrap_err();
    assert_eq!(err.to_string(), "max memory reached, key value not set");
    // existing values remain readable
    assert_eq!(run(&["GET", "first"]).unwrap(), b"$5\r\nvalue\r\n");
}

#[test]
fn unknown_command_reports_keyword() {
    let h = Harness::new();
    assert_eq!(h.error(&["FROB", "x"]), "command FROB not supported");
}

#[test]
fn command_keywords_are_case_insensitive() {
    let h = Harness::new();
    assert_eq!(h.reply(&["set", "k", "v"]), b"+OK\r\n");
    assert_eq!(h.reply(&["GeT", "k"]), b"$1\r\nv\r\n");
}
