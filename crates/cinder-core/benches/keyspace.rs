//! Keyspace hot-path benchmarks.
//!
//! Measures raw store operations and the full dispatch path, with and
//! without an eviction cache in play.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cinder_core::{
    Engine, EvictionPolicy, Keyspace, KeyspaceConfig, SessionContext, SystemClock, Value,
};
use cinder_protocol::encode_command;

fn bench_store_ops(c: &mut Criterion) {
    let ctx = SessionContext::new("bench", "conn");

    c.bench_function("store/set", |b| {
        let ks = Keyspace::new(KeyspaceConfig::default(), Arc::new(SystemClock));
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 10_000);
            i += 1;
            ks.set_values(&ctx, vec![(key, Value::from("payload"))]).unwrap();
        });
    });

    c.bench_function("store/get_hit", |b| {
        let ks = Keyspace::new(KeyspaceConfig::default(), Arc::new(SystemClock));
        for i in 0..10_000 {
            ks.set_values(&ctx, vec![(format!("key:{i}"), Value::from("payload"))])
                .unwrap();
        }
        let keys = vec!["key:5000".to_string()];
        b.iter(|| black_box(ks.get_values(&ctx, &keys)));
    });

    c.bench_function("store/get_with_lru_cache", |b| {
        let config = KeyspaceConfig {
            max_memory: Some(1 << 30),
            eviction_policy: EvictionPolicy::AllKeysLru,
            ..KeyspaceConfig::default()
        };
        let ks = Keyspace::new(config, Arc::new(SystemClock));
        for i in 0..10_000 {
            ks.set_values(&ctx, vec![(format!("key:{i}"), Value::from("payload"))])
                .unwrap();
        }
        let keys = vec!["key:5000".to_string()];
        b.iter(|| black_box(ks.get_values(&ctx, &keys)));
    });
}

fn bench_dispatch(c: &mut Criterion) {
    let engine = Engine::builder("bench").build();
    let session = engine.session("conn");

    let set = encode_command(&[
        "SET".to_string(),
        "bench-key".to_string(),
        "bench-value".to_string(),
    ]);
    let get = encode_command(&["GET".to_string(), "bench-key".to_string()]);

    c.bench_function("dispatch/set", |b| {
        b.iter(|| {
            engine
                .handle_command(&session, black_box(&set), None, false, false)
                .unwrap()
        });
    });

    c.bench_function("dispatch/get", |b| {
        b.iter(|| {
            engine
                .handle_command(&session, black_box(&get), None, false, false)
                .unwrap()
        });
    });
}

criterion_group!(benches, bench_store_ops, bench_dispatch);
criterion_main!(benches);
