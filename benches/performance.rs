//! Performance benchmarks for fanout and publishing.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tailcast::{
    CappedOptions, Channel, ChannelConfig, EventSource, Fanout, LogStore, MemoryStore, Payload,
    Position, Readiness, Record, RecordInput, Timestamp, Topic, WriteConcern,
};

fn sample_record(n: u64) -> Record {
    Record {
        position: Position(n),
        event: Some("tick".to_string()),
        payload: Payload::json(&json!({"n": n, "text": "benchmark payload"})).unwrap(),
        timestamp: Timestamp::now(),
    }
}

/// Benchmark dispatching one record to a growing number of callbacks
fn bench_fanout_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout_dispatch");

    for subscribers in [1, 10, 100] {
        group.bench_with_input(
            BenchmarkId::new("subscribers", subscribers),
            &subscribers,
            |b, &count| {
                let fanout = Arc::new(Fanout::new());
                let hits = Arc::new(AtomicU64::new(0));
                let _subs: Vec<_> = (0..count)
                    .map(|_| {
                        let hits = Arc::clone(&hits);
                        fanout.on(Topic::event("tick"), move |_| {
                            hits.fetch_add(1, Ordering::Relaxed);
                        })
                    })
                    .collect();

                let record = sample_record(1);
                b.iter(|| fanout.dispatch(black_box(&record)));
            },
        );
    }

    group.finish();
}

/// Benchmark raw appends against the in-memory store
fn bench_store_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_append");

    for concern in [WriteConcern::Unacknowledged, WriteConcern::Acknowledged] {
        group.bench_with_input(
            BenchmarkId::new("concern", format!("{:?}", concern)),
            &concern,
            |b, &concern| {
                let store = MemoryStore::new();
                let options = CappedOptions {
                    max_records: Some(10_000),
                    ..Default::default()
                };
                let handle = store.create_or_open("bench", &options).unwrap();
                let input = RecordInput::json("tick", &json!({"n": 1})).unwrap();

                b.iter(|| {
                    black_box(store.append(&handle, input.clone(), concern).unwrap());
                });
            },
        );
    }

    group.finish();
}

/// Benchmark confirmed publishes through a live channel
fn bench_channel_publish(c: &mut Criterion) {
    let store = Arc::new(MemoryStore::new());
    let config = ChannelConfig::new("bench-publish")
        .with_capped(CappedOptions {
            max_records: Some(10_000),
            ..Default::default()
        })
        .with_max_wait(Duration::from_secs(60));
    let channel = Channel::open(Arc::clone(&store) as Arc<dyn LogStore>, config).unwrap();
    channel
        .wait_ready(Duration::from_secs(5))
        .unwrap()
        .unwrap();
    let _messages = channel.subscribe_messages(|payload| {
        black_box(payload.len());
    });

    c.bench_function("channel_publish_confirmed", |b| {
        b.iter(|| {
            let (tx, rx) = crossbeam_channel::bounded(1);
            channel.publish_with("tick", Payload::raw(b"{\"n\":1}".to_vec()), move |result| {
                let _ = tx.send(result.is_ok());
            });
            black_box(rx.recv().unwrap());
        });
    });
}

criterion_group!(
    benches,
    bench_fanout_dispatch,
    bench_store_append,
    bench_channel_publish
);
criterion_main!(benches);
