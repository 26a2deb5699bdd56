//! Performance benchmarks for snapshot fan-out.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use collab_bus::{BusConfig, CollabBus, EntityId, MemoryStore, OrderingPolicy, UserId};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn create_bus(ordering: OrderingPolicy) -> CollabBus {
    let config = BusConfig {
        ordering,
        ..Default::default()
    };
    CollabBus::new(Arc::new(MemoryStore::new()), config).unwrap()
}

/// Benchmark one comment post delivered to many subscribers of one topic
fn bench_comment_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("comment_fanout");

    for subscribers in [1, 10, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::new("subscribers", subscribers),
            &subscribers,
            |b, &count| {
                let bus = create_bus(OrderingPolicy::Timestamp);
                let entity = EntityId::from("E1");
                let user = UserId::from("U1");
                let delivered = Arc::new(AtomicUsize::new(0));

                let _subs: Vec<_> = (0..count)
                    .map(|_| {
                        let delivered = Arc::clone(&delivered);
                        bus.comments()
                            .subscribe(&entity, move |comments| {
                                delivered.fetch_add(comments.len(), Ordering::Relaxed);
                            })
                            .unwrap()
                    })
                    .collect();

                b.iter(|| {
                    bus.comments()
                        .post(black_box(&entity), &user, "benchmark comment")
                        .unwrap()
                });
            },
        );
    }

    group.finish();
}

/// Benchmark decode-and-sort cost as a stream grows
fn bench_stream_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_read");

    for ordering in [OrderingPolicy::Timestamp, OrderingPolicy::Sequence] {
        for size in [100, 1000] {
            group.bench_with_input(
                BenchmarkId::new(format!("{ordering:?}"), size),
                &size,
                |b, &size| {
                    let bus = create_bus(ordering);
                    let entity = EntityId::from("E1");
                    let user = UserId::from("U1");
                    for i in 0..size {
                        bus.comments()
                            .post(&entity, &user, &format!("comment {i}"))
                            .unwrap();
                    }

                    b.iter(|| black_box(bus.comments().read(&entity).unwrap()));
                },
            );
        }
    }

    group.finish();
}

/// Benchmark opening and cancelling subscriptions on a shared topic
fn bench_subscribe_cancel(c: &mut Criterion) {
    let bus = create_bus(OrderingPolicy::Timestamp);
    let entity = EntityId::from("E1");
    let _anchor = bus.presence().subscribe(&entity, |_| {}).unwrap();
    bus.presence().join(&entity, &UserId::from("U1")).unwrap();

    c.bench_function("subscribe_cancel_shared_topic", |b| {
        b.iter(|| {
            let sub = bus.presence().subscribe(&entity, |_| {}).unwrap();
            sub.cancel();
        })
    });
}

/// Benchmark event emission with a type-filtered subscriber
fn bench_event_emit(c: &mut Criterion) {
    let bus = create_bus(OrderingPolicy::Timestamp);
    let entity = EntityId::from("E1");
    let _sub = bus
        .events()
        .subscribe(&entity, "cursor_moved", |events| {
            black_box(events.len());
        })
        .unwrap();

    c.bench_function("event_emit_filtered", |b| {
        b.iter(|| {
            bus.events()
                .emit(&entity, "cursor_moved", json!({"x": 1, "y": 2}))
                .unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_comment_fanout,
    bench_stream_read,
    bench_subscribe_cancel,
    bench_event_emit
);
criterion_main!(benches);
