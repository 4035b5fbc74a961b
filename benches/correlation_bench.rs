//! Benchmarks for request tracking and response matching
//!
//! Run with: cargo bench

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use peer_correlation::config::CorrelationConfig;
use peer_correlation::correlation::{CorrelationId, CorrelationManager, PendingRequest};

fn manager() -> CorrelationManager {
    // Built outside a runtime: the sweeper runs on its own thread
    CorrelationManager::new("bench", &CorrelationConfig::default())
}

fn bench_add_and_match(c: &mut Criterion) {
    let manager = manager();

    c.bench_function("add_then_match", |b| {
        b.iter(|| {
            let record = PendingRequest::new("peer-1", Bytes::from_static(b"PingRequest"));
            let id = record.correlation_id;
            manager.add_pending_request(record);
            black_box(manager.try_match_response(id))
        })
    });
}

fn bench_match_in_full_cache(c: &mut Criterion) {
    let manager = manager();
    for i in 0..10_000 {
        manager.add_pending_request(PendingRequest::new(
            format!("peer-{}", i % 50),
            Bytes::new(),
        ));
    }

    c.bench_function("miss_with_10k_pending", |b| {
        b.iter(|| black_box(manager.try_match_response(CorrelationId::generate())))
    });

    c.bench_function("remove_with_10k_pending", |b| {
        b.iter_batched(
            || {
                let record = PendingRequest::new("peer-x", Bytes::new());
                let id = record.correlation_id;
                manager.add_pending_request(record);
                id
            },
            |id| black_box(manager.remove(id)),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_add_and_match, bench_match_in_full_cache);
criterion_main!(benches);
