//! Benchmarks counter recording under concurrent writers, since
//! `decisions_by_reason` is a `DashMap` shared across request-handling tasks.

use aegis_core::model::Reason;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use metrics::AegisMetrics;
use std::sync::Arc;
use std::thread;

fn benchmark_record_decision(c: &mut Criterion) {
    let metrics = AegisMetrics::new();
    c.bench_function("record_decision_single_thread", |b| {
        b.iter(|| {
            metrics.record_decision(black_box(true), black_box(Reason::GrantPolicyFound));
        });
    });
}

fn benchmark_record_decision_concurrent(c: &mut Criterion) {
    c.bench_function("record_decision_8_threads", |b| {
        b.iter(|| {
            let metrics = Arc::new(AegisMetrics::new());
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let metrics = Arc::clone(&metrics);
                    thread::spawn(move || {
                        let reason = if i % 2 == 0 {
                            Reason::GrantPolicyFound
                        } else {
                            Reason::DenyPolicyFound
                        };
                        for _ in 0..1000 {
                            metrics.record_decision(i % 2 == 0, reason);
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
            black_box(metrics.snapshot());
        });
    });
}

criterion_group!(
    benches,
    benchmark_record_decision,
    benchmark_record_decision_concurrent
);
criterion_main!(benches);
