//! Benchmarks for the core domain primitives.

use aegis_core::glob;
use aegis_core::model::{dnf_matches, Permission};
use aegis_core::principal::Principal;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn benchmark_glob_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("glob_matching");
    for pattern in ["/svc/*", "*/nodes/*/items", "/exact/literal/path"].iter() {
        group.bench_with_input(BenchmarkId::new("matches", pattern), pattern, |b, &pattern| {
            b.iter(|| black_box(glob::matches(pattern, "/svc/nodes/42/items")));
        });
    }
    group.finish();
}

fn benchmark_principal_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("principal_parsing");
    for raw in ["user:alice", "role:admin", "bare-name"].iter() {
        group.bench_with_input(BenchmarkId::new("parse", raw), raw, |b, &raw| {
            b.iter(|| black_box(Principal::parse(raw)));
        });
    }
    group.finish();
}

fn benchmark_dnf_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("dnf_matching");
    for size in [1, 10, 100].iter() {
        let dnf: Vec<Vec<String>> = (0..*size)
            .map(|i| vec![format!("user:u{i}"), "group:admins".to_string()])
            .collect();
        let held = vec!["user:u0".to_string(), "group:admins".to_string()];
        group.bench_with_input(BenchmarkId::new("dnf_matches", size), size, |b, _| {
            b.iter(|| black_box(dnf_matches(&dnf, &held)));
        });
    }
    group.finish();
}

fn benchmark_permission_matching(c: &mut Criterion) {
    let perm = Permission {
        resource: None,
        resource_expression: Some("/svc/*".to_string()),
        actions: vec!["get".to_string(), "put".to_string()],
    };
    c.bench_function("permission_matches", |b| {
        b.iter(|| black_box(perm.matches("/svc/node1", "get")));
    });
}

criterion_group!(
    benches,
    benchmark_glob_matching,
    benchmark_principal_parsing,
    benchmark_dnf_matching,
    benchmark_permission_matching
);
criterion_main!(benches);
