//! Benchmarks the JSON (de)serialization the CLI does when reading a
//! policy definition file before POSTing it to store-service.

use aegis_core::model::{Effect, Permission, Policy};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::HashMap;

fn sample_policy_json() -> String {
    let policy = Policy {
        id: "p1".into(),
        name: Some("allow-get".into()),
        effect: Effect::Grant,
        permissions: vec![Permission {
            resource: Some("/node1".into()),
            resource_expression: None,
            actions: vec!["get".into(), "list".into()],
        }],
        principals: vec![vec!["user:alice".into()], vec!["role:admin".into()]],
        condition: Some("subject.department == 'eng'".into()),
        metadata: HashMap::new(),
    };
    serde_json::to_string(&policy).unwrap()
}

fn benchmark_parse_policy_file(c: &mut Criterion) {
    let json = sample_policy_json();
    c.bench_function("cli_parse_policy_json", |b| {
        b.iter(|| {
            let policy: Policy = serde_json::from_str(black_box(&json)).unwrap();
            black_box(policy);
        });
    });
}

criterion_group!(benches, benchmark_parse_policy_file);
criterion_main!(benches);
