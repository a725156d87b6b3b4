//! Benchmarks the store-service's CRUD surface against `InMemoryStore`,
//! the backend it runs against today.

use aegis_core::memstore::InMemoryStore;
use aegis_core::model::{Effect, Permission, Policy, Service};
use aegis_core::store::Store;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::HashMap;

fn policy(i: usize) -> Policy {
    Policy {
        id: format!("p{i}"),
        name: None,
        effect: Effect::Grant,
        permissions: vec![Permission {
            resource: Some(format!("/node{i}")),
            resource_expression: None,
            actions: vec!["get".into()],
        }],
        principals: vec![vec![format!("user:u{i}")]],
        condition: None,
        metadata: HashMap::new(),
    }
}

fn benchmark_create_and_list_policies(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryStore::new();
    rt.block_on(async {
        store
            .create_service(Service {
                name: "crm".into(),
                r#type: "app".into(),
                policies: vec![],
                role_policies: vec![],
                metadata: HashMap::new(),
            })
            .await
            .unwrap();
    });

    c.bench_function("store_service_create_policy", |b| {
        let mut i = 0usize;
        b.iter(|| {
            rt.block_on(async {
                i += 1;
                black_box(store.create_policy("crm", policy(i)).await.unwrap());
            });
        });
    });

    c.bench_function("store_service_list_policies", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(store.list_all_policies("crm", None).await.unwrap());
            });
        });
    });
}

criterion_group!(benches, benchmark_create_and_list_policies);
criterion_main!(benches);
