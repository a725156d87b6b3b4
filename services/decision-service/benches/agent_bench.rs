//! Benchmarks the decision service's hot path end to end: an `AegisEngine`
//! backed by an in-memory store, exercised the way `evaluate_decision`
//! exercises it, without going through an actual HTTP listener.

use aegis_core::memstore::InMemoryStore;
use aegis_core::model::{Effect, Permission, Policy, RequestContext, Service};
use aegis_core::store::Store;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use policy_engine::{AegisEngine, EngineConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn build_engine(rt: &tokio::runtime::Runtime) -> Arc<AegisEngine> {
    rt.block_on(async {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        store
            .create_service(Service {
                name: "crm".into(),
                r#type: "app".into(),
                policies: vec![Policy {
                    id: "p1".into(),
                    name: None,
                    effect: Effect::Grant,
                    permissions: vec![Permission {
                        resource: Some("/node1".into()),
                        resource_expression: None,
                        actions: vec!["get".into()],
                    }],
                    principals: vec![vec!["user:alice".into()]],
                    condition: None,
                    metadata: HashMap::new(),
                }],
                role_policies: vec![],
                metadata: HashMap::new(),
            })
            .await
            .unwrap();
        AegisEngine::new(store, EngineConfig::default()).await.unwrap()
    })
}

fn benchmark_is_allowed_through_engine(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let engine = build_engine(&rt);
    let ctx = RequestContext {
        subject: vec!["user:alice".into()],
        service_name: "crm".into(),
        resource: "/node1".into(),
        action: "get".into(),
        attributes: HashMap::new(),
    };

    c.bench_function("decision_service_is_allowed", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(engine.is_allowed(&ctx, Duration::from_millis(500)).await.unwrap())
            });
        });
    });
}

criterion_group!(benches, benchmark_is_allowed_through_engine);
criterion_main!(benches);
