use aegis_core::memstore::InMemoryStore;
use aegis_core::model::{Effect, Permission, Policy, Service};
use aegis_core::store::Store;
use cucumber::{given, then, when, World};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(World)]
#[world(init = Self::new)]
struct PlatformWorld {
    store: Arc<dyn Store>,
    last_count: Option<i64>,
    last_error: bool,
}

impl std::fmt::Debug for PlatformWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformWorld").finish()
    }
}

impl PlatformWorld {
    fn new() -> Self {
        Self {
            store: Arc::new(InMemoryStore::new()),
            last_count: None,
            last_error: false,
        }
    }
}

#[given(regex = r"^an empty service (\S+)$")]
async fn given_empty_service(world: &mut PlatformWorld, name: String) {
    world
        .store
        .create_service(Service {
            name,
            r#type: "app".into(),
            policies: vec![],
            role_policies: vec![],
            metadata: HashMap::new(),
        })
        .await
        .unwrap();
}

#[when(regex = r"^(\d+) policies are created in service (\S+)$")]
async fn when_policies_created(world: &mut PlatformWorld, count: usize, service: String) {
    for i in 0..count {
        world
            .store
            .create_policy(
                &service,
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
                },
            )
            .await
            .unwrap();
    }
}

#[when(regex = r"^the policy count for service (\S+) is requested$")]
async fn when_policy_count_requested(world: &mut PlatformWorld, service: String) {
    let count = world.store.count_policies_and_role_policies(&service).await.unwrap();
    world.last_count = Some(count.policy_count);
}

#[when(regex = r"^all policies in service (\S+) are deleted$")]
async fn when_all_policies_deleted(world: &mut PlatformWorld, service: String) {
    world.store.delete_policies(&service).await.unwrap();
}

#[when(regex = r"^service (\S+) is deleted twice$")]
async fn when_service_deleted_twice(world: &mut PlatformWorld, name: String) {
    world.store.delete_service(&name).await.unwrap();
    world.last_error = world.store.delete_service(&name).await.is_err();
}

#[then(regex = r"^the policy count for service (\S+) is (\d+)$")]
async fn then_policy_count_is(world: &mut PlatformWorld, _service: String, expected: i64) {
    assert_eq!(world.last_count, Some(expected));
}

#[then("the second deletion fails with a not-found error")]
async fn then_second_deletion_fails(world: &mut PlatformWorld) {
    assert!(world.last_error);
}

#[tokio::main]
async fn main() {
    PlatformWorld::run("tests/features").await;
}
