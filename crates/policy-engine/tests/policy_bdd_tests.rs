use aegis_core::memstore::InMemoryStore;
use aegis_core::model::{Effect, Function, Permission, Policy, Reason, RequestContext, RolePolicy, Service};
use aegis_core::store::Store;
use aegis_core::value::Value;
use cucumber::{given, then, when, World};
use policy_engine::engine::{AegisEngine, EngineConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(World)]
#[world(init = Self::new)]
struct PolicyWorld {
    store: Arc<dyn Store>,
    engine: Option<Arc<AegisEngine>>,
    decisions: Vec<(bool, Reason)>,
    granted_roles: Vec<String>,
    mock_server: Option<MockServer>,
    mock_hits: Arc<AtomicUsize>,
}

impl std::fmt::Debug for PolicyWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyWorld")
            .field("decisions", &self.decisions)
            .field("granted_roles", &self.granted_roles)
            .finish()
    }
}

impl PolicyWorld {
    fn new() -> Self {
        Self {
            store: Arc::new(InMemoryStore::new()),
            engine: None,
            decisions: Vec::new(),
            granted_roles: Vec::new(),
            mock_server: None,
            mock_hits: Arc::new(AtomicUsize::new(0)),
        }
    }

    async fn ensure_service(&self, name: &str) {
        if self.store.get_service(name).await.is_err() {
            self.store
                .create_service(Service {
                    name: name.to_string(),
                    r#type: "app".into(),
                    policies: vec![],
                    role_policies: vec![],
                    metadata: HashMap::new(),
                })
                .await
                .unwrap();
        }
    }

    /// The engine is built lazily, once every `Given` step has finished
    /// populating the store, so the first snapshot already reflects the
    /// whole scenario's setup instead of racing the reactor's event stream.
    async fn engine(&mut self) -> Arc<AegisEngine> {
        if self.engine.is_none() {
            let engine = AegisEngine::new(self.store.clone(), EngineConfig::default())
                .await
                .unwrap();
            self.engine = Some(engine);
        }
        self.engine.as_ref().unwrap().clone()
    }
}

fn reason_from_str(s: &str) -> Reason {
    match s {
        "GRANT_POLICY_FOUND" => Reason::GrantPolicyFound,
        "DENY_POLICY_FOUND" => Reason::DenyPolicyFound,
        "NO_APPLICABLE_POLICY" => Reason::NoApplicablePolicy,
        other => panic!("unrecognized reason tag '{other}'"),
    }
}

fn ctx(subjects: &str, service: &str, resource: &str, action: &str, attributes: HashMap<String, Value>) -> RequestContext {
    RequestContext {
        subject: subjects.split(',').map(|s| s.trim().to_string()).collect(),
        service_name: service.to_string(),
        resource: resource.to_string(),
        action: action.to_string(),
        attributes,
    }
}

#[given(regex = r#"^a service "([^"]+)" with a grant policy allowing "([^"]+)" to perform "([^"]+)" on "([^"]+)"$"#)]
async fn given_service_with_grant(world: &mut PolicyWorld, service: String, principal: String, action: String, resource: String) {
    world.ensure_service(&service).await;
    world
        .store
        .create_policy(
            &service,
            Policy {
                id: uuid::Uuid::new_v4().to_string(),
                name: None,
                effect: Effect::Grant,
                permissions: vec![Permission {
                    resource: Some(resource),
                    resource_expression: None,
                    actions: vec![action],
                }],
                principals: vec![vec![principal]],
                condition: None,
                metadata: HashMap::new(),
            },
        )
        .await
        .unwrap();
}

#[given(regex = r#"^a service "([^"]+)" with a grant policy allowing "([^"]+)" to perform "([^"]+)" on resource expression "([^"]+)"$"#)]
async fn given_service_with_grant_resource_expression(
    world: &mut PolicyWorld,
    service: String,
    principal: String,
    action: String,
    resource_expression: String,
) {
    world.ensure_service(&service).await;
    world
        .store
        .create_policy(
            &service,
            Policy {
                id: uuid::Uuid::new_v4().to_string(),
                name: None,
                effect: Effect::Grant,
                permissions: vec![Permission {
                    resource: None,
                    resource_expression: Some(resource_expression),
                    actions: vec![action],
                }],
                principals: vec![vec![principal]],
                condition: None,
                metadata: HashMap::new(),
            },
        )
        .await
        .unwrap();
}

#[given(regex = r#"^a deny policy in service "([^"]+)" denying "([^"]+)" from performing "([^"]+)" on "([^"]+)"$"#)]
async fn given_deny_policy(world: &mut PolicyWorld, service: String, principal: String, action: String, resource: String) {
    world.ensure_service(&service).await;
    world
        .store
        .create_policy(
            &service,
            Policy {
                id: uuid::Uuid::new_v4().to_string(),
                name: None,
                effect: Effect::Deny,
                permissions: vec![Permission {
                    resource: Some(resource),
                    resource_expression: None,
                    actions: vec![action],
                }],
                principals: vec![vec![principal]],
                condition: None,
                metadata: HashMap::new(),
            },
        )
        .await
        .unwrap();
}

#[given(regex = r#"^a grant policy in service "([^"]+)" allowing "([^"]+)" to perform "([^"]+)" on "([^"]+)" when "([^"]*)"$"#)]
async fn given_conditional_grant(
    world: &mut PolicyWorld,
    service: String,
    principal: String,
    action: String,
    resource: String,
    condition: String,
) {
    world.ensure_service(&service).await;
    world
        .store
        .create_policy(
            &service,
            Policy {
                id: uuid::Uuid::new_v4().to_string(),
                name: None,
                effect: Effect::Grant,
                permissions: vec![Permission {
                    resource: Some(resource),
                    resource_expression: None,
                    actions: vec![action],
                }],
                principals: vec![vec![principal]],
                condition: Some(condition),
                metadata: HashMap::new(),
            },
        )
        .await
        .unwrap();
}

#[given(regex = r#"^a mock extension function "([^"]+)" in service "([^"]+)" that sums its params, cacheable for (\d+) seconds$"#)]
async fn given_mock_extension_function(world: &mut PolicyWorld, name: String, service: String, ttl: i64) {
    world.ensure_service(&service).await;
    let server = MockServer::start().await;
    let hits = world.mock_hits.clone();
    Mock::given(method("POST"))
        .respond_with(move |_: &wiremock::Request| {
            hits.fetch_add(1, Ordering::SeqCst);
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"result": 3.0}))
        })
        .mount(&server)
        .await;

    world
        .store
        .create_function(Function {
            name: name.clone(),
            description: None,
            func_url: format!("{}/funcs/{name}", server.uri()),
            local_func_url: None,
            ca: None,
            result_cachable: true,
            result_ttl: ttl,
            metadata: HashMap::new(),
        })
        .await
        .unwrap();
    world.mock_server = Some(server);
}

#[given(regex = r#"^a role policy in service "([^"]+)" granting role "([^"]+)" to "([^"]+)"$"#)]
async fn given_role_policy(world: &mut PolicyWorld, service: String, role: String, principal: String) {
    world.ensure_service(&service).await;
    world
        .store
        .create_role_policy(
            &service,
            RolePolicy {
                id: uuid::Uuid::new_v4().to_string(),
                name: None,
                effect: Effect::Grant,
                roles: vec![role],
                principals: vec![principal],
                resources: vec![],
                resource_expressions: vec![],
                condition: None,
                metadata: HashMap::new(),
            },
        )
        .await
        .unwrap();
}

#[when(regex = r#"^"([^"]+)" requests "([^"]+)" on "([^"]+)" in service "([^"]+)"$"#)]
async fn when_requests(world: &mut PolicyWorld, subjects: String, action: String, resource: String, service: String) {
    let engine = world.engine().await;
    let request = ctx(&subjects, &service, &resource, &action, HashMap::new());
    let decision = engine.is_allowed(&request, Duration::from_secs(5)).await.unwrap();
    world.decisions = vec![decision];
}

#[when(
    regex = r#"^"([^"]+)" requests "([^"]+)" on "([^"]+)" in service "([^"]+)" with attribute "([^"]+)" set to (\d+)$"#
)]
async fn when_requests_with_int_attribute(
    world: &mut PolicyWorld,
    subjects: String,
    action: String,
    resource: String,
    service: String,
    attr_name: String,
    attr_value: i64,
) {
    let engine = world.engine().await;
    let mut attrs = HashMap::new();
    attrs.insert(attr_name, Value::Float(attr_value as f64));
    let request = ctx(&subjects, &service, &resource, &action, attrs);
    let decision = engine.is_allowed(&request, Duration::from_secs(5)).await.unwrap();
    world.decisions = vec![decision];
}

#[when(
    regex = r#"^"([^"]+)" requests "([^"]+)" on "([^"]+)" in service "([^"]+)" with attribute "([^"]+)" set to the tuple "([^"]+)","([^"]+)"$"#
)]
async fn when_requests_with_tuple_attribute(
    world: &mut PolicyWorld,
    subjects: String,
    action: String,
    resource: String,
    service: String,
    attr_name: String,
    a: String,
    b: String,
) {
    let engine = world.engine().await;
    let mut attrs = HashMap::new();
    attrs.insert(attr_name, Value::Tuple(vec![Value::Str(a), Value::Str(b)]));
    let request = ctx(&subjects, &service, &resource, &action, attrs);
    let decision = engine.is_allowed(&request, Duration::from_secs(5)).await.unwrap();
    world.decisions = vec![decision];
}

#[when(regex = r#"^"([^"]+)" requests "([^"]+)" on "([^"]+)" in service "([^"]+)" (\d+) times concurrently$"#)]
async fn when_requests_concurrently(
    world: &mut PolicyWorld,
    subjects: String,
    action: String,
    resource: String,
    service: String,
    count: usize,
) {
    let engine = world.engine().await;
    let mut handles = Vec::new();
    for _ in 0..count {
        let engine = engine.clone();
        let request = ctx(&subjects, &service, &resource, &action, HashMap::new());
        handles.push(tokio::spawn(
            async move { engine.is_allowed(&request, Duration::from_secs(5)).await.unwrap() },
        ));
    }
    let mut decisions = Vec::new();
    for h in handles {
        decisions.push(h.await.unwrap());
    }
    world.decisions = decisions;
}

#[when(regex = r#"^I resolve granted roles for "([^"]+)" in service "([^"]+)"$"#)]
async fn when_resolve_granted_roles(world: &mut PolicyWorld, subject: String, service: String) {
    let engine = world.engine().await;
    let request = ctx(&subject, &service, "/node1", "get", HashMap::new());
    world.granted_roles = engine
        .get_all_granted_roles(&request, Duration::from_secs(5))
        .await
        .unwrap();
}

#[then(regex = r#"^the decision is (allowed|denied) with reason "([^"]+)"$"#)]
async fn then_decision_is(world: &mut PolicyWorld, allowed: String, reason: String) {
    let (actual_allowed, actual_reason) = world.decisions.last().expect("no decision recorded yet");
    assert_eq!(*actual_allowed, allowed == "allowed");
    assert_eq!(*actual_reason, reason_from_str(&reason));
}

#[then(regex = r#"^every decision is allowed with reason "([^"]+)"$"#)]
async fn then_every_decision_is_allowed(world: &mut PolicyWorld, reason: String) {
    assert!(!world.decisions.is_empty());
    for (allowed, actual_reason) in &world.decisions {
        assert!(*allowed);
        assert_eq!(*actual_reason, reason_from_str(&reason));
    }
}

#[then(regex = r#"^the mock extension function received exactly (\d+) call$"#)]
async fn then_mock_received_exactly(world: &mut PolicyWorld, count: usize) {
    assert_eq!(world.mock_hits.load(Ordering::SeqCst), count);
}

#[then(regex = r#"^the granted roles include "([^"]+)" and "([^"]+)"$"#)]
async fn then_granted_roles_include(world: &mut PolicyWorld, role_a: String, role_b: String) {
    assert!(world.granted_roles.contains(&role_a));
    assert!(world.granted_roles.contains(&role_b));
}

#[tokio::main]
async fn main() {
    PolicyWorld::run("tests/features").await;
}
