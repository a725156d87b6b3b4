//! A simple in-memory `Store` implementation.
//!
//! This is the one concrete backend shipped in this workspace: sufficient
//! to exercise the reactor and the demo HTTP services. Durable backends
//! (file, document database, embedded key-value) are out of scope per the
//! spec; only the `Store` contract above matters to the Core.

use crate::error::{AegisError, Result};
use crate::filter::Filter;
use crate::model::{
    EventContent, EventType, Function, Policy, PolicyStore, RequestContext, RolePolicy,
    ServiceScoped, Service,
};
use crate::store::{DiscoverRequestManager, Store};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

pub struct InMemoryStore {
    services: DashMap<String, Service>,
    functions: DashMap<String, Function>,
    event_id: AtomicI64,
    subscribers: Mutex<Vec<mpsc::Sender<crate::model::StoreChangeEvent>>>,
    discover: Mutex<Vec<RequestContext>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
            functions: DashMap::new(),
            event_id: AtomicI64::new(0),
            subscribers: Mutex::new(Vec::new()),
            discover: Mutex::new(Vec::new()),
        }
    }

    pub fn from_policy_store(store: PolicyStore) -> Self {
        let s = Self::new();
        for f in store.functions {
            s.functions.insert(f.name.clone(), f);
        }
        for svc in store.services {
            s.services.insert(svc.name.clone(), svc);
        }
        s
    }

    /// Snapshot of everything recorded while discover mode was in effect.
    pub fn discover_log(&self) -> Vec<RequestContext> {
        self.discover.lock().clone()
    }

    fn publish(&self, kind: EventType, content: EventContent) {
        let id = self.event_id.fetch_add(1, Ordering::SeqCst);
        let event = crate::model::StoreChangeEvent { id, kind, content };
        let mut subs = self.subscribers.lock();
        subs.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("store event channel full, dropping subscriber backpressure signal");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

impl Clone for EventContent {
    fn clone(&self) -> Self {
        match self {
            EventContent::Service(s) => EventContent::Service(s.clone()),
            EventContent::ServiceName(s) => EventContent::ServiceName(s.clone()),
            EventContent::Policy(s) => EventContent::Policy(s.clone()),
            EventContent::PolicyId(s) => EventContent::PolicyId(s.clone()),
            EventContent::RolePolicy(s) => EventContent::RolePolicy(s.clone()),
            EventContent::RolePolicyId(s) => EventContent::RolePolicyId(s.clone()),
            EventContent::Function(s) => EventContent::Function(s.clone()),
            EventContent::FunctionName(s) => EventContent::FunctionName(s.clone()),
            EventContent::FullStore(s) => EventContent::FullStore(s.clone()),
            EventContent::None => EventContent::None,
        }
    }
}

impl<T: Clone> Clone for ServiceScoped<T> {
    fn clone(&self) -> Self {
        ServiceScoped {
            service_name: self.service_name.clone(),
            data: self.data.clone(),
        }
    }
}

fn not_found(kind: &str, id: &str) -> AegisError {
    AegisError::EntityNotFound {
        kind: kind.to_string(),
        id: id.to_string(),
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn store_type(&self) -> &str {
        "memory"
    }

    async fn read_policy_store(&self) -> Result<PolicyStore> {
        Ok(PolicyStore {
            functions: self.functions.iter().map(|e| e.value().clone()).collect(),
            services: self.services.iter().map(|e| e.value().clone()).collect(),
        })
    }

    async fn list_all_services(&self) -> Result<Vec<Service>> {
        Ok(self.services.iter().map(|e| e.value().clone()).collect())
    }

    async fn get_service(&self, name: &str) -> Result<Service> {
        self.services
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| not_found("service", name))
    }

    async fn create_service(&self, service: Service) -> Result<()> {
        let name = service.name.clone();
        self.services.insert(name, service.clone());
        self.publish(EventType::ServiceAdd, EventContent::Service(Box::new(service)));
        Ok(())
    }

    async fn delete_service(&self, name: &str) -> Result<()> {
        self.services
            .remove(name)
            .ok_or_else(|| not_found("service", name))?;
        self.publish(EventType::ServiceDelete, EventContent::ServiceName(name.to_string()));
        Ok(())
    }

    async fn delete_services(&self) -> Result<()> {
        self.services.clear();
        self.publish(EventType::FullReload, EventContent::None);
        Ok(())
    }

    async fn list_all_policies(
        &self,
        service_name: &str,
        filter: Option<&str>,
    ) -> Result<Vec<Policy>> {
        let svc = self.get_service(service_name).await?;
        let filter = Filter::parse(filter.unwrap_or(""))?;
        Ok(svc
            .policies
            .into_iter()
            .filter(|p| match &filter {
                None => true,
                Some(f) => filter_field(f, p),
            })
            .collect())
    }

    async fn get_policy(&self, service_name: &str, id: &str) -> Result<Policy> {
        let svc = self.get_service(service_name).await?;
        svc.policies
            .into_iter()
            .find(|p| p.id == id)
            .ok_or_else(|| not_found("policy", id))
    }

    async fn create_policy(&self, service_name: &str, policy: Policy) -> Result<()> {
        let mut entry = self
            .services
            .get_mut(service_name)
            .ok_or_else(|| not_found("service", service_name))?;
        entry.policies.push(policy.clone());
        drop(entry);
        self.publish(
            EventType::PolicyAdd,
            EventContent::Policy(ServiceScoped {
                service_name: service_name.to_string(),
                data: Box::new(policy),
            }),
        );
        Ok(())
    }

    async fn delete_policy(&self, service_name: &str, id: &str) -> Result<()> {
        let mut entry = self
            .services
            .get_mut(service_name)
            .ok_or_else(|| not_found("service", service_name))?;
        let before = entry.policies.len();
        entry.policies.retain(|p| p.id != id);
        if entry.policies.len() == before {
            return Err(not_found("policy", id));
        }
        drop(entry);
        self.publish(
            EventType::PolicyDelete,
            EventContent::PolicyId(ServiceScoped {
                service_name: service_name.to_string(),
                data: id.to_string(),
            }),
        );
        Ok(())
    }

    async fn delete_policies(&self, service_name: &str) -> Result<()> {
        // Resolved Open Question: "nothing to delete" is success, not an
        // error, unlike the source's inconsistent DeletePolicies behavior.
        let mut entry = self
            .services
            .get_mut(service_name)
            .ok_or_else(|| not_found("service", service_name))?;
        entry.policies.clear();
        drop(entry);
        self.publish(EventType::SyncReload, EventContent::None);
        Ok(())
    }

    async fn list_all_role_policies(
        &self,
        service_name: &str,
        filter: Option<&str>,
    ) -> Result<Vec<RolePolicy>> {
        let svc = self.get_service(service_name).await?;
        let filter = Filter::parse(filter.unwrap_or(""))?;
        Ok(svc
            .role_policies
            .into_iter()
            .filter(|rp| match &filter {
                None => true,
                Some(f) => filter_role_field(f, rp),
            })
            .collect())
    }

    async fn get_role_policy(&self, service_name: &str, id: &str) -> Result<RolePolicy> {
        let svc = self.get_service(service_name).await?;
        svc.role_policies
            .into_iter()
            .find(|p| p.id == id)
            .ok_or_else(|| not_found("role_policy", id))
    }

    async fn create_role_policy(&self, service_name: &str, policy: RolePolicy) -> Result<()> {
        let mut entry = self
            .services
            .get_mut(service_name)
            .ok_or_else(|| not_found("service", service_name))?;
        entry.role_policies.push(policy.clone());
        drop(entry);
        self.publish(
            EventType::RolePolicyAdd,
            EventContent::RolePolicy(ServiceScoped {
                service_name: service_name.to_string(),
                data: Box::new(policy),
            }),
        );
        Ok(())
    }

    async fn delete_role_policy(&self, service_name: &str, id: &str) -> Result<()> {
        let mut entry = self
            .services
            .get_mut(service_name)
            .ok_or_else(|| not_found("service", service_name))?;
        let before = entry.role_policies.len();
        entry.role_policies.retain(|p| p.id != id);
        if entry.role_policies.len() == before {
            return Err(not_found("role_policy", id));
        }
        drop(entry);
        self.publish(
            EventType::RolePolicyDelete,
            EventContent::RolePolicyId(ServiceScoped {
                service_name: service_name.to_string(),
                data: id.to_string(),
            }),
        );
        Ok(())
    }

    async fn delete_role_policies(&self, service_name: &str) -> Result<()> {
        let mut entry = self
            .services
            .get_mut(service_name)
            .ok_or_else(|| not_found("service", service_name))?;
        entry.role_policies.clear();
        drop(entry);
        self.publish(EventType::SyncReload, EventContent::None);
        Ok(())
    }

    async fn list_all_functions(&self) -> Result<Vec<Function>> {
        Ok(self.functions.iter().map(|e| e.value().clone()).collect())
    }

    async fn get_function(&self, name: &str) -> Result<Function> {
        self.functions
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| not_found("function", name))
    }

    async fn create_function(&self, function: Function) -> Result<()> {
        let name = function.name.clone();
        self.functions.insert(name, function.clone());
        self.publish(EventType::FunctionAdd, EventContent::Function(Box::new(function)));
        Ok(())
    }

    async fn delete_function(&self, name: &str) -> Result<()> {
        self.functions
            .remove(name)
            .ok_or_else(|| not_found("function", name))?;
        self.publish(EventType::FunctionDelete, EventContent::FunctionName(name.to_string()));
        Ok(())
    }

    fn watch(&self) -> mpsc::Receiver<crate::model::StoreChangeEvent> {
        let (tx, rx) = mpsc::channel(1024);
        self.subscribers.lock().push(tx);
        rx
    }

    fn stop_watch(&self) {
        self.subscribers.lock().clear();
    }

    fn as_discover_manager(&self) -> Option<&dyn DiscoverRequestManager> {
        Some(self)
    }
}

#[async_trait]
impl DiscoverRequestManager for InMemoryStore {
    async fn save_discover_request(&self, ctx: &RequestContext) -> Result<()> {
        self.discover.lock().push(ctx.clone());
        Ok(())
    }
}

fn filter_field(filter: &Filter, p: &Policy) -> bool {
    let value = match filter.field.as_str() {
        "id" => Some(p.id.clone()),
        "name" => p.name.clone(),
        "effect" => Some(format!("{:?}", p.effect).to_lowercase()),
        "condition" => p.condition.clone(),
        _ => None,
    };
    filter.matches_value(value.as_deref())
}

fn filter_role_field(filter: &Filter, p: &RolePolicy) -> bool {
    let value = match filter.field.as_str() {
        "id" => Some(p.id.clone()),
        "name" => p.name.clone(),
        "effect" => Some(format!("{:?}", p.effect).to_lowercase()),
        "condition" => p.condition.clone(),
        _ => None,
    };
    filter.matches_value(value.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Effect;
    use std::collections::HashMap;

    fn sample_service() -> Service {
        Service {
            name: "crm".into(),
            r#type: "application".into(),
            policies: vec![],
            role_policies: vec![],
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn create_and_get_service_round_trips() {
        let store = InMemoryStore::new();
        store.create_service(sample_service()).await.unwrap();
        let svc = store.get_service("crm").await.unwrap();
        assert_eq!(svc.name, "crm");
    }

    #[tokio::test]
    async fn delete_policies_on_empty_service_succeeds() {
        let store = InMemoryStore::new();
        store.create_service(sample_service()).await.unwrap();
        // Resolved Open Question: deleting an empty policy set is success.
        store.delete_policies("crm").await.unwrap();
    }

    #[tokio::test]
    async fn missing_service_is_entity_not_found() {
        let store = InMemoryStore::new();
        let err = store.get_service("nope").await.unwrap_err();
        assert!(matches!(err, AegisError::EntityNotFound { .. }));
    }

    #[tokio::test]
    async fn watch_observes_policy_add() {
        let store = InMemoryStore::new();
        store.create_service(sample_service()).await.unwrap();
        let mut rx = store.watch();

        store
            .create_policy(
                "crm",
                Policy {
                    id: "p1".into(),
                    name: None,
                    effect: Effect::Grant,
                    permissions: vec![],
                    principals: vec![],
                    condition: None,
                    metadata: HashMap::new(),
                },
            )
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventType::PolicyAdd);
    }

    #[tokio::test]
    async fn list_all_policies_with_empty_filter_returns_everything() {
        let store = InMemoryStore::new();
        store.create_service(sample_service()).await.unwrap();
        for id in ["p1", "p2"] {
            store
                .create_policy(
                    "crm",
                    Policy {
                        id: id.into(),
                        name: None,
                        effect: Effect::Grant,
                        permissions: vec![],
                        principals: vec![],
                        condition: None,
                        metadata: HashMap::new(),
                    },
                )
                .await
                .unwrap();
        }
        let all = store.list_all_policies("crm", None).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
