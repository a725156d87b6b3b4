//! C6: the store-change reactor. Consumes `StoreChangeEvent`s via
//! `event-bus`, applies them to the current snapshot (or performs a full
//! reload), and publishes the result behind `parking_lot::RwLock<Arc<Snapshot>>`.
//!
//! Generalizes a hot-swappable policy pointer into an always-present
//! `Arc<Snapshot>`, so readers never see an `Option` they have to unwrap.

use crate::model::Snapshot;
use aegis_core::model::{EventContent, EventType, StoreChangeEvent};
use aegis_core::store::Store;
use event_bus::EventBus;
use metrics::AegisMetrics;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct Reactor {
    snapshot: Arc<RwLock<Arc<Snapshot>>>,
    store: Arc<dyn Store>,
    bus: Arc<EventBus>,
    terminated: AtomicBool,
    metrics: Arc<AegisMetrics>,
}

impl Reactor {
    /// Builds the initial snapshot from the store and wires up the
    /// forwarding task (store watch channel -> event bus) plus the reactor
    /// loop (event bus -> snapshot pointer). Returns the shared snapshot
    /// pointer readers consult and a handle to stop the reactor.
    pub async fn spawn(
        store: Arc<dyn Store>,
        event_channel_capacity: usize,
        metrics: Arc<AegisMetrics>,
    ) -> aegis_core::error::Result<(Arc<RwLock<Arc<Snapshot>>>, Arc<Reactor>)> {
        let initial = store.read_policy_store().await?;
        let snapshot = Arc::new(RwLock::new(Arc::new(Snapshot::from_policy_store(1, &initial))));
        let bus = EventBus::new(event_channel_capacity);

        let reactor = Arc::new(Reactor {
            snapshot: snapshot.clone(),
            store: store.clone(),
            bus: bus.clone(),
            terminated: AtomicBool::new(false),
            metrics,
        });

        let mut store_rx = store.watch();
        let forward_bus = bus.clone();
        tokio::spawn(async move {
            while let Some(event) = store_rx.recv().await {
                forward_bus.publish(event);
            }
            // The store's event stream ended; close the bus so the reactor
            // loop observes it and reports a fatal state instead of hanging.
            forward_bus.close();
        });

        let loop_reactor = reactor.clone();
        tokio::spawn(async move {
            loop_reactor.run().await;
        });

        Ok((snapshot, reactor))
    }

    async fn run(&self) {
        loop {
            match self.bus.recv().await {
                Some(event) => self.apply(event).await,
                None => {
                    error!("store event stream terminated; reactor is now stale");
                    self.terminated.store(true, Ordering::Release);
                    break;
                }
            }
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.store.stop_watch();
        self.bus.close();
    }

    async fn apply(&self, event: StoreChangeEvent) {
        match (&event.kind, &event.content) {
            (EventType::ServiceAdd, EventContent::Service(service)) => {
                self.swap(|s| s.with_service_upserted((**service).clone()));
            }
            (EventType::ServiceDelete, EventContent::ServiceName(name)) => {
                self.swap(|s| s.with_service_removed(name));
            }
            (EventType::PolicyAdd, EventContent::Policy(scoped)) => {
                self.upsert_policy(&scoped.service_name, (*scoped.data).clone());
            }
            (EventType::PolicyDelete, EventContent::PolicyId(scoped)) => {
                self.remove_policy(&scoped.service_name, &scoped.data);
            }
            (EventType::RolePolicyAdd, EventContent::RolePolicy(scoped)) => {
                self.upsert_role_policy(&scoped.service_name, (*scoped.data).clone());
            }
            (EventType::RolePolicyDelete, EventContent::RolePolicyId(scoped)) => {
                self.remove_role_policy(&scoped.service_name, &scoped.data);
            }
            (EventType::FunctionAdd, EventContent::Function(function)) => {
                self.swap(|s| s.with_function_upserted((**function).clone()));
            }
            (EventType::FunctionDelete, EventContent::FunctionName(name)) => {
                self.swap(|s| s.with_function_removed(name));
            }
            (EventType::SyncReload, _) | (EventType::FullReload, _) => {
                self.full_reload().await;
            }
            (kind, content) => {
                warn!(?kind, ?content, "malformed or unexpected store-change event, skipping");
            }
        }
    }

    fn swap(&self, f: impl FnOnce(&Snapshot) -> Snapshot) {
        let mut guard = self.snapshot.write();
        let next = f(&guard);
        info!(version = next.version, "installed updated snapshot");
        *guard = Arc::new(next);
        self.metrics.record_snapshot_installed();
    }

    fn upsert_policy(&self, service_name: &str, policy: aegis_core::model::Policy) {
        let mut guard = self.snapshot.write();
        let Some(existing) = guard.get_service(service_name) else {
            warn!(service_name, "policy add for unknown service, skipping");
            return;
        };
        let mut service = existing.service().clone();
        if let Some(slot) = service.policies.iter_mut().find(|p| p.id == policy.id) {
            *slot = policy;
        } else {
            service.policies.push(policy);
        }
        let next = guard.with_service_upserted(service);
        info!(version = next.version, service_name, "policy upserted");
        *guard = Arc::new(next);
        self.metrics.record_snapshot_installed();
    }

    fn remove_policy(&self, service_name: &str, policy_id: &str) {
        let mut guard = self.snapshot.write();
        let Some(existing) = guard.get_service(service_name) else {
            return;
        };
        let mut service = existing.service().clone();
        service.policies.retain(|p| p.id != policy_id);
        let next = guard.with_service_upserted(service);
        *guard = Arc::new(next);
        self.metrics.record_snapshot_installed();
    }

    fn upsert_role_policy(&self, service_name: &str, policy: aegis_core::model::RolePolicy) {
        let mut guard = self.snapshot.write();
        let Some(existing) = guard.get_service(service_name) else {
            warn!(service_name, "role policy add for unknown service, skipping");
            return;
        };
        let mut service = existing.service().clone();
        if let Some(slot) = service.role_policies.iter_mut().find(|p| p.id == policy.id) {
            *slot = policy;
        } else {
            service.role_policies.push(policy);
        }
        let next = guard.with_service_upserted(service);
        *guard = Arc::new(next);
        self.metrics.record_snapshot_installed();
    }

    fn remove_role_policy(&self, service_name: &str, policy_id: &str) {
        let mut guard = self.snapshot.write();
        let Some(existing) = guard.get_service(service_name) else {
            return;
        };
        let mut service = existing.service().clone();
        service.role_policies.retain(|p| p.id != policy_id);
        let next = guard.with_service_upserted(service);
        *guard = Arc::new(next);
        self.metrics.record_snapshot_installed();
    }

    async fn full_reload(&self) {
        match self.store.read_policy_store().await {
            Ok(store) => {
                let version = self.snapshot.read().version + 1;
                let next = Snapshot::from_policy_store(version, &store);
                info!(version, "full reload complete");
                *self.snapshot.write() = Arc::new(next);
                self.metrics.record_full_reload();
            }
            Err(e) => {
                error!(error = %e, "full reload failed to read policy store");
            }
        }
    }
}
