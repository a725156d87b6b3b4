//! Ties C1-C7 together behind the Decision API: `IsAllowed`,
//! `GetAllGrantedRoles`, `GetAllGrantedPermissions`, and `Discover`.
//!
//! A single `Arc<RwLock<Arc<Snapshot>>>` maintained by the reactor (C6),
//! with a long-lived function invoker (C2) and discover collector (C7)
//! alongside, replaces a dashmap-plus-hot-swap-pointer design with one
//! always-present snapshot handle.

use crate::discover::DiscoverCollector;
use crate::functions::{FunctionInvoker, FunctionTable};
use crate::matcher::{self, Decision};
use crate::model::Snapshot;
use crate::reactor::Reactor;
use crate::roles;
use aegis_core::error::{AegisError, Result};
use aegis_core::model::{Function, Permission, Reason, RequestContext};
use aegis_core::store::Store;
use metrics::AegisMetrics;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, instrument, warn};

/// Tunables for the engine, exposed so the hosting service can wire them
/// from its own config instead of living as hardcoded constants.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub role_iteration_cap: usize,
    pub event_channel_capacity: usize,
    pub discover_buffer_capacity: usize,
    pub discover_batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            role_iteration_cap: 256,
            event_channel_capacity: 1024,
            discover_buffer_capacity: 4096,
            discover_batch_size: 256,
        }
    }
}

/// Bridges the serializable bootstrap config (`aegis_core::config::EngineConfig`,
/// loaded from file/env by a hosting binary) into the tunables this engine
/// actually runs with. `discover_batch_size` has no bootstrap-config
/// counterpart, so it keeps this crate's own default.
impl From<aegis_core::config::EngineConfig> for EngineConfig {
    fn from(cfg: aegis_core::config::EngineConfig) -> Self {
        Self {
            role_iteration_cap: cfg.role_resolution_iteration_cap,
            event_channel_capacity: cfg.event_channel_capacity,
            discover_buffer_capacity: cfg.discover_buffer_capacity,
            ..Self::default()
        }
    }
}

/// Reads extension functions out of the live snapshot, so the
/// `FunctionInvoker`'s cache and in-flight singleflight tracking persist
/// across snapshot swaps while new functions still become visible.
struct SnapshotFunctionTable {
    snapshot: Arc<RwLock<Arc<Snapshot>>>,
}

impl FunctionTable for SnapshotFunctionTable {
    fn get(&self, name: &str) -> Option<Function> {
        self.snapshot.read().get_function(name).cloned()
    }
}

pub struct AegisEngine {
    snapshot: Arc<RwLock<Arc<Snapshot>>>,
    store: Arc<dyn Store>,
    functions: FunctionInvoker,
    reactor: Arc<Reactor>,
    discover: Arc<DiscoverCollector>,
    config: EngineConfig,
    metrics: Arc<AegisMetrics>,
}

impl AegisEngine {
    pub async fn new(store: Arc<dyn Store>, config: EngineConfig) -> Result<Arc<Self>> {
        let metrics = Arc::new(AegisMetrics::new());
        let (snapshot, reactor) =
            Reactor::spawn(store.clone(), config.event_channel_capacity, metrics.clone()).await?;
        let functions = FunctionInvoker::new(Arc::new(SnapshotFunctionTable {
            snapshot: snapshot.clone(),
        }))
        .with_metrics(metrics.clone());
        let discover = Arc::new(DiscoverCollector::new(config.discover_buffer_capacity));
        Ok(Arc::new(Self {
            snapshot,
            store,
            functions,
            reactor,
            discover,
            config,
            metrics,
        }))
    }

    /// Shared counters sink for cache hits/misses and reactor activity.
    /// Hosting services read this instead of keeping a separate instance,
    /// so the `/metrics` endpoint reflects what the engine actually did.
    pub fn metrics(&self) -> &Arc<AegisMetrics> {
        &self.metrics
    }

    pub fn snapshot_version(&self) -> u64 {
        self.snapshot.read().version
    }

    pub fn is_reactor_terminated(&self) -> bool {
        self.reactor.is_terminated()
    }

    pub fn shutdown(&self) {
        self.reactor.stop();
    }

    /// `IsAllowed`: the overall `deadline` bounds the whole evaluation,
    /// including role resolution and every condition's function calls. A
    /// blown deadline is not an error: it resolves to `(false,
    /// EVAL_TIMEOUT)`, the same contained-failure posture condition errors
    /// get inside the matcher.
    #[instrument(skip(self, ctx), fields(service = %ctx.service_name, resource = %ctx.resource, action = %ctx.action))]
    pub async fn is_allowed(&self, ctx: &RequestContext, deadline: Duration) -> Result<(bool, Reason)> {
        let snapshot = self.snapshot.read().clone();
        match tokio::time::timeout(
            deadline,
            matcher::is_allowed(ctx, &snapshot, &self.functions, self.config.role_iteration_cap, deadline),
        )
        .await
        {
            Ok(Ok(Decision { allowed, reason })) => Ok((allowed, reason)),
            Ok(Err(e)) => Err(e),
            Err(_elapsed) => {
                warn!("is_allowed exceeded its deadline, returning EVAL_TIMEOUT");
                Ok((false, Reason::EvalTimeout))
            }
        }
    }

    #[instrument(skip(self, ctx), fields(service = %ctx.service_name))]
    pub async fn get_all_granted_roles(&self, ctx: &RequestContext, deadline: Duration) -> Result<Vec<String>> {
        let snapshot = self.snapshot.read().clone();
        match tokio::time::timeout(
            deadline,
            roles::resolve(ctx, &snapshot, &self.functions, self.config.role_iteration_cap, deadline),
        )
        .await
        {
            Ok(Ok(held)) => Ok(held
                .into_iter()
                .filter_map(|p| p.strip_prefix("role:").map(String::from))
                .collect()),
            Ok(Err(e)) => Err(e),
            Err(_elapsed) => Err(AegisError::InvalidRequest {
                reason: "role resolution exceeded its deadline".into(),
            }),
        }
    }

    #[instrument(skip(self, ctx), fields(service = %ctx.service_name))]
    pub async fn get_all_granted_permissions(
        &self,
        ctx: &RequestContext,
        deadline: Duration,
    ) -> Result<Vec<Permission>> {
        let snapshot = self.snapshot.read().clone();
        match tokio::time::timeout(
            deadline,
            matcher::get_all_granted_permissions(
                ctx,
                &snapshot,
                &self.functions,
                self.config.role_iteration_cap,
                deadline,
            ),
        )
        .await
        {
            Ok(result) => result,
            Err(_elapsed) => Err(AegisError::InvalidRequest {
                reason: "permission aggregation exceeded its deadline".into(),
            }),
        }
    }

    /// `Discover`: never reaches the matcher. Records `ctx` for later policy
    /// mining and reports `(true, DISCOVER_MODE)`. Errors if the store
    /// backing this engine doesn't implement `DiscoverRequestManager`.
    #[instrument(skip(self, ctx), fields(service = %ctx.service_name))]
    pub async fn discover(&self, ctx: RequestContext) -> Result<(bool, Reason)> {
        if self.store.as_discover_manager().is_none() {
            return Err(AegisError::DiscoverError {
                reason: "store does not support discover mode".into(),
            });
        }
        self.discover.record(ctx);
        if self.discover.len() >= self.config.discover_batch_size {
            self.flush_discover().await;
        }
        Ok((true, Reason::DiscoverMode))
    }

    /// Drains the discover buffer and hands each entry to the store. Best
    /// effort: a failed save is logged and the rest of the batch still
    /// flushes, since discover traffic is advisory, never load-bearing.
    pub async fn flush_discover(&self) {
        let Some(manager) = self.store.as_discover_manager() else {
            return;
        };
        let batch = self.discover.drain_batch();
        if batch.is_empty() {
            return;
        }
        let mut failures = 0usize;
        for ctx in &batch {
            if let Err(e) = manager.save_discover_request(ctx).await {
                failures += 1;
                error!(error = %e, "failed to persist discover request");
            }
        }
        if failures > 0 {
            warn!(failures, total = batch.len(), "some discover requests failed to persist");
        }
    }

    pub fn discover_dropped_count(&self) -> u64 {
        self.discover.dropped_count()
    }
}
