//! Counters for the Decision API, the function-result cache and the
//! store-change reactor. Atomic, lock-free, cheap to read from a `/metrics`
//! HTTP handler; no Prometheus exposition format, just a JSON snapshot.

use aegis_core::model::Reason;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

fn reason_tag(reason: Reason) -> &'static str {
    match reason {
        Reason::GrantPolicyFound => "GRANT_POLICY_FOUND",
        Reason::DenyPolicyFound => "DENY_POLICY_FOUND",
        Reason::NoApplicablePolicy => "NO_APPLICABLE_POLICY",
        Reason::DiscoverMode => "DISCOVER_MODE",
        Reason::ConditionError => "CONDITION_ERROR",
        Reason::EvalTimeout => "EVAL_TIMEOUT",
        Reason::StoreUnavailable => "STORE_UNAVAILABLE",
    }
}

#[derive(Debug, Default)]
pub struct AegisMetrics {
    decisions_total: AtomicU64,
    decisions_allowed: AtomicU64,
    decisions_denied: AtomicU64,
    decisions_by_reason: DashMap<&'static str, AtomicU64>,
    function_cache_hits: AtomicU64,
    function_cache_misses: AtomicU64,
    reactor_snapshots_installed: AtomicU64,
    reactor_full_reloads: AtomicU64,
    discover_recorded: AtomicU64,
    discover_dropped: AtomicU64,
}

impl AegisMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_decision(&self, allowed: bool, reason: Reason) {
        self.decisions_total.fetch_add(1, Ordering::Relaxed);
        if allowed {
            self.decisions_allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.decisions_denied.fetch_add(1, Ordering::Relaxed);
        }
        self.decisions_by_reason
            .entry(reason_tag(reason))
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.function_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.function_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot_installed(&self) {
        self.reactor_snapshots_installed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_full_reload(&self) {
        self.reactor_full_reloads.fetch_add(1, Ordering::Relaxed);
        debug!("metrics: full reload recorded");
    }

    pub fn record_discover(&self, dropped: u64) {
        self.discover_recorded.fetch_add(1, Ordering::Relaxed);
        if dropped > 0 {
            self.discover_dropped.fetch_add(dropped, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            decisions_total: self.decisions_total.load(Ordering::Relaxed),
            decisions_allowed: self.decisions_allowed.load(Ordering::Relaxed),
            decisions_denied: self.decisions_denied.load(Ordering::Relaxed),
            decisions_by_reason: self
                .decisions_by_reason
                .iter()
                .map(|e| (e.key().to_string(), e.value().load(Ordering::Relaxed)))
                .collect(),
            function_cache_hits: self.function_cache_hits.load(Ordering::Relaxed),
            function_cache_misses: self.function_cache_misses.load(Ordering::Relaxed),
            reactor_snapshots_installed: self.reactor_snapshots_installed.load(Ordering::Relaxed),
            reactor_full_reloads: self.reactor_full_reloads.load(Ordering::Relaxed),
            discover_recorded: self.discover_recorded.load(Ordering::Relaxed),
            discover_dropped: self.discover_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub decisions_total: u64,
    pub decisions_allowed: u64,
    pub decisions_denied: u64,
    pub decisions_by_reason: std::collections::HashMap<String, u64>,
    pub function_cache_hits: u64,
    pub function_cache_misses: u64,
    pub reactor_snapshots_installed: u64,
    pub reactor_full_reloads: u64,
    pub discover_recorded: u64,
    pub discover_dropped: u64,
}
