//! C2: the extension function invoker.
//!
//! Resolves a named extension function to a remote HTTP(S) endpoint,
//! invokes it with a JSON payload, and caches the result by
//! `(funcName, canonical JSON of args)` with a per-function TTL.
//! Concurrent callers for the same fingerprint share one outbound request
//! (singleflight).

use aegis_core::model::Function;
use aegis_core::value::Value;
use dashmap::DashMap;
use metrics::AegisMetrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, instrument, warn};

#[derive(Debug, Error, Clone)]
pub enum FunctionCallError {
    #[error("unknown extension function: {0}")]
    UnknownFunction(String),
    #[error("function call transport error: {0}")]
    Transport(String),
    #[error("function returned non-2xx status: {0}")]
    HttpStatus(u16),
    #[error("function returned an error: {0}")]
    RemoteError(String),
    #[error("malformed function response: {0}")]
    MalformedResponse(String),
    #[error("function call timed out")]
    Timeout,
}

#[derive(Debug, Serialize)]
struct CallRequest<'a> {
    params: &'a [Value],
}

#[derive(Debug, Deserialize)]
struct CallResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_fresh(&self) -> bool {
        match self.expires_at {
            Some(t) => Instant::now() < t,
            None => true,
        }
    }
}

/// Resolves function names to their definitions. A thin indirection so the
/// invoker doesn't need to know about `Snapshot` directly.
pub trait FunctionTable: Send + Sync {
    fn get(&self, name: &str) -> Option<Function>;
}

impl FunctionTable for std::collections::HashMap<String, Function> {
    fn get(&self, name: &str) -> Option<Function> {
        std::collections::HashMap::get(self, name).cloned()
    }
}

pub struct FunctionInvoker {
    table: Arc<dyn FunctionTable>,
    client: reqwest::Client,
    cache: DashMap<(String, String), CacheEntry>,
    in_flight: DashMap<(String, String), Arc<Notify>>,
    metrics: Option<Arc<AegisMetrics>>,
}

struct EmptyTable;
impl FunctionTable for EmptyTable {
    fn get(&self, _name: &str) -> Option<Function> {
        None
    }
}

impl FunctionInvoker {
    pub fn new(table: Arc<dyn FunctionTable>) -> Self {
        Self {
            table,
            client: reqwest::Client::new(),
            cache: DashMap::new(),
            in_flight: DashMap::new(),
            metrics: None,
        }
    }

    /// An invoker with no registered functions; every call fails with
    /// `UnknownFunction`. Useful for evaluating conditions with no
    /// extension calls.
    pub fn new_empty() -> Self {
        Self::new(Arc::new(EmptyTable))
    }

    /// Attaches a counters sink; cache hits/misses observed by `invoke`
    /// are recorded on it from then on.
    pub fn with_metrics(mut self, metrics: Arc<AegisMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn fingerprint(name: &str, args: &[Value]) -> (String, String) {
        let canonical = serde_json::to_string(args).unwrap_or_default();
        (name.to_string(), canonical)
    }

    #[instrument(skip(self, args), fields(function = %name))]
    pub async fn invoke(
        &self,
        name: &str,
        args: &[Value],
        deadline: Duration,
    ) -> Result<Value, FunctionCallError> {
        let function = self
            .table
            .get(name)
            .ok_or_else(|| FunctionCallError::UnknownFunction(name.to_string()))?;

        let key = Self::fingerprint(name, args);

        if function.result_cachable {
            if let Some(entry) = self.cache.get(&key) {
                if entry.is_fresh() {
                    debug!("function cache hit for {name}");
                    if let Some(m) = &self.metrics {
                        m.record_cache_hit();
                    }
                    return Ok(entry.value.clone());
                }
            }
            if let Some(m) = &self.metrics {
                m.record_cache_miss();
            }
        }

        // Singleflight: only one caller per fingerprint actually performs
        // the HTTP round trip; the rest wait on a shared notifier and then
        // re-check the cache.
        loop {
            if let Some(notify) = self.in_flight.get(&key).map(|e| e.clone()) {
                notify.notified().await;
                if let Some(entry) = self.cache.get(&key) {
                    if entry.is_fresh() {
                        if let Some(m) = &self.metrics {
                            m.record_cache_hit();
                        }
                        return Ok(entry.value.clone());
                    }
                }
                // The leader's attempt failed or the entry already expired;
                // fall through and try to become the new leader.
                continue;
            }

            let notify = Arc::new(Notify::new());
            match self.in_flight.entry(key.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => continue,
                dashmap::mapref::entry::Entry::Vacant(v) => {
                    v.insert(notify.clone());
                }
            }

            let result = tokio::time::timeout(deadline, self.call_remote(&function, args)).await;
            self.in_flight.remove(&key);
            notify.notify_waiters();

            let value = match result {
                Ok(Ok(v)) => v,
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(FunctionCallError::Timeout),
            };

            if function.result_cachable {
                let expires_at = if function.result_ttl > 0 {
                    Some(Instant::now() + Duration::from_secs(function.result_ttl as u64))
                } else {
                    None
                };
                self.cache.insert(
                    key.clone(),
                    CacheEntry {
                        value: value.clone(),
                        expires_at,
                    },
                );
            }

            return Ok(value);
        }
    }

    async fn call_remote(
        &self,
        function: &Function,
        args: &[Value],
    ) -> Result<Value, FunctionCallError> {
        let url = self.resolve_url(function).await;
        let client = self.client_for(function)?;

        let body = CallRequest { params: args };
        let resp = client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| FunctionCallError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(FunctionCallError::HttpStatus(resp.status().as_u16()));
        }

        let parsed: CallResponse = resp
            .json()
            .await
            .map_err(|e| FunctionCallError::MalformedResponse(e.to_string()))?;

        if let Some(err) = parsed.error {
            return Err(FunctionCallError::RemoteError(err));
        }
        match parsed.result {
            Some(v) => Ok(Value::from(v)),
            None => Err(FunctionCallError::MalformedResponse(
                "response had neither result nor error".into(),
            )),
        }
    }

    /// Prefers `localFuncURL` when set, else `funcURL`. This is a static
    /// choice made once per call, not a fallback: if `localFuncURL` is set
    /// but unreachable, `call_remote` returns a `Transport` error and never
    /// retries against `funcURL`.
    async fn resolve_url(&self, function: &Function) -> String {
        function
            .local_func_url
            .clone()
            .unwrap_or_else(|| function.func_url.clone())
    }

    fn client_for(&self, function: &Function) -> Result<reqwest::Client, FunctionCallError> {
        match &function.ca {
            None => Ok(self.client.clone()),
            Some(pem) => {
                let cert = reqwest::Certificate::from_pem(pem.as_bytes())
                    .map_err(|e| FunctionCallError::Transport(format!("invalid CA bundle: {e}")))?;
                reqwest::Client::builder()
                    .add_root_certificate(cert)
                    .build()
                    .map_err(|e| FunctionCallError::Transport(e.to_string()))
            }
        }
    }
}

/// Sweeps expired cache entries. The reactor calls this opportunistically
/// after installing a new snapshot; entries are also checked lazily on
/// read, so this is a throughput optimization, not a correctness
/// requirement.
impl FunctionInvoker {
    pub fn sweep_expired(&self) {
        let before = self.cache.len();
        self.cache.retain(|_, entry| entry.is_fresh());
        let removed = before - self.cache.len();
        if removed > 0 {
            warn!("swept {removed} expired function-cache entries");
        }
    }
}
