//! # Aegis Decision Service
//!
//! HTTP front-end for the Decision API (`IsAllowed`, `GetAllGrantedRoles`,
//! `GetAllGrantedPermissions`, `Discover`), backed by an in-memory store
//! seeded at startup. A durable store backend is out of scope here; swap
//! `AppState::engine`'s construction for one once a real `Store` exists.

use aegis_core::endpoints;
use aegis_core::memstore::InMemoryStore;
use aegis_core::model::{Reason, RequestContext};
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use clap::Parser;
use policy_engine::{AegisEngine, EngineConfig};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, instrument, warn};

/// Bootstrap config for the Decision Service, resolved from flags or
/// environment variables and converted into `policy_engine::EngineConfig`.
#[derive(Parser, Debug)]
#[command(name = "decision-service", version = aegis_core::VERSION, about = "Aegis Decision Service")]
struct Args {
    /// Address to bind the HTTP listener to.
    #[arg(long, default_value = "0.0.0.0:8080", env = "AEGIS_DECISION_BIND_ADDR")]
    bind_addr: String,

    /// Upper bound on role-resolution fixed-point iterations.
    #[arg(long, default_value = "256", env = "AEGIS_ROLE_ITERATION_CAP")]
    role_resolution_iteration_cap: usize,

    /// Default decision deadline in milliseconds, applied when a request omits one.
    #[arg(long, default_value = "500", env = "AEGIS_DEFAULT_EVAL_TIMEOUT_MS")]
    default_eval_timeout_ms: u64,

    /// Capacity of the discover-mode request buffer.
    #[arg(long, default_value = "4096", env = "AEGIS_DISCOVER_BUFFER_CAPACITY")]
    discover_buffer_capacity: usize,

    /// Capacity of the store-change event channel feeding the reactor.
    #[arg(long, default_value = "1024", env = "AEGIS_EVENT_CHANNEL_CAPACITY")]
    event_channel_capacity: usize,
}

impl From<&Args> for aegis_core::config::EngineConfig {
    fn from(args: &Args) -> Self {
        Self {
            role_resolution_iteration_cap: args.role_resolution_iteration_cap,
            default_eval_timeout: Duration::from_millis(args.default_eval_timeout_ms),
            discover_buffer_capacity: args.discover_buffer_capacity,
            event_channel_capacity: args.event_channel_capacity,
        }
    }
}

#[derive(Clone)]
struct AppState {
    engine: Arc<AegisEngine>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    info!("Starting Aegis Decision Service {}", aegis_core::BUILD_INFO);

    let store: Arc<dyn aegis_core::store::Store> = Arc::new(InMemoryStore::new());
    let config = aegis_core::config::EngineConfig::from(&args);
    let engine = AegisEngine::new(store, EngineConfig::from(config)).await?;
    let state = AppState { engine };

    let app = Router::new()
        .route(endpoints::HEALTH, get(health_check))
        .route(endpoints::METRICS, get(metrics_handler))
        .route(endpoints::API_V1_DECISIONS, post(evaluate_decision))
        .with_state(state);

    let listener = TcpListener::bind(&args.bind_addr).await?;
    info!("Aegis Decision Service listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

#[instrument]
async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "decision-service",
        "version": aegis_core::VERSION
    })))
}

#[instrument(skip(state))]
async fn metrics_handler(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    Ok(Json(json!({
        "service": "decision-service",
        "snapshot_version": state.engine.snapshot_version(),
        "reactor_terminated": state.engine.is_reactor_terminated(),
        "discover_dropped": state.engine.discover_dropped_count(),
        "counters": state.engine.metrics().snapshot(),
    })))
}

#[derive(Debug, Deserialize)]
struct DecisionRequest {
    #[serde(flatten)]
    ctx: RequestContext,
    #[serde(default)]
    deadline_ms: Option<u64>,
    #[serde(default)]
    mode: DecisionMode,
}

#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum DecisionMode {
    #[default]
    IsAllowed,
    GrantedRoles,
    GrantedPermissions,
    Discover,
}

#[derive(Debug, Serialize)]
struct DecisionResponse {
    allowed: bool,
    reason: Reason,
}

const DEFAULT_DEADLINE_MS: u64 = 500;

#[instrument(skip(state, payload), fields(service = %payload.ctx.service_name, action = %payload.ctx.action))]
async fn evaluate_decision(
    State(state): State<AppState>,
    Json(payload): Json<DecisionRequest>,
) -> Result<Json<Value>, StatusCode> {
    let deadline = Duration::from_millis(payload.deadline_ms.unwrap_or(DEFAULT_DEADLINE_MS));

    match payload.mode {
        DecisionMode::IsAllowed => {
            let (allowed, reason) = state
                .engine
                .is_allowed(&payload.ctx, deadline)
                .await
                .map_err(map_engine_error)?;
            state.engine.metrics().record_decision(allowed, reason);
            Ok(Json(json!(DecisionResponse { allowed, reason })))
        }
        DecisionMode::GrantedRoles => {
            let roles = state
                .engine
                .get_all_granted_roles(&payload.ctx, deadline)
                .await
                .map_err(map_engine_error)?;
            Ok(Json(json!({ "roles": roles })))
        }
        DecisionMode::GrantedPermissions => {
            let permissions = state
                .engine
                .get_all_granted_permissions(&payload.ctx, deadline)
                .await
                .map_err(map_engine_error)?;
            Ok(Json(json!({ "permissions": permissions })))
        }
        DecisionMode::Discover => {
            let (allowed, reason) = state
                .engine
                .discover(payload.ctx)
                .await
                .map_err(map_engine_error)?;
            Ok(Json(json!(DecisionResponse { allowed, reason })))
        }
    }
}

fn map_engine_error(err: aegis_core::AegisError) -> StatusCode {
    use aegis_core::AegisError::*;
    warn!(error = %err, "decision evaluation failed");
    match err {
        EntityNotFound { .. } => StatusCode::NOT_FOUND,
        InvalidRequest { .. } | AttributeMissing { .. } => StatusCode::BAD_REQUEST,
        DiscoverError { .. } => StatusCode::NOT_IMPLEMENTED,
        StoreError { .. } | SnapshotStale { .. } => StatusCode::SERVICE_UNAVAILABLE,
        FunctionCallError { .. } | CycleDetected { .. } | SerializationError { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
