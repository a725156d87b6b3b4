//! # Aegis Store Service
//!
//! HTTP front-end for the `Store` CRUD surface (services, policies,
//! role policies, extension functions), backed by `InMemoryStore`. This is
//! a demo harness, not a durable backend: swap
//! `AppState::store`'s construction for a real one when it exists.

use aegis_core::endpoints;
use aegis_core::memstore::InMemoryStore;
use aegis_core::model::{Function, Policy, RolePolicy, Service};
use aegis_core::store::Store;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use clap::Parser;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, instrument, warn};

/// Bootstrap config for the Store Service.
#[derive(Parser, Debug)]
#[command(name = "store-service", version = aegis_core::VERSION, about = "Aegis Store Service")]
struct Args {
    /// Address to bind the HTTP listener to.
    #[arg(long, default_value = "0.0.0.0:8081", env = "AEGIS_STORE_BIND_ADDR")]
    bind_addr: String,
}

#[derive(Clone)]
struct AppState {
    store: Arc<dyn Store>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    info!("Starting Aegis Store Service {}", aegis_core::BUILD_INFO);

    let state = AppState {
        store: Arc::new(InMemoryStore::new()),
    };

    let services_path = format!("{}/{{name}}", endpoints::API_V1_SERVICES);
    let policies_service_path = format!("{}/{{service}}", endpoints::API_V1_POLICIES);
    let policies_item_path = format!("{}/{{service}}/{{id}}", endpoints::API_V1_POLICIES);
    let policies_count_path = format!("{}/{{service}}/count", endpoints::API_V1_POLICIES);
    let role_policies_service_path = format!("{}/{{service}}", endpoints::API_V1_ROLE_POLICIES);
    let role_policies_item_path = format!("{}/{{service}}/{{id}}", endpoints::API_V1_ROLE_POLICIES);
    let functions_item_path = format!("{}/{{name}}", endpoints::API_V1_FUNCTIONS);

    let app = Router::new()
        .route(endpoints::HEALTH, get(health_check))
        .route(endpoints::METRICS, get(metrics_handler))
        .route(
            endpoints::API_V1_SERVICES,
            get(list_services).post(create_service).delete(delete_all_services),
        )
        .route(
            &services_path,
            get(get_service).delete(delete_service),
        )
        .route(
            &policies_count_path,
            get(count_policies),
        )
        .route(
            &policies_service_path,
            get(list_policies).post(create_policy).delete(delete_policies),
        )
        .route(&policies_item_path, get(get_policy).delete(delete_policy))
        .route(
            &role_policies_service_path,
            get(list_role_policies)
                .post(create_role_policy)
                .delete(delete_role_policies),
        )
        .route(
            &role_policies_item_path,
            get(get_role_policy).delete(delete_role_policy),
        )
        .route(
            endpoints::API_V1_FUNCTIONS,
            get(list_functions).post(create_function),
        )
        .route(&functions_item_path, get(get_function).delete(delete_function))
        .with_state(state);

    let listener = TcpListener::bind(&args.bind_addr).await?;
    info!("Aegis Store Service listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

#[instrument]
async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "store-service",
        "version": aegis_core::VERSION
    })))
}

#[instrument(skip(state))]
async fn metrics_handler(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let services = state.store.list_all_services().await.map_err(map_store_error)?;
    let functions = state.store.list_all_functions().await.map_err(map_store_error)?;
    Ok(Json(json!({
        "service": "store-service",
        "services": services.len(),
        "functions": functions.len(),
    })))
}

#[instrument(skip(state))]
async fn list_services(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let services = state.store.list_all_services().await.map_err(map_store_error)?;
    Ok(Json(json!({ "services": services })))
}

#[instrument(skip(state, service))]
async fn create_service(
    State(state): State<AppState>,
    Json(service): Json<Service>,
) -> Result<Json<Value>, StatusCode> {
    state.store.create_service(service).await.map_err(map_store_error)?;
    Ok(Json(json!({ "status": "created" })))
}

#[instrument(skip(state))]
async fn get_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let service = state.store.get_service(&name).await.map_err(map_store_error)?;
    Ok(Json(json!(service)))
}

#[instrument(skip(state))]
async fn delete_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    state.store.delete_service(&name).await.map_err(map_store_error)?;
    Ok(Json(json!({ "status": "deleted" })))
}

#[instrument(skip(state))]
async fn delete_all_services(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    state.store.delete_services().await.map_err(map_store_error)?;
    Ok(Json(json!({ "status": "deleted" })))
}

#[derive(Debug, Deserialize)]
struct FilterQuery {
    filter: Option<String>,
}

#[instrument(skip(state))]
async fn list_policies(
    State(state): State<AppState>,
    Path(service): Path<String>,
    Query(query): Query<FilterQuery>,
) -> Result<Json<Value>, StatusCode> {
    let policies = state
        .store
        .list_all_policies(&service, query.filter.as_deref())
        .await
        .map_err(map_store_error)?;
    Ok(Json(json!({ "policies": policies })))
}

#[instrument(skip(state))]
async fn count_policies(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let count = state
        .store
        .count_policies_and_role_policies(&service)
        .await
        .map_err(map_store_error)?;
    Ok(Json(json!(count)))
}

#[instrument(skip(state, policy))]
async fn create_policy(
    State(state): State<AppState>,
    Path(service): Path<String>,
    Json(policy): Json<Policy>,
) -> Result<Json<Value>, StatusCode> {
    state
        .store
        .create_policy(&service, policy)
        .await
        .map_err(map_store_error)?;
    Ok(Json(json!({ "status": "created" })))
}

#[instrument(skip(state))]
async fn get_policy(
    State(state): State<AppState>,
    Path((service, id)): Path<(String, String)>,
) -> Result<Json<Value>, StatusCode> {
    let policy = state.store.get_policy(&service, &id).await.map_err(map_store_error)?;
    Ok(Json(json!(policy)))
}

#[instrument(skip(state))]
async fn delete_policy(
    State(state): State<AppState>,
    Path((service, id)): Path<(String, String)>,
) -> Result<Json<Value>, StatusCode> {
    state.store.delete_policy(&service, &id).await.map_err(map_store_error)?;
    Ok(Json(json!({ "status": "deleted" })))
}

#[instrument(skip(state))]
async fn delete_policies(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    state.store.delete_policies(&service).await.map_err(map_store_error)?;
    Ok(Json(json!({ "status": "deleted" })))
}

#[instrument(skip(state))]
async fn list_role_policies(
    State(state): State<AppState>,
    Path(service): Path<String>,
    Query(query): Query<FilterQuery>,
) -> Result<Json<Value>, StatusCode> {
    let role_policies = state
        .store
        .list_all_role_policies(&service, query.filter.as_deref())
        .await
        .map_err(map_store_error)?;
    Ok(Json(json!({ "rolePolicies": role_policies })))
}

#[instrument(skip(state, policy))]
async fn create_role_policy(
    State(state): State<AppState>,
    Path(service): Path<String>,
    Json(policy): Json<RolePolicy>,
) -> Result<Json<Value>, StatusCode> {
    state
        .store
        .create_role_policy(&service, policy)
        .await
        .map_err(map_store_error)?;
    Ok(Json(json!({ "status": "created" })))
}

#[instrument(skip(state))]
async fn get_role_policy(
    State(state): State<AppState>,
    Path((service, id)): Path<(String, String)>,
) -> Result<Json<Value>, StatusCode> {
    let policy = state
        .store
        .get_role_policy(&service, &id)
        .await
        .map_err(map_store_error)?;
    Ok(Json(json!(policy)))
}

#[instrument(skip(state))]
async fn delete_role_policy(
    State(state): State<AppState>,
    Path((service, id)): Path<(String, String)>,
) -> Result<Json<Value>, StatusCode> {
    state
        .store
        .delete_role_policy(&service, &id)
        .await
        .map_err(map_store_error)?;
    Ok(Json(json!({ "status": "deleted" })))
}

#[instrument(skip(state))]
async fn delete_role_policies(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    state
        .store
        .delete_role_policies(&service)
        .await
        .map_err(map_store_error)?;
    Ok(Json(json!({ "status": "deleted" })))
}

#[instrument(skip(state))]
async fn list_functions(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let functions = state.store.list_all_functions().await.map_err(map_store_error)?;
    Ok(Json(json!({ "functions": functions })))
}

#[instrument(skip(state, function))]
async fn create_function(
    State(state): State<AppState>,
    Json(function): Json<Function>,
) -> Result<Json<Value>, StatusCode> {
    state.store.create_function(function).await.map_err(map_store_error)?;
    Ok(Json(json!({ "status": "created" })))
}

#[instrument(skip(state))]
async fn get_function(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let function = state.store.get_function(&name).await.map_err(map_store_error)?;
    Ok(Json(json!(function)))
}

#[instrument(skip(state))]
async fn delete_function(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    state.store.delete_function(&name).await.map_err(map_store_error)?;
    Ok(Json(json!({ "status": "deleted" })))
}

fn map_store_error(err: aegis_core::AegisError) -> StatusCode {
    use aegis_core::AegisError::*;
    warn!(error = %err, "store operation failed");
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
