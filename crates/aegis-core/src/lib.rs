//! # Aegis Core
//!
//! Domain model, store contract and error types for the Aegis
//! authorization decision engine.
//!
//! This crate carries no evaluation logic itself — see `policy-engine` for
//! the condition evaluator, role resolver, policy matcher and store-change
//! reactor. `aegis-core` only defines what everyone else agrees on: the
//! shape of a `Service`/`Policy`/`RolePolicy`/`Function`, the `Store`
//! contract external backends implement, and the error kinds that cross
//! crate boundaries.

pub mod config;
pub mod error;
pub mod filter;
pub mod glob;
pub mod memstore;
pub mod model;
pub mod principal;
pub mod store;
pub mod value;

pub use error::{AegisError, Result};
pub use model::{
    dnf_matches, EventContent, EventType, Function, PolicyAndRolePolicyCount, PolicyStore,
    Permission, PrincipalDnf, Reason, RequestContext, RolePolicy, Service, ServiceScoped,
    GLOBAL_SERVICE,
};
pub use model::{Effect, Policy};
pub use principal::{Principal, PrincipalKind, EVERYONE};
pub use store::{DiscoverRequestManager, Store};
pub use value::Value;

/// Current Aegis version for compatibility checks.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Aegis build information for telemetry and debugging.
pub const BUILD_INFO: &str = concat!(
    "Aegis ",
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("CARGO_PKG_NAME"),
    ")"
);

/// Standard HTTP endpoint paths for the Aegis services.
pub mod endpoints {
    pub const HEALTH: &str = "/health";
    pub const METRICS: &str = "/metrics";
    pub const API_V1_SERVICES: &str = "/api/v1/services";
    pub const API_V1_POLICIES: &str = "/api/v1/policies";
    pub const API_V1_ROLE_POLICIES: &str = "/api/v1/role-policies";
    pub const API_V1_FUNCTIONS: &str = "/api/v1/functions";
    pub const API_V1_DECISIONS: &str = "/api/v1/decisions";
}
