//! Error types for the Aegis authorization decision engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AegisError>;

#[derive(Error, Debug)]
pub enum AegisError {
    #[error("entity not found: {kind} {id}")]
    EntityNotFound { kind: String, id: String },

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("store error: {reason}")]
    StoreError { reason: String },

    #[error("discover error: {reason}")]
    DiscoverError { reason: String },

    #[error("function call failed: {reason}")]
    FunctionCallError { reason: String },

    #[error("attribute missing: {name}")]
    AttributeMissing { name: String },

    #[error("role resolution exceeded iteration cap ({cap}) for service '{service}'")]
    CycleDetected { service: String, cap: usize },

    #[error("snapshot stale, full reload required: {reason}")]
    SnapshotStale { reason: String },

    #[error("serialization error: {source}")]
    SerializationError {
        #[from]
        source: serde_json::Error,
    },
}
