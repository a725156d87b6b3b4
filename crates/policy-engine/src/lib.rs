pub mod discover;
pub mod engine;
pub mod expr;
pub mod functions;
pub mod matcher;
pub mod model;
pub mod reactor;
pub mod roles;

pub use engine::{AegisEngine, EngineConfig};
pub use functions::{FunctionCallError, FunctionInvoker, FunctionTable};
pub use matcher::Decision;
pub use model::{ServiceIndex, Snapshot};

pub use aegis_core::error::{AegisError, Result};
