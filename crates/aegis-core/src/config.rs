//! Engine configuration. Loaded by the binaries (services, CLI), never by
//! `policy-engine` itself — config-file/env loading is a bootstrap concern,
//! but the shape of the config lives here so every binary agrees on it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on role-resolution fixed-point iterations before a
    /// `CycleDetected` diagnostic is raised. Defaults to a generous
    /// multiple of a typical role-policy count.
    pub role_resolution_iteration_cap: usize,
    /// Default deadline applied to a decision when the caller doesn't
    /// supply one explicitly.
    pub default_eval_timeout: Duration,
    /// Capacity of the discover-mode request buffer (C7).
    pub discover_buffer_capacity: usize,
    /// Capacity of the store-change event channel feeding the reactor (C6).
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            role_resolution_iteration_cap: 256,
            default_eval_timeout: Duration::from_millis(500),
            discover_buffer_capacity: 4096,
            event_channel_capacity: 1024,
        }
    }
}
