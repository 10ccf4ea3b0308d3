//! Application state management for the exporter.
//!
//! This module defines the shared application state that is passed
//! to HTTP handlers.

use named_process_exporter::{GroupMetrics, HealthStats, NamedProcessCollector};
use prometheus::Registry;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use crate::config::Config;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

/// Global application state shared across requests.
pub struct AppState {
    pub registry: Registry,
    pub metrics: GroupMetrics,
    pub collector: Arc<NamedProcessCollector>,
    /// Serializes metric updates with rendering so one response never mixes
    /// two scrapes.
    pub render_lock: Mutex<()>,
    pub config: Arc<Config>,
    pub health_stats: Arc<HealthStats>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}
