//! HTTP endpoint handlers for the exporter.
//!
//! - `/`: landing page
//! - telemetry path (default `/metrics`): Prometheus metrics endpoint
//! - `/health`: scrape statistics

pub mod health;
pub mod metrics;
pub mod root;

// Re-export handlers
pub use health::health_handler;
pub use metrics::metrics_handler;
pub use root::root_handler;
