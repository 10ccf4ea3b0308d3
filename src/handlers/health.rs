//! Health check endpoint handler.
//!
//! Returns the exporter's scrape statistics as a plain-text table.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use std::sync::atomic::Ordering;
use tracing::{debug, instrument};

use crate::state::SharedState;

// Time conversion constants
const SECONDS_PER_HOUR: f64 = 3600.0;
const MINUTES_PER_HOUR: f64 = 60.0;
const HOURS_PER_DAY: f64 = 24.0;

/// Handler for the /health endpoint.
#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /health request");
    state.health_stats.record_http_request();

    let successes = state
        .health_stats
        .scrape_success_count
        .load(Ordering::Relaxed);
    let failures = state
        .health_stats
        .scrape_failure_count
        .load(Ordering::Relaxed);

    // Unhealthy only when every scrape so far has failed.
    let (status, message) = if failures > 0 && successes == 0 {
        (StatusCode::SERVICE_UNAVAILABLE, "Scrapes failing")
    } else if successes == 0 {
        (StatusCode::OK, "OK - No scrape yet")
    } else {
        (StatusCode::OK, "OK")
    };

    let uptime_hours = state.start_time.elapsed().as_secs_f64() / SECONDS_PER_HOUR;
    let uptime_str = if uptime_hours < 1.0 {
        format!("{:.1} minutes", uptime_hours * MINUTES_PER_HOUR)
    } else if uptime_hours < HOURS_PER_DAY {
        format!("{:.1} hours", uptime_hours)
    } else {
        format!("{:.1} days", uptime_hours / HOURS_PER_DAY)
    };

    let table = state.health_stats.render_table();

    debug!("Health check: {} - {}", status, message);
    (
        status,
        [("Content-Type", "text/plain; charset=utf-8")],
        format!("{message}\n\nUptime: {uptime_str}\n\n{table}"),
    )
}
