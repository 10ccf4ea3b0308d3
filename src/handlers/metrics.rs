//! Metrics endpoint handler for Prometheus scraping.
//!
//! Every request runs one scrape cycle on the blocking pool, copies the report
//! into the metric families and renders the registry in the text format.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, instrument};

use crate::state::SharedState;

/// Buffer capacity for metrics encoding.
const BUFFER_CAP: usize = 256 * 1024;

/// Error type for metrics endpoint failures.
#[derive(Debug)]
pub enum MetricsError {
    ScrapeFailed,
    EncodingFailed,
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> axum::response::Response {
        let msg = match self {
            MetricsError::ScrapeFailed => "Failed to read process table",
            MetricsError::EncodingFailed => "Failed to encode metrics",
        };
        (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response()
    }
}

/// Handler for the telemetry endpoint.
#[instrument(skip(state))]
pub async fn metrics_handler(State(state): State<SharedState>) -> Result<String, MetricsError> {
    let start = Instant::now();
    debug!("Processing metrics request");
    state.health_stats.record_http_request();
    state.health_stats.record_metrics_endpoint_call();

    let collector = Arc::clone(&state.collector);
    let result = tokio::task::spawn_blocking(move || collector.scrape())
        .await
        .map_err(|e| {
            error!("Scrape task failed: {}", e);
            state.metrics.scrape_errors.inc();
            state.health_stats.record_scrape_failure();
            MetricsError::ScrapeFailed
        })?;

    let report = match result {
        Ok(r) => r,
        Err(e) => {
            error!("Scrape failed: {}", e);
            state.metrics.scrape_errors.inc();
            state.health_stats.record_scrape_failure();
            return Err(MetricsError::ScrapeFailed);
        }
    };

    state.health_stats.record_scrape(
        report.processes_seen as u64,
        report.groups.values().filter(|g| g.procs > 0).count() as u64,
        report.duration.as_secs_f64(),
        report.procread_errors,
        report.partial_errors,
    );

    let body = {
        let _guard = state.render_lock.lock().await;
        if !state.metrics.update(&report, state.collector.boot_time()) {
            debug!("A newer scrape was already published, serving it instead");
        }
        encode(&state)?
    };

    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    state.health_stats.record_request_duration(elapsed_ms);
    state
        .health_stats
        .record_metrics_response_size_kb(body.len() as f64 / 1024.0);
    debug!(
        "Metrics request served: {} groups, {} bytes in {:.2}ms",
        report.groups.len(),
        body.len(),
        elapsed_ms
    );

    Ok(body)
}

/// Renders the registry in the Prometheus text format.
pub fn encode(state: &SharedState) -> Result<String, MetricsError> {
    let encoder = TextEncoder::new();
    let families = state.registry.gather();
    let mut buffer = Vec::with_capacity(BUFFER_CAP);
    encoder.encode(&families, &mut buffer).map_err(|e| {
        error!("Failed to encode metrics: {}", e);
        MetricsError::EncodingFailed
    })?;
    String::from_utf8(buffer).map_err(|e| {
        error!("Metrics output is not valid UTF-8: {}", e);
        MetricsError::EncodingFailed
    })
}
