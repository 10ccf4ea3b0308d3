//! Internal statistics of the exporter, rendered by the `/health` endpoint.
//!
//! Tracks scrape performance, process read errors and HTTP request timing.

use std::collections::VecDeque;
use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock as StdRwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Running statistics for a single metric.
#[derive(Clone, Copy, Default)]
pub struct RunningStat {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
}

impl RunningStat {
    pub fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
            self.last = value;
            self.sum = value;
            self.count = 1;
            return;
        }
        self.count += 1;
        self.sum += value;
        self.last = value;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / (self.count as f64)
        }
    }
}

/// Thread-safe wrapper for running statistics.
#[derive(Default)]
pub struct Stat {
    inner: Mutex<RunningStat>,
}

/// `(current, average, max, min, count)`
pub type StatSnapshot = (f64, f64, f64, f64, u64);

impl Stat {
    pub fn add_sample(&self, value: f64) {
        if let Ok(mut s) = self.inner.lock() {
            s.add(value);
        }
    }

    pub fn snapshot(&self) -> StatSnapshot {
        if let Ok(s) = self.inner.lock() {
            (s.last, s.avg(), s.max, s.min, s.count)
        } else {
            (0.0, 0.0, 0.0, 0.0, 0)
        }
    }
}

/// Timestamps of recent HTTP requests, kept for ten minutes.
pub struct RequestTimestamps {
    inner: Mutex<VecDeque<Instant>>,
}

impl Default for RequestTimestamps {
    fn default() -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(1024)),
        }
    }
}

impl RequestTimestamps {
    pub fn record(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            let now = Instant::now();
            guard.push_back(now);
            if let Some(cutoff) = now.checked_sub(Duration::from_secs(600)) {
                while guard.front().is_some_and(|&t| t < cutoff) {
                    guard.pop_front();
                }
            }
        }
    }

    pub fn count_last_minute(&self) -> u64 {
        let Ok(guard) = self.inner.lock() else {
            return 0;
        };
        match Instant::now().checked_sub(Duration::from_secs(60)) {
            Some(cutoff) => guard.iter().filter(|&&t| t >= cutoff).count() as u64,
            None => guard.len() as u64,
        }
    }
}

/// Scrape and HTTP statistics of the running exporter.
pub struct HealthStats {
    // Scrape performance
    pub scanned_processes: Stat,
    pub active_groups: Stat,
    pub scrape_duration_seconds: Stat,
    pub scrape_success_count: AtomicU64,
    pub scrape_failure_count: AtomicU64,

    // Error tracking
    pub procread_errors: AtomicU64,
    pub partial_errors: AtomicU64,

    // HTTP server stats
    pub http_request_timestamps: RequestTimestamps,
    pub request_duration_ms: Stat,
    pub metrics_endpoint_calls: AtomicU64,
    pub metrics_response_size_kb: Stat,

    // Timing
    pub start_time: Instant,
    pub last_scrape_time: StdRwLock<Option<DateTime<Utc>>>,
}

impl Default for HealthStats {
    fn default() -> Self {
        Self {
            scanned_processes: Stat::default(),
            active_groups: Stat::default(),
            scrape_duration_seconds: Stat::default(),
            scrape_success_count: AtomicU64::new(0),
            scrape_failure_count: AtomicU64::new(0),
            procread_errors: AtomicU64::new(0),
            partial_errors: AtomicU64::new(0),
            http_request_timestamps: RequestTimestamps::default(),
            request_duration_ms: Stat::default(),
            metrics_endpoint_calls: AtomicU64::new(0),
            metrics_response_size_kb: Stat::default(),
            start_time: Instant::now(),
            last_scrape_time: StdRwLock::new(None),
        }
    }
}

impl HealthStats {
    pub fn new() -> Self {
        Default::default()
    }

    /// Records a successful scrape.
    pub fn record_scrape(
        &self,
        scanned: u64,
        active_groups: u64,
        duration_seconds: f64,
        procread_errors: u64,
        partial_errors: u64,
    ) {
        self.scanned_processes.add_sample(scanned as f64);
        self.active_groups.add_sample(active_groups as f64);
        self.scrape_duration_seconds.add_sample(duration_seconds);
        self.scrape_success_count.fetch_add(1, Ordering::Relaxed);
        self.procread_errors
            .fetch_add(procread_errors, Ordering::Relaxed);
        self.partial_errors
            .fetch_add(partial_errors, Ordering::Relaxed);
        if let Ok(mut guard) = self.last_scrape_time.write() {
            *guard = Some(Utc::now());
        }
    }

    pub fn record_scrape_failure(&self) {
        self.scrape_failure_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_http_request(&self) {
        self.http_request_timestamps.record();
    }

    pub fn record_request_duration(&self, duration_ms: f64) {
        self.request_duration_ms.add_sample(duration_ms);
    }

    pub fn record_metrics_endpoint_call(&self) {
        self.metrics_endpoint_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_metrics_response_size_kb(&self, size_kb: f64) {
        self.metrics_response_size_kb.add_sample(size_kb);
    }

    pub fn get_scrape_success_rate(&self) -> f64 {
        let success = self.scrape_success_count.load(Ordering::Relaxed);
        let failure = self.scrape_failure_count.load(Ordering::Relaxed);
        let total = success + failure;
        if total == 0 {
            100.0
        } else {
            (success as f64 / total as f64) * 100.0
        }
    }

    pub fn get_uptime_hours(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64() / 3600.0
    }

    pub fn get_last_scrape_time_str(&self) -> String {
        match self.last_scrape_time.read() {
            Ok(guard) => match *guard {
                Some(t) => t.format("%H:%M:%S").to_string(),
                None => "N/A".to_string(),
            },
            Err(_) => "N/A".to_string(),
        }
    }

    pub fn render_table(&self) -> String {
        let left_col = 26usize;
        let col_w = 12usize;

        let row = |out: &mut String, label: &str, s: StatSnapshot, precision: usize| {
            let (cur, avg, max, min, _) = s;
            writeln!(
                out,
                "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
                label,
                format!("{:.p$}", cur, p = precision),
                format!("{:.p$}", avg, p = precision.max(1)),
                format!("{:.p$}", max, p = precision),
                format!("{:.p$}", min, p = precision),
                left = left_col,
                col = col_w
            )
            .ok();
        };
        let single = |out: &mut String, label: &str, value: String| {
            writeln!(
                out,
                "{:left$} | {:^col$}",
                label,
                value,
                left = left_col,
                col = col_w
            )
            .ok();
        };

        let mut out = String::new();

        writeln!(out, "HEALTH ENDPOINT - EXPORTER INTERNAL STATS").ok();
        writeln!(out, "==========================================").ok();
        writeln!(out).ok();

        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "",
            "current",
            "average",
            "max",
            "min",
            left = left_col,
            col = col_w
        )
        .ok();

        writeln!(out).ok();
        writeln!(out, "SCRAPE PERFORMANCE").ok();
        writeln!(out, "------------------").ok();
        row(&mut out, "scanned_processes", self.scanned_processes.snapshot(), 0);
        row(&mut out, "active_groups", self.active_groups.snapshot(), 0);
        row(
            &mut out,
            "scrape_duration (s)",
            self.scrape_duration_seconds.snapshot(),
            3,
        );
        single(
            &mut out,
            "scrape_success_rate (%)",
            format!("{:.1}", self.get_scrape_success_rate()),
        );

        writeln!(out).ok();
        writeln!(out, "ERRORS").ok();
        writeln!(out, "------").ok();
        single(
            &mut out,
            "scrape_failures",
            self.scrape_failure_count.load(Ordering::Relaxed).to_string(),
        );
        single(
            &mut out,
            "procread_errors",
            self.procread_errors.load(Ordering::Relaxed).to_string(),
        );
        single(
            &mut out,
            "partial_errors",
            self.partial_errors.load(Ordering::Relaxed).to_string(),
        );

        writeln!(out).ok();
        writeln!(out, "HTTP SERVER").ok();
        writeln!(out, "-----------").ok();
        row(
            &mut out,
            "request_duration (ms)",
            self.request_duration_ms.snapshot(),
            2,
        );
        row(
            &mut out,
            "response_size (KB)",
            self.metrics_response_size_kb.snapshot(),
            1,
        );
        single(
            &mut out,
            "requests_last_minute",
            self.http_request_timestamps.count_last_minute().to_string(),
        );
        single(
            &mut out,
            "metrics_endpoint_calls",
            self.metrics_endpoint_calls
                .load(Ordering::Relaxed)
                .to_string(),
        );

        writeln!(out).ok();
        writeln!(
            out,
            "uptime: {:.2}h | last scrape: {}",
            self.get_uptime_hours(),
            self.get_last_scrape_time_str()
        )
        .ok();

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stat_tracks_min_max_avg() {
        let mut s = RunningStat::default();
        for v in [3.0, 1.0, 5.0] {
            s.add(v);
        }
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 5.0);
        assert_eq!(s.last, 5.0);
        assert!((s.avg() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_success_rate_defaults_to_full() {
        let stats = HealthStats::new();
        assert_eq!(stats.get_scrape_success_rate(), 100.0);
        stats.record_scrape(10, 2, 0.01, 0, 0);
        stats.record_scrape_failure();
        assert!((stats.get_scrape_success_rate() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_render_table_lists_sections() {
        let stats = HealthStats::new();
        stats.record_scrape(120, 4, 0.025, 3, 1);
        let table = stats.render_table();
        assert!(table.contains("SCRAPE PERFORMANCE"));
        assert!(table.contains("scanned_processes"));
        assert!(table.contains("procread_errors"));
        assert_ne!(stats.get_last_scrape_time_str(), "N/A");
    }
}
