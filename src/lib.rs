//! Named Process Exporter Library
//!
//! Groups Linux processes under user-defined names and keeps per-group
//! resource counters monotonic across process exits, restarts, PID reuse and
//! reclassification. The HTTP server and CLI live in the binary; everything
//! here is framework-agnostic.
//!
//! # Usage
//!
//! ```no_run
//! use named_process_exporter::{
//!     CollectorOptions, GroupMetrics, Matcher, MatcherRules, NamedProcessCollector,
//! };
//! use prometheus::Registry;
//! use std::sync::Arc;
//!
//! let rules = MatcherRules::new(vec![Matcher {
//!     name: "web".into(),
//!     comm: "nginx".into(),
//!     ..Default::default()
//! }])
//! .unwrap();
//!
//! let collector =
//!     NamedProcessCollector::new(CollectorOptions::default(), Arc::new(rules)).unwrap();
//! let registry = Registry::new();
//! let metrics = GroupMetrics::new(&registry).unwrap();
//!
//! let report = collector.scrape().unwrap();
//! metrics.update(&report, collector.boot_time());
//! for (group, counts) in &report.groups {
//!     println!("{}: {} procs", group, counts.procs);
//! }
//! ```

pub mod collector;
pub mod error;
pub mod group;
pub mod health_stats;
pub mod metrics;
pub mod namer;
pub mod process;

// Re-export main types for convenience
pub use collector::{CollectorOptions, NamedProcessCollector, ScrapeReport};
pub use error::{CollectError, ConfigError, ReadError};
pub use group::{GroupAccumulator, GroupCounts, ThreadCounts};
pub use health_stats::HealthStats;
pub use metrics::GroupMetrics;
pub use namer::{MatchNamer, Matcher, MatcherRules, ProcNameNamer};
pub use process::{ProcAttributes, ProcFs, ProcSource, ReadOptions, Snapshot};
