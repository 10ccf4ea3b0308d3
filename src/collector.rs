//! Scrape orchestration: snapshot, classify, accumulate.
//!
//! The collector owns the accumulator behind a mutex so concurrent scrapes are
//! serialized and every scrape sees the state left by the previous one.

use ahash::AHashMap as HashMap;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::error::CollectError;
use crate::group::{GroupAccumulator, GroupCounts, ThreadCounts, ThreadKey, TreeWalker};
use crate::namer::MatchNamer;
use crate::process::{ProcAttributes, ProcFs, ProcSource, ReadOptions};

/// Behavior switches for a collector.
#[derive(Debug, Clone)]
pub struct CollectorOptions {
    pub procfs_path: PathBuf,
    /// Roll unmatched children up into their nearest matched ancestor's group.
    pub children: bool,
    /// Gather and accumulate the per-thread breakdown.
    pub threads: bool,
    /// Read smaps for proportional memory.
    pub gather_smaps: bool,
    /// Re-run the namer on every scrape instead of reusing the first decision.
    pub recheck: bool,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            procfs_path: PathBuf::from("/proc"),
            children: false,
            threads: true,
            gather_smaps: true,
            recheck: false,
        }
    }
}

impl CollectorOptions {
    fn read_options(&self) -> ReadOptions {
        ReadOptions {
            gather_smaps: self.gather_smaps,
            threads: self.threads,
        }
    }
}

/// Everything one scrape produced.
#[derive(Debug, Clone, Default)]
pub struct ScrapeReport {
    pub groups: BTreeMap<Arc<str>, GroupCounts>,
    pub threads: BTreeMap<ThreadKey, ThreadCounts>,
    /// Processes seen in the snapshot, matched or not.
    pub processes_seen: usize,
    pub procread_errors: u64,
    pub partial_errors: u64,
    pub duration: Duration,
    /// Increases with every successful scrape of one collector. Reports of
    /// overlapping scrapes may be consumed out of order; the larger one is newer.
    pub sequence: u64,
}

/// Groups processes and keeps per-group counters across scrapes.
pub struct NamedProcessCollector {
    source: Box<dyn ProcSource>,
    namer: Arc<dyn MatchNamer>,
    options: CollectorOptions,
    state: Mutex<GroupAccumulator>,
}

impl NamedProcessCollector {
    /// Builds a collector reading from `options.procfs_path`.
    pub fn new(options: CollectorOptions, namer: Arc<dyn MatchNamer>) -> Result<Self, CollectError> {
        let source = ProcFs::new(options.procfs_path.clone())?;
        Ok(Self::with_source(Box::new(source), namer, options))
    }

    /// Builds a collector over an arbitrary process source.
    pub fn with_source(
        source: Box<dyn ProcSource>,
        namer: Arc<dyn MatchNamer>,
        options: CollectorOptions,
    ) -> Self {
        Self {
            source,
            namer,
            options,
            state: Mutex::new(GroupAccumulator::new()),
        }
    }

    pub fn options(&self) -> &CollectorOptions {
        &self.options
    }

    /// Boot time of the observed system, in seconds since the epoch.
    pub fn boot_time(&self) -> u64 {
        self.source.boot_time_seconds()
    }

    fn lock_state(&self) -> MutexGuard<'_, GroupAccumulator> {
        // A panicking scrape leaves the ledger consistent at field level.
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Accumulator lock was poisoned, continuing with last state");
            poisoned.into_inner()
        })
    }

    /// Runs one scrape cycle.
    ///
    /// A failed snapshot returns before the accumulated state is touched.
    #[instrument(skip(self))]
    pub fn scrape(&self) -> Result<ScrapeReport, CollectError> {
        let start = Instant::now();
        let mut state = self.lock_state();

        let snapshot = self.source.snapshot(&self.options.read_options())?;

        let mut walker = TreeWalker::new(self.namer.as_ref(), self.options.children);
        let groups = if self.options.recheck {
            walker.resolve(&snapshot.procs, |_| None)
        } else {
            walker.resolve(&snapshot.procs, |id| state.prior(id))
        };

        let report = state.update(&snapshot.procs, &groups, Utc::now());
        drop(state);

        let duration = start.elapsed();
        debug!(
            "Scrape finished: {} processes, {} matched, {} groups in {:.2}ms",
            snapshot.procs.len(),
            groups.len(),
            report.groups.len(),
            duration.as_secs_f64() * 1000.0
        );

        Ok(ScrapeReport {
            groups: report.groups,
            threads: report.threads,
            processes_seen: snapshot.procs.len(),
            procread_errors: snapshot.procread_errors,
            partial_errors: snapshot.partial_errors,
            duration,
            sequence: report.sequence,
        })
    }

    /// Runs one scrape and discards the result, so the next scrape reports
    /// counters relative to a populated state.
    pub fn prime(&self) -> Result<(), CollectError> {
        self.scrape().map(|_| ())
    }

    /// Current group membership, without touching the accumulated state.
    ///
    /// Always asks the namer, ignoring remembered classifications.
    pub fn membership(&self) -> Result<BTreeMap<Arc<str>, Vec<ProcAttributes>>, CollectError> {
        let opts = ReadOptions {
            gather_smaps: false,
            threads: false,
        };
        let snapshot = self.source.snapshot(&opts)?;
        let mut walker = TreeWalker::new(self.namer.as_ref(), self.options.children);
        let groups: HashMap<u32, Arc<str>> = walker.resolve(&snapshot.procs, |_| None);

        let mut out: BTreeMap<Arc<str>, Vec<ProcAttributes>> = BTreeMap::new();
        for p in snapshot.procs {
            if let Some(g) = groups.get(&p.pid) {
                out.entry(Arc::clone(g)).or_default().push(p);
            }
        }
        Ok(out)
    }
}
