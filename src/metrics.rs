//! Prometheus metric families for named process groups.
//!
//! Values come from a [`ScrapeReport`]. Cumulative counters are exposed with
//! `reset()` + `inc_by()` because the report already carries the absolute,
//! monotonic value.

use prometheus::{Counter, CounterVec, Gauge, GaugeVec, Opts, Registry};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::collector::ScrapeReport;
use crate::process::ticks_to_seconds;
use crate::process::CLK_TCK;

const GROUP: &[&str] = &["groupname"];
const GROUP_MODE: &[&str] = &["groupname", "mode"];
const GROUP_CTX: &[&str] = &["groupname", "ctxswitchtype"];
const GROUP_MEM: &[&str] = &["groupname", "memtype"];
const GROUP_STATE: &[&str] = &["groupname", "state"];
const THREAD: &[&str] = &["groupname", "threadname"];
const THREAD_MODE: &[&str] = &["groupname", "threadname", "mode"];
const THREAD_IO: &[&str] = &["groupname", "threadname", "iomode"];
const THREAD_CTX: &[&str] = &["groupname", "threadname", "ctxswitchtype"];

/// All metric families exported by the exporter.
#[derive(Clone)]
pub struct GroupMetrics {
    // ========== Group Metrics ==========
    pub num_procs: GaugeVec,
    pub cpu_seconds_total: CounterVec, // labels: groupname, mode
    pub read_bytes_total: CounterVec,
    pub write_bytes_total: CounterVec,
    pub major_page_faults_total: CounterVec,
    pub minor_page_faults_total: CounterVec,
    pub context_switches_total: CounterVec, // labels: groupname, ctxswitchtype
    pub memory_bytes: GaugeVec,             // labels: groupname, memtype
    pub open_filedesc: GaugeVec,
    pub worst_fd_ratio: GaugeVec,
    pub oldest_start_time_seconds: GaugeVec,
    pub num_threads: GaugeVec,
    pub states: GaugeVec, // labels: groupname, state

    // ========== Thread Metrics ==========
    pub thread_count: GaugeVec,
    pub thread_cpu_seconds_total: CounterVec,
    pub thread_io_bytes_total: CounterVec,
    pub thread_major_page_faults_total: CounterVec,
    pub thread_minor_page_faults_total: CounterVec,
    pub thread_context_switches_total: CounterVec,

    // ========== Scrape Health ==========
    pub scrape_errors: Counter,
    pub scrape_procread_errors: Counter,
    pub scrape_partial_errors: Counter,
    pub scrape_duration_seconds: Gauge,

    /// Sequence of the newest report applied so far.
    applied: Arc<AtomicU64>,
}

fn gauge_vec(name: &str, help: &str, labels: &[&str]) -> Result<GaugeVec, prometheus::Error> {
    GaugeVec::new(Opts::new(name, help), labels)
}

fn counter_vec(name: &str, help: &str, labels: &[&str]) -> Result<CounterVec, prometheus::Error> {
    CounterVec::new(Opts::new(name, help), labels)
}

/// Sets a counter child to an absolute cumulative value.
fn set_counter(vec: &CounterVec, labels: &[&str], value: f64) {
    let c = vec.with_label_values(labels);
    c.reset();
    c.inc_by(value);
}

impl GroupMetrics {
    /// Creates and registers all metric families with the registry.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let num_procs = gauge_vec(
            "namedprocess_namegroup_num_procs",
            "number of processes in this group",
            GROUP,
        )?;
        let cpu_seconds_total = counter_vec(
            "namedprocess_namegroup_cpu_seconds_total",
            "Cpu user usage in seconds",
            GROUP_MODE,
        )?;
        let read_bytes_total = counter_vec(
            "namedprocess_namegroup_read_bytes_total",
            "number of bytes read by this group",
            GROUP,
        )?;
        let write_bytes_total = counter_vec(
            "namedprocess_namegroup_write_bytes_total",
            "number of bytes written by this group",
            GROUP,
        )?;
        let major_page_faults_total = counter_vec(
            "namedprocess_namegroup_major_page_faults_total",
            "Major page faults",
            GROUP,
        )?;
        let minor_page_faults_total = counter_vec(
            "namedprocess_namegroup_minor_page_faults_total",
            "Minor page faults",
            GROUP,
        )?;
        let context_switches_total = counter_vec(
            "namedprocess_namegroup_context_switches_total",
            "Context switches",
            GROUP_CTX,
        )?;
        let memory_bytes = gauge_vec(
            "namedprocess_namegroup_memory_bytes",
            "number of bytes of memory in use",
            GROUP_MEM,
        )?;
        let open_filedesc = gauge_vec(
            "namedprocess_namegroup_open_filedesc",
            "number of open file descriptors for this group",
            GROUP,
        )?;
        let worst_fd_ratio = gauge_vec(
            "namedprocess_namegroup_worst_fd_ratio",
            "the worst (closest to 1) ratio between open fds and max fds among all procs in this group",
            GROUP,
        )?;
        let oldest_start_time_seconds = gauge_vec(
            "namedprocess_namegroup_oldest_start_time_seconds",
            "start time in seconds since 1970/01/01 of oldest process in group",
            GROUP,
        )?;
        let num_threads = gauge_vec(
            "namedprocess_namegroup_num_threads",
            "Number of threads",
            GROUP,
        )?;
        let states = gauge_vec(
            "namedprocess_namegroup_states",
            "Number of processes in states Running, Sleeping, Waiting, Zombie, or Other",
            GROUP_STATE,
        )?;

        let thread_count = gauge_vec(
            "namedprocess_namegroup_thread_count",
            "Number of threads in this group with same threadname",
            THREAD,
        )?;
        let thread_cpu_seconds_total = counter_vec(
            "namedprocess_namegroup_thread_cpu_seconds_total",
            "Cpu user/system usage in seconds",
            THREAD_MODE,
        )?;
        let thread_io_bytes_total = counter_vec(
            "namedprocess_namegroup_thread_io_bytes_total",
            "number of bytes read/written by these threads",
            THREAD_IO,
        )?;
        let thread_major_page_faults_total = counter_vec(
            "namedprocess_namegroup_thread_major_page_faults_total",
            "Major page faults for these threads",
            THREAD,
        )?;
        let thread_minor_page_faults_total = counter_vec(
            "namedprocess_namegroup_thread_minor_page_faults_total",
            "Minor page faults for these threads",
            THREAD,
        )?;
        let thread_context_switches_total = counter_vec(
            "namedprocess_namegroup_thread_context_switches_total",
            "Context switches for these threads",
            THREAD_CTX,
        )?;

        let scrape_errors = Counter::new(
            "namedprocess_scrape_errors",
            "general scrape errors: no proc metrics collected during a cycle",
        )?;
        let scrape_procread_errors = Counter::new(
            "namedprocess_scrape_procread_errors",
            "incremented each time a proc's metrics collection fails",
        )?;
        let scrape_partial_errors = Counter::new(
            "namedprocess_scrape_partial_errors",
            "incremented each time a tracked proc's metrics collection fails partially, e.g. unreadable I/O stats",
        )?;
        let scrape_duration_seconds = Gauge::new(
            "namedprocess_scrape_duration_seconds",
            "Duration of the last scrape in seconds",
        )?;

        // ========== Register All Metrics ==========
        registry.register(Box::new(num_procs.clone()))?;
        registry.register(Box::new(cpu_seconds_total.clone()))?;
        registry.register(Box::new(read_bytes_total.clone()))?;
        registry.register(Box::new(write_bytes_total.clone()))?;
        registry.register(Box::new(major_page_faults_total.clone()))?;
        registry.register(Box::new(minor_page_faults_total.clone()))?;
        registry.register(Box::new(context_switches_total.clone()))?;
        registry.register(Box::new(memory_bytes.clone()))?;
        registry.register(Box::new(open_filedesc.clone()))?;
        registry.register(Box::new(worst_fd_ratio.clone()))?;
        registry.register(Box::new(oldest_start_time_seconds.clone()))?;
        registry.register(Box::new(num_threads.clone()))?;
        registry.register(Box::new(states.clone()))?;

        registry.register(Box::new(thread_count.clone()))?;
        registry.register(Box::new(thread_cpu_seconds_total.clone()))?;
        registry.register(Box::new(thread_io_bytes_total.clone()))?;
        registry.register(Box::new(thread_major_page_faults_total.clone()))?;
        registry.register(Box::new(thread_minor_page_faults_total.clone()))?;
        registry.register(Box::new(thread_context_switches_total.clone()))?;

        registry.register(Box::new(scrape_errors.clone()))?;
        registry.register(Box::new(scrape_procread_errors.clone()))?;
        registry.register(Box::new(scrape_partial_errors.clone()))?;
        registry.register(Box::new(scrape_duration_seconds.clone()))?;

        Ok(Self {
            num_procs,
            cpu_seconds_total,
            read_bytes_total,
            write_bytes_total,
            major_page_faults_total,
            minor_page_faults_total,
            context_switches_total,
            memory_bytes,
            open_filedesc,
            worst_fd_ratio,
            oldest_start_time_seconds,
            num_threads,
            states,
            thread_count,
            thread_cpu_seconds_total,
            thread_io_bytes_total,
            thread_major_page_faults_total,
            thread_minor_page_faults_total,
            thread_context_switches_total,
            scrape_errors,
            scrape_procread_errors,
            scrape_partial_errors,
            scrape_duration_seconds,
            applied: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Copies a scrape report into the metric families.
    ///
    /// `boot_time` (seconds since the epoch) turns start ticks into timestamps.
    /// A report older than one already applied only adds its error counts and
    /// returns false, so exported counters never step back.
    pub fn update(&self, report: &ScrapeReport, boot_time: u64) -> bool {
        self.scrape_procread_errors
            .inc_by(report.procread_errors as f64);
        self.scrape_partial_errors
            .inc_by(report.partial_errors as f64);

        let newest = self.applied.fetch_max(report.sequence, Ordering::AcqRel);
        if report.sequence < newest {
            debug!(
                "Skipping stale scrape report {} (already applied {})",
                report.sequence, newest
            );
            return false;
        }

        // Gauges describe the live set only.
        self.reset_gauges();

        for (group, g) in &report.groups {
            let name: &str = group;

            self.num_procs
                .with_label_values(&[name])
                .set(g.procs as f64);

            set_counter(
                &self.cpu_seconds_total,
                &[name, "user"],
                ticks_to_seconds(g.counts.cpu_user_ticks),
            );
            set_counter(
                &self.cpu_seconds_total,
                &[name, "system"],
                ticks_to_seconds(g.counts.cpu_system_ticks),
            );
            set_counter(&self.read_bytes_total, &[name], g.counts.read_bytes as f64);
            set_counter(&self.write_bytes_total, &[name], g.counts.write_bytes as f64);
            set_counter(
                &self.major_page_faults_total,
                &[name],
                g.counts.major_page_faults as f64,
            );
            set_counter(
                &self.minor_page_faults_total,
                &[name],
                g.counts.minor_page_faults as f64,
            );
            set_counter(
                &self.context_switches_total,
                &[name, "voluntary"],
                g.counts.ctx_switch_voluntary as f64,
            );
            set_counter(
                &self.context_switches_total,
                &[name, "nonvoluntary"],
                g.counts.ctx_switch_nonvoluntary as f64,
            );

            for (memtype, value) in [
                ("resident", g.memory.resident),
                ("virtual", g.memory.virtual_bytes),
                ("swapped", g.memory.swapped),
                ("proportionalResident", g.memory.proportional_resident),
                ("proportionalSwapped", g.memory.proportional_swapped),
            ] {
                self.memory_bytes
                    .with_label_values(&[name, memtype])
                    .set(value as f64);
            }

            self.open_filedesc
                .with_label_values(&[name])
                .set(g.open_fds as f64);
            self.worst_fd_ratio
                .with_label_values(&[name])
                .set(g.worst_fd_ratio);
            self.oldest_start_time_seconds
                .with_label_values(&[name])
                .set(start_time_seconds(g.oldest_start_time, boot_time));
            self.num_threads
                .with_label_values(&[name])
                .set(g.num_threads as f64);

            for (state, count) in [
                ("Running", g.states.running),
                ("Sleeping", g.states.sleeping),
                ("Waiting", g.states.waiting),
                ("Zombie", g.states.zombie),
                ("Other", g.states.other),
            ] {
                self.states
                    .with_label_values(&[name, state])
                    .set(count as f64);
            }
        }

        for ((group, thread), t) in &report.threads {
            let (group, thread): (&str, &str) = (group, thread);
            self.thread_count
                .with_label_values(&[group, thread])
                .set(t.threads as f64);
            set_counter(
                &self.thread_cpu_seconds_total,
                &[group, thread, "user"],
                ticks_to_seconds(t.counts.cpu_user_ticks),
            );
            set_counter(
                &self.thread_cpu_seconds_total,
                &[group, thread, "system"],
                ticks_to_seconds(t.counts.cpu_system_ticks),
            );
            set_counter(
                &self.thread_io_bytes_total,
                &[group, thread, "read"],
                t.counts.read_bytes as f64,
            );
            set_counter(
                &self.thread_io_bytes_total,
                &[group, thread, "write"],
                t.counts.write_bytes as f64,
            );
            set_counter(
                &self.thread_major_page_faults_total,
                &[group, thread],
                t.counts.major_page_faults as f64,
            );
            set_counter(
                &self.thread_minor_page_faults_total,
                &[group, thread],
                t.counts.minor_page_faults as f64,
            );
            set_counter(
                &self.thread_context_switches_total,
                &[group, thread, "voluntary"],
                t.counts.ctx_switch_voluntary as f64,
            );
            set_counter(
                &self.thread_context_switches_total,
                &[group, thread, "nonvoluntary"],
                t.counts.ctx_switch_nonvoluntary as f64,
            );
        }

        self.scrape_duration_seconds
            .set(report.duration.as_secs_f64());
        true
    }

    /// Resets gauge families. Counters are never reset as a whole.
    pub fn reset_gauges(&self) {
        self.num_procs.reset();
        self.memory_bytes.reset();
        self.open_filedesc.reset();
        self.worst_fd_ratio.reset();
        self.oldest_start_time_seconds.reset();
        self.num_threads.reset();
        self.states.reset();
        self.thread_count.reset();
    }
}

/// Start time in seconds since the epoch, 0 for a group with no live member.
fn start_time_seconds(start_ticks: Option<u64>, boot_time: u64) -> f64 {
    match start_ticks {
        Some(ticks) if *CLK_TCK > 0.0 => boot_time as f64 + ticks as f64 / *CLK_TCK,
        _ => 0.0,
    }
}
