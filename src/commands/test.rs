//! Test command implementation.
//!
//! Runs a priming scrape plus a number of measured scrapes and prints the
//! per-group results.

use std::thread;
use std::time::Duration;

use named_process_exporter::process::ticks_to_seconds;
use named_process_exporter::{NamedProcessCollector, ScrapeReport};

use crate::config::{build_namer, collector_options, Config};

/// Tests metrics collection.
pub fn command_test(
    iterations: usize,
    interval: u64,
    verbose: bool,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("🧪 Named Process Exporter - Test Mode");
    println!("======================================");

    let namer = build_namer(config)?;
    let collector = NamedProcessCollector::new(collector_options(config), namer)?;

    collector.prime()?;
    println!("\n   Primed initial state");

    for iteration in 1..=iterations {
        thread::sleep(Duration::from_secs(interval));
        println!("\n🔄 Iteration {}/{}:", iteration, iterations);

        let report = collector.scrape()?;
        println!(
            "   ⏱️  Scrape duration: {:.2}ms",
            report.duration.as_secs_f64() * 1000.0
        );
        println!(
            "   📊 Processes: {} seen, {} unreadable, {} partial",
            report.processes_seen, report.procread_errors, report.partial_errors
        );
        print_groups(&report);
        if verbose {
            print_threads(&report);
        }
    }

    println!("\n✅ Test completed successfully");
    Ok(())
}

fn print_groups(report: &ScrapeReport) {
    println!(
        "   {:24} {:>6} {:>10} {:>10} {:>12} {:>12} {:>8}",
        "group", "procs", "user (s)", "sys (s)", "read (B)", "rss (MB)", "fds"
    );
    for (name, g) in &report.groups {
        println!(
            "   {:24} {:>6} {:>10.2} {:>10.2} {:>12} {:>12} {:>8}",
            name,
            g.procs,
            ticks_to_seconds(g.counts.cpu_user_ticks),
            ticks_to_seconds(g.counts.cpu_system_ticks),
            g.counts.read_bytes,
            g.memory.resident / 1024 / 1024,
            g.open_fds
        );
    }
}

fn print_threads(report: &ScrapeReport) {
    if report.threads.is_empty() {
        return;
    }
    println!("\n   Threads:");
    for ((group, thread), t) in &report.threads {
        println!(
            "   ├─ {}/{}: {} threads, user {:.2}s, sys {:.2}s",
            group,
            thread,
            t.threads,
            ticks_to_seconds(t.counts.cpu_user_ticks),
            ticks_to_seconds(t.counts.cpu_system_ticks)
        );
    }
}
