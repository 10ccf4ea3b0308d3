//! Check command implementation.
//!
//! Validates procfs access and the matcher configuration.

use std::path::Path;

use named_process_exporter::process::collect_proc_entries;
use named_process_exporter::{ProcFs, ProcSource, ReadOptions};

use crate::config::{build_namer, collector_options, validate_effective_config, Config};

/// Validates system requirements and configuration.
pub fn command_check(
    proc: bool,
    matchers: bool,
    all: bool,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Named Process Exporter - System Check");
    println!("=========================================");

    let mut all_ok = true;
    let options = collector_options(config);
    let procfs = options.procfs_path.as_path();

    // Check the proc filesystem
    if proc || all {
        println!("\n📁 Checking {} ...", procfs.display());
        match collect_proc_entries(procfs) {
            Ok(entries) if entries.is_empty() => {
                println!("   ❌ No process entries found");
                all_ok = false;
            }
            Ok(entries) => {
                println!("   ✅ Can list {} process entries", entries.len());
            }
            Err(e) => {
                println!("   ❌ Cannot list {}: {}", procfs.display(), e);
                all_ok = false;
            }
        }

        let own = procfs.join(std::process::id().to_string());
        if own.join("smaps_rollup").exists() {
            println!("   ✅ smaps_rollup available (fast path)");
        } else if own.join("smaps").exists() {
            println!("   ✅ smaps available (slow path)");
        } else if options.gather_smaps {
            println!("   ⚠️  No memory maps accessible, proportional memory will be 0");
        }

        all_ok &= check_snapshot(procfs, options.threads);
    }

    // Check configuration
    println!("\n⚙️  Checking configuration...");
    match validate_effective_config(config) {
        Ok(_) => println!("   ✅ Configuration is valid"),
        Err(e) => {
            println!("   ❌ Configuration invalid: {}", e);
            all_ok = false;
        }
    }

    if matchers || all {
        println!("\n📊 Checking matchers...");
        match build_namer(config) {
            Ok(_) => match &config.matchers {
                Some(m) if !m.is_empty() => println!("   ✅ {} matcher rules loaded", m.len()),
                _ => println!(
                    "   ✅ Naming by process name ({} names)",
                    config.procnames.as_ref().map_or(0, |p| p.len())
                ),
            },
            Err(e) => {
                println!("   ❌ {}", e);
                all_ok = false;
            }
        }
    }

    println!("\n📋 Summary:");
    if all_ok {
        println!("   ✅ All checks passed - system is ready");
        Ok(())
    } else {
        println!("   ❌ Some checks failed - please review warnings");
        std::process::exit(1);
    }
}

fn check_snapshot(procfs: &Path, threads: bool) -> bool {
    let source = match ProcFs::new(procfs) {
        Ok(s) => s,
        Err(e) => {
            println!("   ❌ {}", e);
            return false;
        }
    };
    let opts = ReadOptions {
        gather_smaps: false,
        threads,
    };
    match source.snapshot(&opts) {
        Ok(s) => {
            println!(
                "   ✅ Read {} processes ({} skipped, {} partial)",
                s.procs.len(),
                s.procread_errors,
                s.partial_errors
            );
            if s.partial_errors > 0 {
                println!("   ⚠️  Some io/fd files are unreadable, run as root for complete metrics");
            }
            true
        }
        Err(e) => {
            println!("   ❌ {}", e);
            false
        }
    }
}
