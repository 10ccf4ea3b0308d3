//! Matchers command implementation.
//!
//! Lists the configured naming rules and, with `--live`, the processes each
//! group contains right now.

use named_process_exporter::{Matcher, NamedProcessCollector};

use crate::config::{build_namer, collector_options, Config};

/// Lists configured matchers and optionally the live group membership.
pub fn command_matchers(
    live: bool,
    group: Option<String>,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("📊 Named Process Exporter - Matchers");
    println!("=====================================");

    let wanted = |name: &str| group.as_deref().map_or(true, |f| name.contains(f));

    match &config.matchers {
        Some(matchers) if !matchers.is_empty() => {
            for (idx, m) in matchers.iter().enumerate() {
                if wanted(&m.name) {
                    println!("\n🏷️  #{} {}", idx + 1, m.name);
                    println!("   └─ {}", describe(m));
                }
            }
        }
        _ => {
            let names = config.procnames.as_deref().unwrap_or_default();
            println!("\n🏷️  Naming by process name: {}", names.join(", "));
            let mapping = config.namemapping.as_deref().unwrap_or_default();
            for pair in mapping.chunks(2) {
                if let [comm, regex] = pair {
                    println!("   ├─ {} remapped by /{}/", comm, regex);
                }
            }
        }
    }

    if !live {
        return Ok(());
    }

    let options = collector_options(config);
    let collector = NamedProcessCollector::new(options, build_namer(config)?)?;
    let membership = collector.membership()?;

    println!("\n🔎 Live membership:");
    let mut total = 0usize;
    for (name, procs) in membership.iter().filter(|(n, _)| wanted(n)) {
        println!("\n   {} ({} processes)", name, procs.len());
        println!("   {}", "─".repeat(50));
        for p in procs {
            println!(
                "   ├─ {:>7} {:16} {:10} {}",
                p.pid,
                p.name,
                p.username,
                p.cmdline.join(" ")
            );
        }
        total += procs.len();
    }
    println!("\n📋 Total: {} processes in {} groups", total, membership.len());

    Ok(())
}

fn describe(m: &Matcher) -> String {
    let mut parts = Vec::new();
    if !m.comm.is_empty() {
        parts.push(format!("comm == {:?}", m.comm));
    }
    if !m.user.is_empty() {
        parts.push(format!("user == {:?}", m.user));
    }
    if let Some(ppid) = m.ppid.filter(|p| *p != 0) {
        parts.push(format!("ppid == {}", ppid));
    }
    if !m.cmdline.is_empty() {
        parts.push(format!("cmdline contains {:?}", m.cmdline));
    }
    if parts.is_empty() {
        "matches every process".to_string()
    } else {
        parts.join(" && ")
    }
}
