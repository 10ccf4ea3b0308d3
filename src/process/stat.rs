//! Parsing of `/proc/<pid>/stat` and the system-wide `/proc/stat`.
//!
//! The per-process stat line carries the command name, scheduler state,
//! parent PID, page faults, CPU ticks, thread count, start time and the
//! virtual/resident sizes.

use once_cell::sync::Lazy;
use std::fs;
use std::io;
use std::path::Path;

use crate::process::attributes::ProcState;

/// Get system clock ticks per second (usually 100, but can vary).
fn get_clk_tck() -> f64 {
    #[cfg(unix)]
    {
        // SAFETY: sysconf is safe to call with _SC_CLK_TCK
        // Returns -1 on error, 0 if undefined - both are handled by the > 0 check
        unsafe {
            let tck = libc::sysconf(libc::_SC_CLK_TCK);
            if tck > 0 {
                return tck as f64;
            }
        }
    }
    // Fallback to common default for error cases or non-Unix platforms
    100.0
}

fn get_page_size() -> u64 {
    #[cfg(unix)]
    {
        // SAFETY: sysconf is safe to call with _SC_PAGESIZE
        unsafe {
            let sz = libc::sysconf(libc::_SC_PAGESIZE);
            if sz > 0 {
                return sz as u64;
            }
        }
    }
    4096
}

/// System clock ticks per second (for CPU time calculation).
pub static CLK_TCK: Lazy<f64> = Lazy::new(get_clk_tck);

/// Memory page size in bytes (stat reports RSS in pages).
pub static PAGE_SIZE: Lazy<u64> = Lazy::new(get_page_size);

/// Converts clock ticks to seconds.
pub fn ticks_to_seconds(ticks: u64) -> f64 {
    ticks as f64 / *CLK_TCK
}

/// Fields of interest from a `stat` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatFields {
    pub comm: String,
    pub state: ProcState,
    pub ppid: u32,
    pub minflt: u64,
    pub majflt: u64,
    pub utime: u64,
    pub stime: u64,
    pub num_threads: u64,
    pub starttime: u64,
    pub vsize: u64,
    pub rss_pages: u64,
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

fn field(rest: &[&str], idx: usize) -> Result<u64, io::Error> {
    rest.get(idx)
        .ok_or_else(|| invalid("Invalid stat format"))?
        .parse()
        .map_err(|_| invalid("Invalid numeric stat field"))
}

/// Parses the content of a `stat` file.
///
/// The command name is taken between the first `(` and the last `)` because
/// it may itself contain spaces and parentheses. Field indices below are
/// relative to the text after the closing parenthesis (state is field 3).
pub fn parse_stat(content: &str) -> Result<StatFields, io::Error> {
    let open = content.find('(').ok_or_else(|| invalid("Missing comm in stat"))?;
    let close = content.rfind(')').ok_or_else(|| invalid("Missing comm in stat"))?;
    if close < open {
        return Err(invalid("Malformed comm in stat"));
    }
    let comm = content[open + 1..close].to_string();
    let rest: Vec<&str> = content[close + 1..].split_whitespace().collect();
    if rest.len() < 22 {
        return Err(invalid("Invalid stat format"));
    }

    let state = rest[0].chars().next().map(ProcState::from_stat_char).unwrap_or_default();
    let ppid = rest[1].parse().map_err(|_| invalid("Invalid ppid"))?;

    Ok(StatFields {
        comm,
        state,
        ppid,
        minflt: field(&rest, 7)?,
        majflt: field(&rest, 9)?,
        utime: field(&rest, 11)?,
        stime: field(&rest, 12)?,
        num_threads: field(&rest, 17)?,
        starttime: field(&rest, 19)?,
        vsize: field(&rest, 20)?,
        rss_pages: field(&rest, 21)?,
    })
}

/// Reads and parses `<proc_path>/stat`.
///
/// `comm` may hold arbitrary bytes, so the file is decoded lossily.
pub fn read_stat(proc_path: &Path) -> Result<StatFields, io::Error> {
    let content = fs::read(proc_path.join("stat"))?;
    parse_stat(&String::from_utf8_lossy(&content))
}

/// Reads the boot time (seconds since the epoch) from `<procfs>/stat`.
pub fn read_boot_time(procfs: &Path) -> Result<u64, io::Error> {
    let content = fs::read_to_string(procfs.join("stat"))?;
    content
        .lines()
        .find_map(|l| l.strip_prefix("btime"))
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| invalid("btime not found"))
}
