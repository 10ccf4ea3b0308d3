//! Readers for the auxiliary per-process files: `status`, `io`, `limits`,
//! `smaps_rollup` / `smaps`.

use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Read buffer for smaps files, which can be large for big address spaces.
const SMAPS_BUFFER_BYTES: usize = 256 * 1024;

/// Values of interest from `/proc/<pid>/status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusFields {
    pub uid: Option<u32>,
    pub vm_swap_bytes: u64,
    pub voluntary_ctxt_switches: u64,
    pub nonvoluntary_ctxt_switches: u64,
}

/// Proportional memory from smaps, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProportionalMemory {
    pub pss: u64,
    pub swap_pss: u64,
}

/// Parses kilobyte values from smaps/status lines.
pub fn parse_kb_value(v: &str) -> Option<u64> {
    v.split_whitespace().next()?.parse().ok()
}

/// Parses the content of a `status` file.
pub fn parse_status(content: &str) -> StatusFields {
    let mut out = StatusFields::default();
    for line in content.lines() {
        if let Some(v) = line.strip_prefix("Uid:") {
            // Real, effective, saved, filesystem: report the real uid.
            out.uid = v.split_whitespace().next().and_then(|s| s.parse().ok());
        } else if let Some(v) = line.strip_prefix("VmSwap:") {
            out.vm_swap_bytes = parse_kb_value(v).unwrap_or(0) * 1024;
        } else if let Some(v) = line.strip_prefix("voluntary_ctxt_switches:") {
            out.voluntary_ctxt_switches = v.trim().parse().unwrap_or(0);
        } else if let Some(v) = line.strip_prefix("nonvoluntary_ctxt_switches:") {
            out.nonvoluntary_ctxt_switches = v.trim().parse().unwrap_or(0);
        }
    }
    out
}

/// Reads `<proc_path>/status`.
pub fn read_status(proc_path: &Path) -> Result<StatusFields, io::Error> {
    let content = fs::read(proc_path.join("status"))?;
    Ok(parse_status(&String::from_utf8_lossy(&content)))
}

/// Reads storage I/O from `<proc_path>/io`.
/// Returns (read_bytes, write_bytes).
/// Note: Requires appropriate permissions (usually root or CAP_SYS_PTRACE).
pub fn read_block_io(proc_path: &Path) -> Result<(u64, u64), io::Error> {
    let content = fs::read_to_string(proc_path.join("io"))?;

    let mut read_bytes = 0u64;
    let mut write_bytes = 0u64;
    let mut found_read = false;
    let mut found_write = false;

    for line in content.lines() {
        if let Some(v) = line.strip_prefix("read_bytes:") {
            read_bytes = v.trim().parse().unwrap_or(0);
            found_read = true;
        } else if let Some(v) = line.strip_prefix("write_bytes:") {
            write_bytes = v.trim().parse().unwrap_or(0);
            found_write = true;
        }

        if found_read && found_write {
            break;
        }
    }

    Ok((read_bytes, write_bytes))
}

/// Reads the soft `Max open files` limit from `<proc_path>/limits`.
/// Returns 0 for "unlimited".
pub fn read_fd_limit(proc_path: &Path) -> Result<u64, io::Error> {
    let content = fs::read_to_string(proc_path.join("limits"))?;
    for line in content.lines() {
        if let Some(v) = line.strip_prefix("Max open files") {
            return Ok(v
                .split_whitespace()
                .next()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0));
        }
    }
    Ok(0)
}

/// Counts the entries of `<proc_path>/fd`.
pub fn count_open_fds(proc_path: &Path) -> Result<u64, io::Error> {
    Ok(fs::read_dir(proc_path.join("fd"))?.count() as u64)
}

/// Sums `Pss:` and `SwapPss:` lines from an smaps-formatted reader.
fn sum_proportional<R: BufRead>(reader: R) -> Result<ProportionalMemory, io::Error> {
    let mut pss_kb = 0;
    let mut swap_pss_kb = 0;

    // Mapping lines carry file paths, which need not be UTF-8.
    for line in reader.split(b'\n') {
        let line = line?;
        let l = String::from_utf8_lossy(&line);
        if let Some(v) = l.strip_prefix("Pss:") {
            pss_kb += parse_kb_value(v).unwrap_or(0);
        } else if let Some(v) = l.strip_prefix("SwapPss:") {
            swap_pss_kb += parse_kb_value(v).unwrap_or(0);
        }
    }

    Ok(ProportionalMemory {
        pss: pss_kb * 1024,
        swap_pss: swap_pss_kb * 1024,
    })
}

/// Reads proportional memory, preferring `smaps_rollup` (Linux >= 4.14) and
/// falling back to the much slower full `smaps`.
pub fn read_proportional_memory(proc_path: &Path) -> Result<ProportionalMemory, io::Error> {
    let rollup = proc_path.join("smaps_rollup");
    let path = if rollup.exists() {
        rollup
    } else {
        proc_path.join("smaps")
    };
    let file = fs::File::open(path)?;
    sum_proportional(BufReader::with_capacity(SMAPS_BUFFER_BYTES, file))
}
