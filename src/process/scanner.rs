//! Process scanning: discovers process entries under a procfs root and reads
//! each one into [`ProcAttributes`].
//!
//! A process can exit at any point while it is being read. Such processes are
//! skipped and counted in [`Snapshot::procread_errors`]; only a failure to list
//! the procfs root itself is reported as an error.

use dashmap::DashMap;
use nix::unistd::{Uid, User};
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::ReadError;
use crate::process::attributes::{Counts, Filedesc, Memory, ProcAttributes, ThreadAttributes};
use crate::process::memory::{
    count_open_fds, read_block_io, read_fd_limit, read_proportional_memory, read_status,
};
use crate::process::stat::{read_boot_time, read_stat, PAGE_SIZE};

/// What to read besides the basic per-process files.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// Read smaps_rollup/smaps for proportional memory (costly).
    pub gather_smaps: bool,
    /// Read `task/<tid>` for a per-thread breakdown.
    pub threads: bool,
}

/// The full process table at one instant.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub procs: Vec<ProcAttributes>,
    /// Processes skipped because they vanished or could not be read.
    pub procread_errors: u64,
    /// Auxiliary files that could not be read for otherwise included processes.
    pub partial_errors: u64,
}

/// Source of process attributes.
pub trait ProcSource: Send + Sync {
    fn snapshot(&self, opts: &ReadOptions) -> Result<Snapshot, ReadError>;

    /// Boot time in seconds since the epoch, used to turn start ticks into
    /// timestamps.
    fn boot_time_seconds(&self) -> u64 {
        0
    }
}

/// Process entry representing a directory in the procfs root.
#[derive(Debug, Clone)]
pub struct ProcEntry {
    pub pid: u32,
    pub proc_path: PathBuf,
}

/// Scans the procfs root for process entries with numeric names.
pub fn collect_proc_entries(root: &Path) -> Result<Vec<ProcEntry>, io::Error> {
    let mut out = Vec::new();
    for entry in fs::read_dir(root)?.flatten() {
        let p = entry.path();
        let name = match p.file_name().and_then(|s| s.to_str()) {
            Some(v) => v,
            None => continue,
        };
        let pid: u32 = match name.parse() {
            Ok(v) => v,
            Err(_) => continue,
        };
        out.push(ProcEntry { pid, proc_path: p });
    }
    Ok(out)
}

/// Reads `cmdline` into its argument vector.
pub fn read_cmdline(proc_path: &Path) -> Result<Vec<String>, io::Error> {
    let content = fs::read(proc_path.join("cmdline"))?;
    Ok(content
        .split(|&b| b == 0u8)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect())
}

/// True when an error means the process (or thread) no longer exists.
fn is_gone(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::NotFound || e.raw_os_error() == Some(libc::ESRCH)
}

/// Outcome of reading one optional file.
fn optional<T: Default>(
    result: Result<T, io::Error>,
    partial: &mut u64,
) -> Result<T, io::Error> {
    match result {
        Ok(v) => Ok(v),
        Err(e) if is_gone(&e) => Err(e),
        Err(_) => {
            *partial += 1;
            Ok(T::default())
        }
    }
}

/// Reader for a Linux procfs tree.
pub struct ProcFs {
    root: PathBuf,
    boot_time: u64,
    usernames: DashMap<u32, String>,
}

impl ProcFs {
    /// Opens a procfs root. Fails if the root cannot be listed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ReadError> {
        let root = root.into();
        fs::read_dir(&root).map_err(|source| ReadError::Root {
            path: root.clone(),
            source,
        })?;
        let boot_time = match read_boot_time(&root) {
            Ok(t) => t,
            Err(e) => {
                warn!("Cannot read boot time from {}: {}", root.display(), e);
                0
            }
        };
        Ok(Self {
            root,
            boot_time,
            usernames: DashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn username(&self, uid: u32) -> String {
        if let Some(name) = self.usernames.get(&uid) {
            return name.clone();
        }
        let name = match User::from_uid(Uid::from_raw(uid)) {
            Ok(Some(u)) => u.name,
            _ => uid.to_string(),
        };
        self.usernames.insert(uid, name.clone());
        name
    }

    fn read_threads(&self, proc_path: &Path, partial: &mut u64) -> Vec<ThreadAttributes> {
        let entries = match collect_proc_entries(&proc_path.join("task")) {
            Ok(e) => e,
            Err(_) => {
                *partial += 1;
                return Vec::new();
            }
        };
        let mut threads: Vec<ThreadAttributes> = entries
            .iter()
            .filter_map(|t| {
                // Threads come and go faster than processes; a vanished one is just skipped.
                let stat = read_stat(&t.proc_path).ok()?;
                let (read_bytes, write_bytes) = read_block_io(&t.proc_path).unwrap_or((0, 0));
                let status = read_status(&t.proc_path).unwrap_or_default();
                Some(ThreadAttributes {
                    tid: t.pid,
                    name: stat.comm,
                    start_time: stat.starttime,
                    counts: Counts {
                        cpu_user_ticks: stat.utime,
                        cpu_system_ticks: stat.stime,
                        read_bytes,
                        write_bytes,
                        major_page_faults: stat.majflt,
                        minor_page_faults: stat.minflt,
                        ctx_switch_voluntary: status.voluntary_ctxt_switches,
                        ctx_switch_nonvoluntary: status.nonvoluntary_ctxt_switches,
                    },
                })
            })
            .collect();
        threads.sort_by_key(|t| t.tid);
        threads
    }

    /// Reads one process. Returns the attributes and the number of auxiliary
    /// files that could not be read.
    fn read_process(
        &self,
        entry: &ProcEntry,
        opts: &ReadOptions,
    ) -> Result<(ProcAttributes, u64), io::Error> {
        let path = &entry.proc_path;
        let stat = read_stat(path)?;
        let status = read_status(path)?;

        let mut partial = 0u64;
        let cmdline = optional(read_cmdline(path), &mut partial)?;
        let (read_bytes, write_bytes) = optional(read_block_io(path), &mut partial)?;
        let open_fds = optional(count_open_fds(path), &mut partial)?;
        let fd_limit = optional(read_fd_limit(path), &mut partial)?;
        let proportional = if opts.gather_smaps {
            optional(read_proportional_memory(path), &mut partial)?
        } else {
            Default::default()
        };
        let threads = if opts.threads {
            self.read_threads(path, &mut partial)
        } else {
            Vec::new()
        };

        let username = status
            .uid
            .map(|uid| self.username(uid))
            .unwrap_or_default();

        let attrs = ProcAttributes {
            pid: entry.pid,
            ppid: stat.ppid,
            start_time: stat.starttime,
            name: stat.comm,
            cmdline,
            username,
            counts: Counts {
                cpu_user_ticks: stat.utime,
                cpu_system_ticks: stat.stime,
                read_bytes,
                write_bytes,
                major_page_faults: stat.majflt,
                minor_page_faults: stat.minflt,
                ctx_switch_voluntary: status.voluntary_ctxt_switches,
                ctx_switch_nonvoluntary: status.nonvoluntary_ctxt_switches,
            },
            memory: Memory {
                resident: stat.rss_pages * *PAGE_SIZE,
                virtual_bytes: stat.vsize,
                swapped: status.vm_swap_bytes,
                proportional_resident: proportional.pss,
                proportional_swapped: proportional.swap_pss,
            },
            filedesc: Filedesc {
                open: open_fds,
                limit: fd_limit,
            },
            num_threads: stat.num_threads,
            state: stat.state,
            threads,
        };
        Ok((attrs, partial))
    }
}

impl ProcSource for ProcFs {
    fn snapshot(&self, opts: &ReadOptions) -> Result<Snapshot, ReadError> {
        let entries = collect_proc_entries(&self.root).map_err(|source| ReadError::Root {
            path: self.root.clone(),
            source,
        })?;
        debug!(
            "Collected {} process entries from {}",
            entries.len(),
            self.root.display()
        );

        let results: Vec<Result<(ProcAttributes, u64), io::Error>> = entries
            .par_iter()
            .map(|entry| {
                self.read_process(entry, opts).map_err(|e| {
                    debug!("Skipping process {}: {}", entry.pid, e);
                    e
                })
            })
            .collect();

        let mut snapshot = Snapshot::default();
        for r in results {
            match r {
                Ok((attrs, partial)) => {
                    snapshot.partial_errors += partial;
                    snapshot.procs.push(attrs);
                }
                Err(_) => snapshot.procread_errors += 1,
            }
        }
        snapshot.procs.sort_by_key(|p| p.pid);
        Ok(snapshot)
    }

    fn boot_time_seconds(&self) -> u64 {
        self.boot_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_collect_proc_entries_skips_non_numeric() {
        let dir = tempdir().expect("Failed to create temp dir");
        for name in ["1", "42", "self", "sys", "net"] {
            std::fs::create_dir(dir.path().join(name)).expect("Failed to create dir");
        }
        let mut pids: Vec<u32> = collect_proc_entries(dir.path())
            .unwrap()
            .iter()
            .map(|e| e.pid)
            .collect();
        pids.sort();
        assert_eq!(pids, vec![1, 42]);
    }

    #[test]
    fn test_read_cmdline_splits_on_nul() {
        let dir = tempdir().expect("Failed to create temp dir");
        std::fs::write(dir.path().join("cmdline"), b"/usr/bin/python3\0app.py\0--port\08080\0")
            .expect("Failed to write cmdline");
        assert_eq!(
            read_cmdline(dir.path()).unwrap(),
            vec!["/usr/bin/python3", "app.py", "--port", "8080"]
        );
    }

    #[test]
    fn test_read_cmdline_empty_for_kernel_threads() {
        let dir = tempdir().expect("Failed to create temp dir");
        std::fs::write(dir.path().join("cmdline"), b"").expect("Failed to write cmdline");
        assert!(read_cmdline(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_procfs_new_fails_on_missing_root() {
        let dir = tempdir().expect("Failed to create temp dir");
        let missing = dir.path().join("does-not-exist");
        assert!(matches!(ProcFs::new(missing), Err(ReadError::Root { .. })));
    }

    #[test]
    fn test_optional_counts_partial_but_propagates_gone() {
        let mut partial = 0;
        let denied: Result<u64, io::Error> =
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        assert_eq!(optional(denied, &mut partial).unwrap(), 0);
        assert_eq!(partial, 1);

        let gone: Result<u64, io::Error> = Err(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(optional(gone, &mut partial).is_err());
        assert_eq!(partial, 1);
    }
}
