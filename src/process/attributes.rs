//! Process attribute types returned by a process source.
//!
//! `ProcAttributes` is one kernel process at one instant. Cumulative kernel
//! counters live in [`Counts`]; everything else is a point-in-time gauge.

use std::ops::{Add, AddAssign};

/// Cumulative per-process (or per-thread) counters.
///
/// Every field only grows during the lifetime of the process it was read
/// from. CPU time is kept in clock ticks so arithmetic stays exact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub cpu_user_ticks: u64,
    pub cpu_system_ticks: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub major_page_faults: u64,
    pub minor_page_faults: u64,
    pub ctx_switch_voluntary: u64,
    pub ctx_switch_nonvoluntary: u64,
}

impl Counts {
    /// Field-wise difference, clamped at zero.
    pub fn saturating_sub(&self, other: &Counts) -> Counts {
        Counts {
            cpu_user_ticks: self.cpu_user_ticks.saturating_sub(other.cpu_user_ticks),
            cpu_system_ticks: self.cpu_system_ticks.saturating_sub(other.cpu_system_ticks),
            read_bytes: self.read_bytes.saturating_sub(other.read_bytes),
            write_bytes: self.write_bytes.saturating_sub(other.write_bytes),
            major_page_faults: self.major_page_faults.saturating_sub(other.major_page_faults),
            minor_page_faults: self.minor_page_faults.saturating_sub(other.minor_page_faults),
            ctx_switch_voluntary: self
                .ctx_switch_voluntary
                .saturating_sub(other.ctx_switch_voluntary),
            ctx_switch_nonvoluntary: self
                .ctx_switch_nonvoluntary
                .saturating_sub(other.ctx_switch_nonvoluntary),
        }
    }

    /// Field-wise maximum.
    pub fn fieldwise_max(&self, other: &Counts) -> Counts {
        Counts {
            cpu_user_ticks: self.cpu_user_ticks.max(other.cpu_user_ticks),
            cpu_system_ticks: self.cpu_system_ticks.max(other.cpu_system_ticks),
            read_bytes: self.read_bytes.max(other.read_bytes),
            write_bytes: self.write_bytes.max(other.write_bytes),
            major_page_faults: self.major_page_faults.max(other.major_page_faults),
            minor_page_faults: self.minor_page_faults.max(other.minor_page_faults),
            ctx_switch_voluntary: self.ctx_switch_voluntary.max(other.ctx_switch_voluntary),
            ctx_switch_nonvoluntary: self
                .ctx_switch_nonvoluntary
                .max(other.ctx_switch_nonvoluntary),
        }
    }
}

impl Add for Counts {
    type Output = Counts;

    fn add(self, rhs: Counts) -> Counts {
        Counts {
            cpu_user_ticks: self.cpu_user_ticks + rhs.cpu_user_ticks,
            cpu_system_ticks: self.cpu_system_ticks + rhs.cpu_system_ticks,
            read_bytes: self.read_bytes + rhs.read_bytes,
            write_bytes: self.write_bytes + rhs.write_bytes,
            major_page_faults: self.major_page_faults + rhs.major_page_faults,
            minor_page_faults: self.minor_page_faults + rhs.minor_page_faults,
            ctx_switch_voluntary: self.ctx_switch_voluntary + rhs.ctx_switch_voluntary,
            ctx_switch_nonvoluntary: self.ctx_switch_nonvoluntary + rhs.ctx_switch_nonvoluntary,
        }
    }
}

impl AddAssign for Counts {
    fn add_assign(&mut self, rhs: Counts) {
        *self = *self + rhs;
    }
}

/// Memory gauges in bytes.
///
/// The proportional fields are only filled when detailed memory gathering
/// (smaps) is enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Memory {
    pub resident: u64,
    pub virtual_bytes: u64,
    pub swapped: u64,
    pub proportional_resident: u64,
    pub proportional_swapped: u64,
}

impl AddAssign for Memory {
    fn add_assign(&mut self, rhs: Memory) {
        self.resident += rhs.resident;
        self.virtual_bytes += rhs.virtual_bytes;
        self.swapped += rhs.swapped;
        self.proportional_resident += rhs.proportional_resident;
        self.proportional_swapped += rhs.proportional_swapped;
    }
}

/// Open file descriptors and the soft limit on them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Filedesc {
    pub open: u64,
    /// Soft `Max open files` limit, 0 when unknown or unlimited.
    pub limit: u64,
}

/// Scheduler state from the third field of `/proc/<pid>/stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProcState {
    Running,
    Sleeping,
    Waiting,
    Zombie,
    #[default]
    Other,
}

impl ProcState {
    pub fn from_stat_char(c: char) -> Self {
        match c {
            'R' => ProcState::Running,
            'S' => ProcState::Sleeping,
            'D' => ProcState::Waiting,
            'Z' => ProcState::Zombie,
            _ => ProcState::Other,
        }
    }
}

/// Number of live processes per scheduler state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct States {
    pub running: u64,
    pub sleeping: u64,
    pub waiting: u64,
    pub zombie: u64,
    pub other: u64,
}

impl States {
    pub fn record(&mut self, state: ProcState) {
        match state {
            ProcState::Running => self.running += 1,
            ProcState::Sleeping => self.sleeping += 1,
            ProcState::Waiting => self.waiting += 1,
            ProcState::Zombie => self.zombie += 1,
            ProcState::Other => self.other += 1,
        }
    }
}

/// Identity of a process across scrapes.
///
/// PIDs are recycled by the kernel; the start time disambiguates a new process
/// that happens to reuse the PID of an exited one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcIdentity {
    pub pid: u32,
    pub start_time: u64,
}

/// One thread of a process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadAttributes {
    pub tid: u32,
    pub name: String,
    pub start_time: u64,
    pub counts: Counts,
}

/// A process as observed at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcAttributes {
    pub pid: u32,
    pub ppid: u32,
    /// Clock ticks after boot at which the process started.
    pub start_time: u64,
    /// Command name as truncated by the kernel (15 chars).
    pub name: String,
    pub cmdline: Vec<String>,
    pub username: String,
    pub counts: Counts,
    pub memory: Memory,
    pub filedesc: Filedesc,
    pub num_threads: u64,
    pub state: ProcState,
    /// Per-thread breakdown, empty unless thread reading was requested.
    pub threads: Vec<ThreadAttributes>,
}

impl ProcAttributes {
    pub fn identity(&self) -> ProcIdentity {
        ProcIdentity {
            pid: self.pid,
            start_time: self.start_time,
        }
    }
}
