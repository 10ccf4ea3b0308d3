//! Process attribute source.
//!
//! This module provides:
//! - `attributes`: the data shape of one observed process
//! - `stat`: `/proc/<pid>/stat` parsing and clock constants
//! - `memory`: status, io, limits, fd and smaps readers
//! - `scanner`: the `ProcSource` trait and its procfs implementation

pub mod attributes;
pub mod memory;
pub mod scanner;
pub mod stat;

// Re-export commonly used types
pub use attributes::{
    Counts, Filedesc, Memory, ProcAttributes, ProcIdentity, ProcState, States, ThreadAttributes,
};
pub use scanner::{collect_proc_entries, ProcFs, ProcSource, ReadOptions, Snapshot};
pub use stat::{ticks_to_seconds, CLK_TCK};
