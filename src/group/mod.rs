//! Grouping engine.
//!
//! - `walker`: assigns each process a group, with optional child roll-up
//! - `accumulator`: keeps per-group counters monotonic across process churn

pub mod accumulator;
pub mod walker;

pub use accumulator::{
    GroupAccumulator, GroupCounts, GroupReport, Ledger, ThreadCounts, ThreadIdentity, ThreadKey,
    Tracked, TrackedProcess,
};
pub use walker::{Classification, TreeWalker};
