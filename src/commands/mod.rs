//! CLI command implementations for named-process-exporter.
//!
//! - `check`: procfs and configuration validation
//! - `test`: scrape testing
//! - `matchers`: rule listing and live group membership

pub mod check;
pub mod matchers;
pub mod test;

// Re-export command functions
pub use check::command_check;
pub use matchers::command_matchers;
pub use test::command_test;
