//! Error types for configuration loading, process reading and scraping.

use std::io;
use std::path::PathBuf;

/// Errors raised while loading or validating matcher configuration.
/// All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("error reading config file {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("error parsing config file {path:?}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid name mapping regex {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        source: regex::Error,
    },

    #[error("name mapping must be comma-separated name,regex pairs, got {0} items")]
    OddNameMapping(usize),

    #[error("matcher #{0} has an empty name")]
    EmptyMatcherName(usize),

    #[error("no matchers configured: provide `matchers` in the config file or --procnames")]
    NoMatchers,
}

/// Systemic failure reading the process table.
///
/// Per-process failures never surface here; they are counted and skipped.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("cannot read process root {path:?}: {source}")]
    Root { path: PathBuf, source: io::Error },
}

/// Failure of a whole scrape cycle.
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error(transparent)]
    Read(#[from] ReadError),
}
