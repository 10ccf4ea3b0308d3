//! CLI arguments and subcommands for named-process-exporter.
//!
//! This module defines the command-line interface structure using the clap library,
//! including all flags, options, and subcommands.

use clap::{Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, Default, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// Configuration format options for output
#[derive(Debug, Clone, Default, ValueEnum)]
pub enum ConfigFormat {
    #[default]
    Yaml,
    Json,
    Toml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug, Default)]
#[command(
    name = "named-process-exporter",
    about = "Prometheus exporter for named groups of Linux processes",
    long_about = "Prometheus exporter for named groups of Linux processes.\n\n\
                  Classifies processes into groups using matcher rules (or --procnames), \
                  and exports per-group CPU, I/O, page fault, context switch, memory, \
                  file descriptor and thread metrics. Group counters stay monotonic while \
                  member processes come and go.",
    version,
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// HTTP listen port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Bind to specific interface/IP
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Path under which to expose metrics
    #[arg(long)]
    pub telemetry_path: Option<String>,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Config file (YAML/JSON/TOML) with exporter options and matchers
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Log every matched process and the loaded config
    #[arg(long)]
    pub debug: bool,

    /// Path to the proc filesystem
    #[arg(long)]
    pub procfs: Option<PathBuf>,

    /// Roll unmatched children up into the group of their nearest matched ancestor
    #[arg(long)]
    pub children: bool,

    /// Do not report per-thread metrics
    #[arg(long)]
    pub disable_threads: bool,

    /// Do not read smaps for proportional memory
    #[arg(long)]
    pub disable_smaps: bool,

    /// Re-run the matchers on every scrape instead of once per process
    #[arg(long)]
    pub recheck: bool,

    /// Process names to group by (comma-separated), instead of matchers
    #[arg(long, value_delimiter = ',')]
    pub procnames: Vec<String>,

    /// Comma-separated name,regex pairs remapping process names by cmdline
    #[arg(long, value_delimiter = ',')]
    pub namemapping: Vec<String>,

    /// Disable /health endpoint
    #[arg(long)]
    pub disable_health: bool,

    /// Scrape once, wait N seconds, print metrics to stdout and exit
    #[arg(long)]
    pub once_to_stdout_delay: Option<u64>,

    /// Enable TLS/SSL for HTTPS
    #[arg(long)]
    pub enable_tls: bool,

    /// Path to TLS certificate file (PEM format)
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,

    /// Path to TLS private key file (PEM format)
    #[arg(long)]
    pub tls_key: Option<PathBuf>,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate configuration and system requirements
    Check {
        /// Check the proc filesystem
        #[arg(long)]
        proc: bool,

        /// Check the matcher set
        #[arg(long)]
        matchers: bool,

        /// Check everything
        #[arg(long)]
        all: bool,
    },

    /// Run scrapes and print the per-group results
    Test {
        /// Number of scrapes after the priming one
        #[arg(short = 'n', long, default_value_t = 1)]
        iterations: usize,

        /// Seconds to wait between scrapes
        #[arg(long, default_value_t = 1)]
        interval: u64,

        /// Also print per-thread totals
        #[arg(long)]
        verbose: bool,
    },

    /// List configured matchers and optionally the processes they match now
    Matchers {
        /// Show the running processes in each group
        #[arg(long)]
        live: bool,

        /// Filter by group name
        #[arg(short = 'g', long)]
        group: Option<String>,
    },
}
