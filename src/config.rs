//! Configuration management for named-process-exporter.
//!
//! This module handles loading, merging, and validating configuration from files
//! and CLI arguments. It supports YAML, JSON, and TOML formats. The same file
//! carries the `matchers:` rule list.

use crate::cli::{Args, ConfigFormat};
use named_process_exporter::{
    CollectorOptions, ConfigError, MatchNamer, Matcher, MatcherRules, ProcNameNamer,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

// Default configuration constants
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9256;
pub const DEFAULT_TELEMETRY_PATH: &str = "/metrics";
pub const DEFAULT_PROCFS: &str = "/proc";

/// Exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub port: Option<u16>,
    pub bind: Option<String>,
    #[serde(alias = "telemetry-path")]
    pub telemetry_path: Option<String>,

    // Collection
    pub procfs: Option<String>,
    pub children: Option<bool>,
    pub threads: Option<bool>,
    #[serde(alias = "gather-smaps")]
    pub gather_smaps: Option<bool>,
    pub recheck: Option<bool>,
    pub debug: Option<bool>,

    // Naming by process name instead of matchers
    pub procnames: Option<Vec<String>>,
    pub namemapping: Option<Vec<String>>,

    // Feature flags
    #[serde(alias = "enable-health")]
    pub enable_health: Option<bool>,
    #[serde(alias = "once-to-stdout-delay")]
    pub once_to_stdout_delay: Option<u64>,

    // TLS/SSL Configuration
    #[serde(alias = "enable-tls")]
    pub enable_tls: Option<bool>,
    #[serde(alias = "tls-cert-path")]
    pub tls_cert_path: Option<String>,
    #[serde(alias = "tls-key-path")]
    pub tls_key_path: Option<String>,

    // Kept last: TOML emits arrays of tables after plain values.
    pub matchers: Option<Vec<Matcher>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: Some(DEFAULT_PORT),
            bind: Some(DEFAULT_BIND_ADDR.to_string()),
            telemetry_path: Some(DEFAULT_TELEMETRY_PATH.to_string()),
            procfs: Some(DEFAULT_PROCFS.to_string()),
            children: Some(false),
            threads: Some(true),
            gather_smaps: Some(true),
            recheck: Some(false),
            debug: Some(false),
            procnames: None,
            namemapping: None,
            enable_health: Some(true),
            once_to_stdout_delay: None,
            enable_tls: Some(false),
            tls_cert_path: None,
            tls_key_path: None,
            matchers: None,
        }
    }
}

impl Config {
    pub fn telemetry_path(&self) -> &str {
        self.telemetry_path
            .as_deref()
            .unwrap_or(DEFAULT_TELEMETRY_PATH)
    }

    fn has_matchers(&self) -> bool {
        self.matchers.as_ref().is_some_and(|m| !m.is_empty())
    }

    fn has_procnames(&self) -> bool {
        self.procnames.as_ref().is_some_and(|p| !p.is_empty())
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<(), Box<dyn std::error::Error>> {
    // Naming: exactly one of matchers / procnames
    match (cfg.has_matchers(), cfg.has_procnames()) {
        (true, true) => {
            return Err("matchers and procnames are mutually exclusive".into());
        }
        (false, false) => return Err(ConfigError::NoMatchers.into()),
        _ => {}
    }
    // Builds the namer to surface empty names and bad regexes.
    build_namer(cfg)?;

    let path = cfg.telemetry_path();
    if !path.starts_with('/') || path == "/" || path == "/health" {
        return Err(format!(
            "Invalid telemetry_path '{}', expected an absolute path other than / and /health",
            path
        )
        .into());
    }

    // TLS validation
    if cfg.enable_tls.unwrap_or(false) {
        let cert_path = cfg.tls_cert_path.as_deref();
        let key_path = cfg.tls_key_path.as_deref();

        match (cert_path, key_path) {
            (None, None) => {
                return Err(
                    "TLS is enabled but neither tls_cert_path nor tls_key_path are set".into(),
                );
            }
            (Some(_), None) => {
                return Err("TLS is enabled but tls_key_path is not set".into());
            }
            (None, Some(_)) => {
                return Err("TLS is enabled but tls_cert_path is not set".into());
            }
            (Some(cert), Some(key)) => {
                check_tls_file(cert, "certificate")?;
                check_tls_file(key, "private key")?;
            }
        }
    }

    Ok(())
}

fn check_tls_file(path: &str, what: &str) -> Result<(), Box<dyn std::error::Error>> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() == 0 => Err(format!("TLS {} file is empty: {}", what, path).into()),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(format!("TLS {} file not found: {}", what, path).into())
        }
        Err(e) => Err(format!("TLS {} file is not readable: {} ({})", what, path, e).into()),
    }
}

/// Builds the namer selected by the config: matcher rules, else procnames.
pub fn build_namer(cfg: &Config) -> Result<Arc<dyn MatchNamer>, ConfigError> {
    if let Some(matchers) = cfg.matchers.as_ref().filter(|m| !m.is_empty()) {
        return Ok(Arc::new(MatcherRules::new(matchers.clone())?));
    }
    let procnames = cfg.procnames.as_deref().unwrap_or_default();
    let namemapping = cfg.namemapping.as_deref().unwrap_or_default();
    Ok(Arc::new(ProcNameNamer::new(procnames, namemapping)?))
}

/// Collector switches from the effective config.
pub fn collector_options(cfg: &Config) -> CollectorOptions {
    CollectorOptions {
        procfs_path: PathBuf::from(cfg.procfs.as_deref().unwrap_or(DEFAULT_PROCFS)),
        children: cfg.children.unwrap_or(false),
        threads: cfg.threads.unwrap_or(true),
        gather_smaps: cfg.gather_smaps.unwrap_or(true),
        recheck: cfg.recheck.unwrap_or(false),
    }
}

/// Resolves configuration from CLI args, config file, and defaults.
/// This enforces precedence: CLI (if provided) > config file > default.
pub fn resolve_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?
    };

    // Override with CLI args
    if let Some(bind_ip) = args.bind {
        config.bind = Some(bind_ip.to_string());
    }
    if let Some(cli_port) = args.port {
        config.port = Some(cli_port);
    }
    if let Some(path) = &args.telemetry_path {
        config.telemetry_path = Some(path.clone());
    }

    // Collection
    if let Some(procfs) = &args.procfs {
        config.procfs = Some(procfs.to_string_lossy().to_string());
    }
    if args.children {
        config.children = Some(true);
    }
    if args.disable_threads {
        config.threads = Some(false);
    }
    if args.disable_smaps {
        config.gather_smaps = Some(false);
    }
    if args.recheck {
        config.recheck = Some(true);
    }
    if args.debug {
        config.debug = Some(true);
    }
    if !args.procnames.is_empty() {
        config.procnames = Some(args.procnames.clone());
    }
    if !args.namemapping.is_empty() {
        config.namemapping = Some(args.namemapping.clone());
    }

    // Feature flags
    if args.disable_health {
        config.enable_health = Some(false);
    }
    if let Some(delay) = args.once_to_stdout_delay {
        config.once_to_stdout_delay = Some(delay);
    }

    // TLS configuration: CLI wins if provided
    if args.enable_tls {
        config.enable_tls = Some(true);
    }
    if let Some(cert_path) = &args.tls_cert {
        config.tls_cert_path = Some(cert_path.to_string_lossy().to_string());
    }
    if let Some(key_path) = &args.tls_key {
        config.tls_key_path = Some(key_path.to_string_lossy().to_string());
    }

    Ok(config)
}

/// Loads a config file, or the first existing default location.
///
/// Values absent from the file fall back to the defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let defaults = [
                "/etc/named-process-exporter/config.yaml",
                "/etc/named-process-exporter/config.yml",
                "/etc/named-process-exporter/config.json",
                "./named-process-exporter.yaml",
                "./named-process-exporter.yml",
                "./named-process-exporter.json",
            ];
            match defaults.iter().find(|p| Path::new(p).exists()) {
                Some(p) => PathBuf::from(p),
                None => return Ok(Config::default()),
            }
        }
    };

    let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    let parse_err = |message: String| ConfigError::Parse {
        path: path.clone(),
        message,
    };

    let file_config: Config = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
        Some("toml") => toml::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
        // Default to YAML
        _ => serde_yaml::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
    };
    info!("Loaded configuration from: {}", path.display());
    debug!("Config file contents:\n{}", content);

    Ok(merge_defaults(file_config))
}

fn merge_defaults(file: Config) -> Config {
    let d = Config::default();
    Config {
        port: file.port.or(d.port),
        bind: file.bind.or(d.bind),
        telemetry_path: file.telemetry_path.or(d.telemetry_path),
        procfs: file.procfs.or(d.procfs),
        children: file.children.or(d.children),
        threads: file.threads.or(d.threads),
        gather_smaps: file.gather_smaps.or(d.gather_smaps),
        recheck: file.recheck.or(d.recheck),
        debug: file.debug.or(d.debug),
        procnames: file.procnames,
        namemapping: file.namemapping,
        enable_health: file.enable_health.or(d.enable_health),
        once_to_stdout_delay: file.once_to_stdout_delay,
        enable_tls: file.enable_tls.or(d.enable_tls),
        tls_cert_path: file.tls_cert_path,
        tls_key_path: file.tls_key_path,
        matchers: file.matchers,
    }
}

/// Shows configuration in requested format
pub fn show_config(config: &Config, format: ConfigFormat) -> Result<(), Box<dyn std::error::Error>> {
    let output = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    };
    println!("{output}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let p = dir.join(name);
        fs::write(&p, content).expect("Failed to write config");
        p
    }

    #[test]
    fn test_load_yaml_with_matchers_and_defaults() {
        let dir = tempdir().expect("Failed to create temp dir");
        let p = write(
            dir.path(),
            "c.yaml",
            "children: true\nmatchers:\n  - name: web\n    comm: nginx\n  - name: batch\n    cmdline: worker\n",
        );
        let cfg = load_config(Some(&p)).unwrap();
        assert_eq!(cfg.children, Some(true));
        assert_eq!(cfg.port, Some(DEFAULT_PORT));
        assert_eq!(cfg.threads, Some(true));
        let m = cfg.matchers.as_ref().unwrap();
        assert_eq!(m.len(), 2);
        assert_eq!(m[1].cmdline, "worker");
        assert!(validate_effective_config(&cfg).is_ok());
    }

    #[test]
    fn test_load_json_and_toml() {
        let dir = tempdir().expect("Failed to create temp dir");
        let json = write(
            dir.path(),
            "c.json",
            r#"{"port": 9999, "matchers": [{"name": "db", "user": "postgres"}]}"#,
        );
        let cfg = load_config(Some(&json)).unwrap();
        assert_eq!(cfg.port, Some(9999));
        assert_eq!(cfg.matchers.unwrap()[0].user, "postgres");

        let toml_path = write(
            dir.path(),
            "c.toml",
            "recheck = true\n\n[[matchers]]\nname = \"web\"\nppid = 1\n",
        );
        let cfg = load_config(Some(&toml_path)).unwrap();
        assert_eq!(cfg.recheck, Some(true));
        assert_eq!(cfg.matchers.unwrap()[0].ppid, Some(1));
    }

    #[test]
    fn test_load_errors_are_typed() {
        let dir = tempdir().expect("Failed to create temp dir");
        let missing = dir.path().join("missing.yaml");
        assert!(matches!(
            load_config(Some(&missing)),
            Err(ConfigError::Read { .. })
        ));

        let bad = write(dir.path(), "bad.yaml", "matchers: [name: ");
        assert!(matches!(
            load_config(Some(&bad)),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_validate_requires_a_namer() {
        let cfg = Config::default();
        assert!(validate_effective_config(&cfg).is_err());

        let cfg = Config {
            procnames: Some(vec!["bash".into()]),
            ..Config::default()
        };
        assert!(validate_effective_config(&cfg).is_ok());

        let cfg = Config {
            procnames: Some(vec!["bash".into()]),
            matchers: Some(vec![Matcher {
                name: "x".into(),
                ..Default::default()
            }]),
            ..Config::default()
        };
        assert!(validate_effective_config(&cfg).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_namemapping_and_paths() {
        let cfg = Config {
            procnames: Some(vec!["java".into()]),
            namemapping: Some(vec!["java".into(), "(".into()]),
            ..Config::default()
        };
        assert!(validate_effective_config(&cfg).is_err());

        let cfg = Config {
            procnames: Some(vec!["java".into()]),
            telemetry_path: Some("/health".into()),
            ..Config::default()
        };
        assert!(validate_effective_config(&cfg).is_err());
    }

    #[test]
    fn test_validate_tls_paths() {
        let dir = tempdir().expect("Failed to create temp dir");
        let cert = write(dir.path(), "cert.pem", "CERT");
        let empty = write(dir.path(), "key.pem", "");
        let base = Config {
            procnames: Some(vec!["bash".into()]),
            enable_tls: Some(true),
            ..Config::default()
        };
        assert!(validate_effective_config(&base).is_err());

        let cfg = Config {
            tls_cert_path: Some(cert.to_string_lossy().to_string()),
            tls_key_path: Some(empty.to_string_lossy().to_string()),
            ..base.clone()
        };
        let err = validate_effective_config(&cfg).unwrap_err().to_string();
        assert!(err.contains("empty"), "{}", err);
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = tempdir().expect("Failed to create temp dir");
        let p = write(dir.path(), "c.yaml", "port: 1000\nthreads: true\n");
        let args = Args {
            config: Some(p),
            port: Some(2000),
            disable_threads: true,
            procnames: vec!["sshd".into()],
            ..Args::default()
        };
        let cfg = resolve_config(&args).unwrap();
        assert_eq!(cfg.port, Some(2000));
        assert_eq!(cfg.threads, Some(false));
        assert_eq!(cfg.procnames, Some(vec!["sshd".to_string()]));

        let opts = collector_options(&cfg);
        assert!(!opts.threads);
        assert_eq!(opts.procfs_path, PathBuf::from("/proc"));
    }
}
