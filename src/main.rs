//! named-process-exporter
//!
//! Prometheus exporter for named groups of Linux processes.
//! This is the main entry point that initializes the server and handles subcommands.

mod cli;
mod commands;
mod config;
mod handlers;
mod state;

use axum::{routing::get, Router};
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use named_process_exporter::{GroupMetrics, HealthStats, NamedProcessCollector};
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::{net::TcpListener, signal, sync::Mutex};
use tracing::{debug, error, info, warn, Level};

use cli::{Args, Commands, LogLevel};
use commands::{command_check, command_matchers, command_test};
use config::{
    build_namer, collector_options, resolve_config, show_config, validate_effective_config,
    Config, DEFAULT_BIND_ADDR, DEFAULT_PORT,
};
use handlers::{health_handler, metrics_handler, root_handler};
use state::{AppState, SharedState};

/// Initializes tracing logging subsystem with configured log level.
///
/// `debug` (from `--debug` or the config file) raises the level to debug.
fn setup_logging(args: &Args, debug: bool) {
    let log_level = match args.log_level {
        LogLevel::Off | LogLevel::Error | LogLevel::Warn | LogLevel::Info if debug => {
            Some(Level::DEBUG)
        }
        LogLevel::Off => None,
        LogLevel::Error => Some(Level::ERROR),
        LogLevel::Warn => Some(Level::WARN),
        LogLevel::Info => Some(Level::INFO),
        LogLevel::Debug => Some(Level::DEBUG),
        LogLevel::Trace => Some(Level::TRACE),
    };
    let Some(log_level) = log_level else {
        return;
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return;
    }

    info!("Logging initialized with level: {}", log_level);
}

/// Helper function to load and validate configuration.
/// Exits the process with error code 1 if validation fails.
fn load_validated_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let config = match resolve_config(args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("❌ Configuration invalid: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }
    Ok(config)
}

/// Builds the collector, registry and metric families.
fn build_state(config: Config) -> Result<SharedState, Box<dyn std::error::Error>> {
    let namer = build_namer(&config)?;
    let options = collector_options(&config);
    info!(
        "Collector options: procfs={}, children={}, threads={}, gather_smaps={}, recheck={}",
        options.procfs_path.display(),
        options.children,
        options.threads,
        options.gather_smaps,
        options.recheck
    );
    let collector = Arc::new(NamedProcessCollector::new(options, namer)?);

    let registry = Registry::new();
    let metrics = GroupMetrics::new(&registry)?;
    debug!("All metrics registered successfully");

    Ok(Arc::new(AppState {
        registry,
        metrics,
        collector,
        render_lock: Mutex::new(()),
        config: Arc::new(config),
        health_stats: Arc::new(HealthStats::new()),
        start_time: Instant::now(),
    }))
}

/// Primes, waits, scrapes once and prints the metrics to stdout.
async fn run_once_to_stdout(
    state: SharedState,
    delay: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let collector = Arc::clone(&state.collector);
    tokio::task::spawn_blocking(move || collector.prime()).await??;
    tokio::time::sleep(Duration::from_secs(delay)).await;

    let collector = Arc::clone(&state.collector);
    let report = tokio::task::spawn_blocking(move || collector.scrape()).await??;
    state
        .metrics
        .update(&report, state.collector.boot_time());
    let body = handlers::metrics::encode(&state)
        .map_err(|e| format!("Failed to encode metrics: {:?}", e))?;
    print!("{}", body);
    Ok(())
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

/// Main application entry point.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Early config resolution for show/check modes
    if args.show_config || args.check_config {
        let config = resolve_config(&args)?;

        if args.check_config {
            if let Err(e) = validate_effective_config(&config) {
                eprintln!("❌ Configuration invalid: {}", e);
                std::process::exit(1);
            }
            println!("✅ Configuration is valid");
            return Ok(());
        }

        return show_config(&config, args.config_format.clone());
    }

    // Handle subcommands
    if let Some(command) = &args.command {
        let config = load_validated_config(&args)?;
        setup_logging(&args, config.debug.unwrap_or(false));

        return match command {
            Commands::Check {
                proc,
                matchers,
                all,
            } => command_check(*proc, *matchers, *all, &config),

            Commands::Test {
                iterations,
                interval,
                verbose,
            } => command_test(*iterations, *interval, *verbose, &config),

            Commands::Matchers { live, group } => command_matchers(*live, group.clone(), &config),
        };
    }

    // Load configuration for main server mode
    let config = load_validated_config(&args)?;
    setup_logging(&args, config.debug.unwrap_or(false));

    info!("Starting named-process-exporter");
    if config.debug.unwrap_or(false) {
        match serde_yaml::to_string(&config) {
            Ok(yaml) => debug!("Effective configuration:\n{}", yaml),
            Err(e) => warn!("Cannot render configuration: {}", e),
        }
    }

    let bind_ip_str = config
        .bind
        .clone()
        .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
    let port = config.port.unwrap_or(DEFAULT_PORT);
    let telemetry_path = config.telemetry_path().to_string();
    let enable_health = config.enable_health.unwrap_or(true);
    let once_delay = config.once_to_stdout_delay;
    let tls_paths = if config.enable_tls.unwrap_or(false) {
        config.tls_cert_path.clone().zip(config.tls_key_path.clone())
    } else {
        None
    };

    let state = match build_state(config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ Startup failed: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(delay) = once_delay {
        return run_once_to_stdout(state, delay).await;
    }

    // Prime the accumulator so the first served scrape has a baseline.
    let collector = Arc::clone(&state.collector);
    match tokio::task::spawn_blocking(move || collector.prime()).await {
        Ok(Ok(())) => info!("Initial scrape completed successfully"),
        Ok(Err(e)) => warn!("Initial scrape failed: {}", e),
        Err(e) => warn!("Initial scrape task failed: {}", e),
    }

    // Configure HTTP server routes
    let addr: SocketAddr = format!("{}:{}", bind_ip_str, port).parse()?;

    let mut app = Router::new()
        .route("/", get(root_handler))
        .route(&telemetry_path, get(metrics_handler));

    if enable_health {
        app = app.route("/health", get(health_handler));
    }

    let app = app.with_state(state);

    if let Some((cert_path, key_path)) = tls_paths {
        info!("Loading TLS certificate from: {}", cert_path);
        info!("Loading TLS private key from: {}", key_path);

        let tls_config = RustlsConfig::from_pem_file(&cert_path, &key_path)
            .await
            .map_err(|e| {
                error!("Failed to load TLS configuration: {}", e);
                e
            })?;

        info!(
            "named-process-exporter listening on https://{}:{}{}",
            bind_ip_str, port, telemetry_path
        );

        let server = axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service());

        tokio::select! {
            result = server => {
                if let Err(e) = result {
                    error!("Server error: {}", e);
                    return Err(e.into());
                }
            }
            _ = shutdown_signal() => {
                info!("Shutdown signal received, exiting...");
            }
        }
    } else {
        let listener = TcpListener::bind(addr).await?;
        info!(
            "named-process-exporter listening on http://{}:{}{}",
            bind_ip_str, port, telemetry_path
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| {
                error!("Server error: {}", e);
                e
            })?;
    }

    info!("named-process-exporter stopped gracefully");
    Ok(())
}
