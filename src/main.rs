//! rac-cluster-exporter - Prometheus exporter for 1C:Enterprise clusters.

mod cli;
mod collectors;
mod config;
mod handlers;
mod rac;
mod state;

use axum::{routing::get, Router};
use clap::Parser;
use prometheus::{Gauge, Registry};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Level};

use crate::cli::{Args, ConfigFormat, LogLevel};
use crate::collectors::cluster_processes::ClusterProcessesCollector;
use crate::collectors::connections::ConnectionsCollector;
use crate::collectors::licenses::LicensesCollector;
use crate::collectors::scheduled_jobs::ScheduledJobsCollector;
use crate::collectors::sessions::SessionsCollector;
use crate::collectors::{ClusterContext, Collector, CollectorSet};
use crate::config::{
    resolve_config, validate_effective_config, Config, DEFAULT_BIND_ADDR, DEFAULT_PORT,
};
use crate::handlers::{health_handler, metrics_handler, pause_handler, resume_handler};
use crate::rac::cache::QueryCache;
use crate::rac::cluster::ClusterResolver;
use crate::rac::credentials::CredentialStore;
use crate::rac::registry::InfobaseRegistry;
use crate::rac::RacClient;
use crate::state::AppState;

/// Initializes tracing logging subsystem with configured log level.
fn setup_logging(args: &Args) {
    let log_level = match args.log_level {
        LogLevel::Off => Level::ERROR, // Off not fully supported, use ERROR as minimal
        LogLevel::Error => Level::ERROR,
        LogLevel::Warn => Level::WARN,
        LogLevel::Info => Level::INFO,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Trace => Level::TRACE,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    info!("Logging initialized with level: {:?}", args.log_level);
}

/// Shows configuration in requested format.
fn show_config(config: &Config, format: ConfigFormat) -> Result<(), Box<dyn std::error::Error>> {
    let output = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    };
    println!("{output}");
    Ok(())
}

/// Builds the shared cluster context from the effective configuration.
fn build_cluster_context(
    config: &Config,
    config_path: Option<std::path::PathBuf>,
    cancel: &CancellationToken,
) -> Arc<ClusterContext> {
    let rac = Arc::new(RacClient::new(
        config.rac_path(),
        config.timeout(),
        config.ras_address.clone(),
        config.cluster_user.clone(),
        config.cluster_password.clone(),
    ));
    let resolver = Arc::new(ClusterResolver::new(rac.clone()));
    let registry = Arc::new(InfobaseRegistry::new(rac.clone(), resolver.clone()));

    let (credentials, refresh_rx) = CredentialStore::new(config.infobases.clone(), config_path);
    credentials.spawn_refresh_task(refresh_rx, cancel.clone());

    Arc::new(ClusterContext {
        rac,
        resolver,
        registry,
        cache: Arc::new(QueryCache::new(config.cache_ttl())),
        credentials,
    })
}

/// Instantiates every enabled metric family.
fn build_collectors(
    config: &Config,
    ctx: &Arc<ClusterContext>,
    registry: &Registry,
    cancel: &CancellationToken,
) -> Result<Vec<Arc<dyn Collector>>, Box<dyn std::error::Error>> {
    let mut collectors: Vec<Arc<dyn Collector>> = Vec::new();

    let sessions_cfg = config.collectors.family("sessions");
    if sessions_cfg.enabled() {
        let sessions = SessionsCollector::new(ctx.clone(), sessions_cfg.mode(), registry)?;
        sessions.spawn_sampling_loop(sessions_cfg.interval());
        collectors.push(sessions);
    }

    if config.collectors.family("licenses").enabled() {
        collectors.push(LicensesCollector::new(ctx.clone(), registry)?);
    }

    let jobs_enabled = config.collectors.family("scheduled_jobs").enabled();
    if jobs_enabled {
        collectors.push(ScheduledJobsCollector::new(ctx.clone(), registry)?);
    }

    let connections_enabled = config.collectors.family("connections").enabled();
    if connections_enabled {
        collectors.push(ConnectionsCollector::new(ctx.clone(), registry)?);
    }

    if config.collectors.family("cluster_processes").enabled() {
        collectors.push(ClusterProcessesCollector::new(ctx.clone(), registry)?);
    }

    // Families resolving ids to names need the infobase directory; the
    // start-once guard keeps this a single loop no matter how many ask.
    if jobs_enabled || connections_enabled {
        ctx.registry.spawn_refresh_loop(cancel.clone());
    }

    Ok(collectors)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Early config resolution for show/check modes
    if args.show_config || args.check_config {
        let config = resolve_config(&args)?;

        if args.check_config {
            if let Err(e) = validate_effective_config(&config) {
                eprintln!("Configuration invalid: {}", e);
                std::process::exit(1);
            }
            println!("Configuration is valid");
            return Ok(());
        }

        return show_config(&config, args.config_format);
    }

    // Load configuration for main server mode
    let config = resolve_config(&args)?;

    if let Err(e) = validate_effective_config(&config) {
        eprintln!("Configuration invalid: {}", e);
        std::process::exit(1);
    }

    setup_logging(&args);

    info!("Starting rac-cluster-exporter");

    let bind_ip = config
        .bind
        .clone()
        .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
    let port = config.port.unwrap_or(DEFAULT_PORT);

    // Cancellation context for process-wide background loops
    let cancel = CancellationToken::new();

    let ctx = build_cluster_context(&config, args.config.clone(), &cancel);

    // Initialize Prometheus metrics registry
    let registry = Registry::new();
    debug!("Prometheus registry initialized");

    let scrape_duration = Gauge::new(
        "rac_exporter_scrape_duration_seconds",
        "Time spent serving the last /metrics request",
    )?;
    registry.register(Box::new(scrape_duration.clone()))?;

    let collectors = build_collectors(&config, &ctx, &registry, &cancel)?;
    info!(
        collectors = collectors.len(),
        "metric families instantiated"
    );

    let state = Arc::new(AppState {
        registry,
        collectors: CollectorSet::new(collectors),
        config: Arc::new(config),
        scrape_duration,
    });

    // Setup graceful shutdown signal handlers
    let shutdown_signal = async {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to install signal handler")
                .recv()
                .await;
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
    };

    // Configure HTTP server routes and start listening
    let addr: SocketAddr = format!("{}:{}", bind_ip, port).parse()?;

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/pause", get(pause_handler))
        .route("/resume", get(resume_handler))
        .route("/health", get(health_handler))
        .with_state(state.clone());

    let listener = TcpListener::bind(addr).await?;
    info!(
        "rac-cluster-exporter listening on http://{}:{}",
        bind_ip, port
    );

    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                return Err(e.into());
            }
        }
        _ = shutdown_signal => {
            info!("Shutdown signal received, exiting...");
        }
    }

    // Cleanup: cancel family loops and process-wide loops before exit
    state.collectors.stop_all();
    cancel.cancel();

    info!("rac-cluster-exporter stopped gracefully");
    Ok(())
}
