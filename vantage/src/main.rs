//! Vantage main binary.
//!
//! Wires all components of the pipeline:
//! - Store: SQLite finding store (dedup + workflow state)
//! - Detection: anomaly/opportunity/trend detectors over the metrics view
//! - Runtime: event bus + supervised Watcher/Diagnostician/Strategist
//! - Dispatch: execution engine, outcome monitor, notification router
//! - API: HTTP surface for queries, approvals and health

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vantage_api::{ApiConfig, ApiServer};
use vantage_core::config::Config;
use vantage_core::metrics_view::{MetricsRow, MetricsView, StaticMetricsView};
use vantage_core::types::Scope;
use vantage_detection::diagnosis::DiagnosisEngine;
use vantage_detection::{AnomalyDetector, DetectorRegistry, OpportunityDetector, TrendDetector};
use vantage_dispatch::{
    Dispatcher, ExecutionEngine, ExecutionTarget, LogChannel, MemoryTarget, NotificationRouter,
    Notifier, OutcomeMonitor,
};
use vantage_runtime::{Bus, Diagnostician, HealthRegistry, Strategist, Supervisor, Watcher};
use vantage_store::{SqliteStore, Store};

/// Vantage CLI arguments
#[derive(Debug, Parser)]
#[clap(name = "vantage", version, about = "Detection-to-dispatch pipeline for search performance findings")]
struct Cli {
    /// Configuration file path
    #[clap(short, long, default_value = "config/vantage.yaml", global = true)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[clap(long, env = "VANTAGE_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Enable JSON logging
    #[clap(long, env = "VANTAGE_LOG_JSON", global = true)]
    log_json: bool,

    /// Validate configuration and exit
    #[clap(long, global = true)]
    dry_run: bool,

    /// Subcommand to execute
    #[clap(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands
#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the pipeline service (default if no subcommand given)
    Serve,
    /// Run the detectors once over a scope and print the summary
    Detect {
        /// Scope to analyze
        #[clap(long)]
        scope: String,

        /// Metrics view snapshot file (JSON array of rows)
        #[clap(long)]
        snapshot: Option<PathBuf>,

        /// Output the summary as JSON
        #[clap(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli)?;

    info!("Starting vantage v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(Commands::Detect {
            scope,
            snapshot,
            json,
        }) => run_detect_command(&cli, &scope, snapshot.as_deref(), json).await,
        Some(Commands::Serve) | None => run_serve_command(&cli).await,
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .context("Invalid log level")?;

    if cli.log_json {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .with(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive(log_level.into()),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .with(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive(log_level.into()),
            )
            .init();
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let config = if cli.config.exists() {
        Config::from_file(&cli.config).context("Failed to load configuration")?
    } else {
        info!(path = %cli.config.display(), "no configuration file; using defaults");
        Config::default()
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn load_view(snapshot: Option<&std::path::Path>) -> Result<StaticMetricsView> {
    match snapshot {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let rows: Vec<MetricsRow> =
                serde_json::from_str(&raw).context("Failed to parse metrics snapshot")?;
            info!(rows = rows.len(), "metrics snapshot loaded");
            Ok(StaticMetricsView::with_rows(rows))
        }
        None => Ok(StaticMetricsView::new()),
    }
}

fn build_detectors(
    config: &Config,
    view: Arc<dyn MetricsView>,
    store: Arc<dyn Store>,
) -> DetectorRegistry {
    let window = config.detection.window_days;
    let mut registry = DetectorRegistry::new();
    registry.register(Arc::new(AnomalyDetector::new(
        config.detection.anomaly.clone(),
        window,
        view.clone(),
        store.clone(),
    )));
    registry.register(Arc::new(OpportunityDetector::new(
        config.detection.opportunity.clone(),
        window,
        view.clone(),
        store.clone(),
    )));
    registry.register(Arc::new(TrendDetector::new(
        config.detection.trend.clone(),
        window,
        view,
        store,
    )));
    registry
}

/// Run the detectors once over one scope.
async fn run_detect_command(
    cli: &Cli,
    scope: &str,
    snapshot: Option<&std::path::Path>,
    json_output: bool,
) -> Result<()> {
    let config = load_config(cli)?;
    if cli.dry_run {
        info!("Dry run mode - configuration validated, exiting");
        return Ok(());
    }

    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::open(&config.store.path).context("Failed to open finding store")?,
    );
    let view: Arc<dyn MetricsView> = Arc::new(load_view(snapshot)?);
    let registry = build_detectors(&config, view, store);

    let scope = Scope::new(scope);
    let summary = registry.run_scope(&scope).await;

    if json_output {
        let report: Vec<serde_json::Value> = summary
            .results
            .iter()
            .map(|r| {
                serde_json::json!({
                    "detector": r.detector,
                    "findings": r.findings,
                    "error": r.error,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Detection run for scope {}", scope);
        for result in &summary.results {
            match &result.error {
                Some(error) => println!("  {:<14} FAILED: {}", result.detector, error),
                None => println!("  {:<14} {} finding(s)", result.detector, result.findings),
            }
        }
        println!("  total          {} finding(s)", summary.total_findings());
    }

    Ok(())
}

/// Start the full pipeline service.
async fn run_serve_command(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    if cli.dry_run {
        info!("Dry run mode - configuration validated, exiting");
        return Ok(());
    }

    info!("Initializing vantage components...");

    let store_impl =
        SqliteStore::open(&config.store.path).context("Failed to open finding store")?;
    let store: Arc<dyn Store> = Arc::new(store_impl);
    info!(path = %config.store.path.display(), "finding store open");

    // Production deployments implement MetricsView and ExecutionTarget
    // against their own warehouse/platform; the in-memory stand-ins keep a
    // bare deployment runnable end to end.
    let view: Arc<dyn MetricsView> = Arc::new(StaticMetricsView::new());
    let target: Arc<dyn ExecutionTarget> = Arc::new(MemoryTarget::new());

    let bus = Bus::new(config.runtime.bus_capacity);
    let registry = Arc::new(HealthRegistry::new());
    let mut supervisor = Supervisor::new(bus.clone(), registry.clone(), config.runtime.clone());

    // detection stage
    let scopes: Vec<Scope> = config.runtime.scopes.iter().map(Scope::new).collect();
    supervisor.spawn(Arc::new(Watcher::new(
        scopes,
        Duration::from_secs(config.runtime.watcher_interval_secs),
        build_detectors(&config, view.clone(), store.clone()),
        store.clone(),
        bus.clone(),
    )));

    // diagnosis stage
    supervisor.spawn(Arc::new(Diagnostician::new(
        DiagnosisEngine::new(config.detection.diagnosis.clone()),
        view.clone(),
        store.clone(),
        bus.clone(),
    )));

    // recommendation stage
    supervisor.spawn(Arc::new(Strategist::new(
        config.runtime.strategist.clone(),
        store.clone(),
        bus.clone(),
    )));

    // dispatch stage
    let engine = Arc::new(ExecutionEngine::new(
        config.dispatch.clone(),
        store.clone(),
        target,
        view.clone(),
    ));
    supervisor.spawn(Arc::new(Dispatcher::new(
        engine,
        store.clone(),
        bus.clone(),
        Duration::from_secs(config.dispatch.poll_interval_secs),
    )));
    supervisor.spawn(Arc::new(OutcomeMonitor::new(
        store.clone(),
        view.clone(),
        bus.clone(),
        Duration::from_secs(config.dispatch.poll_interval_secs),
        Duration::from_secs(config.dispatch.call_timeout_secs),
    )));

    // notification boundary
    let mut router = NotificationRouter::from_config(&config.notify);
    router.register(Arc::new(LogChannel));
    supervisor.spawn(Arc::new(Notifier::new(router, store.clone())));

    info!("All components initialized successfully");

    // API server
    let bind_addr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server bind address")?;
    let api = ApiServer::new(
        ApiConfig {
            bind_addr,
            timeout_secs: config.server.request_timeout_secs,
        },
        store.clone(),
        registry.clone(),
    );
    let api_task = tokio::spawn(async move { api.serve().await });

    tokio::select! {
        result = api_task => {
            error!("API server exited: {:?}", result);
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received; initiating graceful shutdown...");
        }
    }

    supervisor.shutdown().await;
    info!("Vantage stopped");
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
