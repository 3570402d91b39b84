//! pgtelemetry Binary Entry Point
//!
//! Polls the configured PostgreSQL databases and writes their statistics to
//! ClickHouse. Core functionality is provided by the `pgtelemetry` library crate.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pgtelemetry::{
    collector::{CollectorRegistry, MetricGroup, PostgresSource, Schedule, SourceWorker},
    config::{AppConfig, parse_duration},
    pipeline::{Pipeline, SourceTarget},
    storage::{ClickHouseSink, MemorySink, Sink, Store, ViewRegistry},
};
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// pgtelemetry - PostgreSQL statistics to ClickHouse
#[derive(Parser, Debug)]
#[command(name = "pgtelemetry", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/config.yaml",
        env = "PGTELEMETRY_CONFIG"
    )]
    config: PathBuf,

    /// Metric definitions directory (overrides config file)
    #[arg(long, env = "PGTELEMETRY_METRICS_PATH")]
    metrics_path: Option<PathBuf>,

    /// Collection interval, e.g. `30s` (overrides config file)
    #[arg(long, env = "PGTELEMETRY_INTERVAL", value_parser = parse_duration)]
    interval: Option<Duration>,

    /// Run one cycle per source and exit
    #[arg(long)]
    once: bool,

    /// Run one cycle against an in-memory sink and print the DDL it would issue
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pgtelemetry=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    tracing::info!(path = %cli.config.display(), "Loading configuration");
    let mut config = AppConfig::load(&cli.config)?;

    // CLI > ENV > config file
    if let Some(path) = cli.metrics_path {
        config.metrics_path = path;
    }
    if let Some(interval) = cli.interval {
        config.schedule.interval = Some(interval);
        config.schedule.cron = None;
    }
    config.validate()?;
    let schedule = config.schedule.to_schedule()?;

    let groups = MetricGroup::load_dir(&config.metrics_path)?;
    if groups.is_empty() {
        tracing::warn!(path = %config.metrics_path.display(), "No metric definitions found");
    }
    tracing::info!(
        groups = groups.len(),
        metrics = groups.iter().map(|g| g.definitions().len()).sum::<usize>(),
        "Metric definitions loaded"
    );

    let memory = cli
        .dry_run
        .then(|| Arc::new(MemorySink::new(&config.sink.database)));
    let sink: Arc<dyn Sink> = match &memory {
        Some(memory) => Arc::clone(memory) as Arc<dyn Sink>,
        None => Arc::new(ClickHouseSink::new(&config.sink)?),
    };

    let store = Arc::new(Store::new(Arc::clone(&sink)).with_policy(config.storage.on_type_mismatch));
    store.prepare_database().await?;

    let views = Arc::new(ViewRegistry::new(Arc::clone(&sink)).with_mode(config.views.mode));
    let pipeline = Arc::new(
        Pipeline::new(store, views, groups).with_database_id(config.collect_database_id),
    );

    let mut sources = Vec::new();
    let workers: Vec<SourceWorker> = config
        .enabled_sources()
        .map(|source_config| {
            let source = Arc::new(PostgresSource::new(source_config));
            sources.push(Arc::clone(&source));
            SourceWorker::new(
                SourceTarget::from(source_config),
                source,
                Arc::clone(&pipeline),
                schedule.clone(),
            )
        })
        .collect();

    if workers.is_empty() {
        tracing::warn!("No enabled sources configured");
    }

    if cli.once || cli.dry_run {
        run_once(workers).await;
        if let Some(memory) = memory {
            for ddl in memory.ddl_log() {
                println!("{};", ddl.to_sql(memory.database()));
            }
        }
    } else {
        run_scheduled(workers, &schedule).await?;
    }

    for source in sources {
        source.close().await;
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Run one cycle per worker concurrently and log the reports.
async fn run_once(workers: Vec<SourceWorker>) {
    let mut tasks = JoinSet::new();
    for worker in workers {
        tasks.spawn(async move { worker.run_once().await });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Some(report)) => {
                for (table, error) in &report.failed {
                    tracing::error!(source = %report.source, table = %table, error = %error, "Group failed");
                }
                tracing::info!(
                    source = %report.source,
                    inserted = report.inserted.len(),
                    failed = report.failed.len(),
                    view_failures = report.views.failures.len(),
                    duration_ms = report.duration.as_millis(),
                    "Cycle finished"
                );
            }
            Ok(None) => {}
            Err(e) => tracing::error!(error = %e, "Cycle task panicked"),
        }
    }
}

/// Schedule every worker and run until a shutdown signal arrives.
async fn run_scheduled(
    workers: Vec<SourceWorker>,
    schedule: &Schedule,
) -> Result<(), Box<dyn std::error::Error>> {
    let registry = CollectorRegistry::new().await?;
    for worker in workers {
        let name = worker.name().to_owned();
        if let Err(e) = registry.spawn(worker).await {
            tracing::error!(source = %name, error = %e, "Failed to schedule source");
        }
    }
    registry.start().await?;
    tracing::info!(jobs = registry.job_count().await, schedule = %schedule, "Collection running, press Ctrl+C to stop");

    shutdown_signal().await;

    tracing::info!("Shutting down collectors...");
    if let Err(e) = registry.shutdown().await {
        tracing::error!(error = %e, "Failed to shutdown collectors");
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
