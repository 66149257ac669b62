//! audedup-worker - audio duplicate detection worker
//!
//! Modes:
//! - `worker` (default): consume the shared job queue until Ctrl+C
//! - `scan <path>`: classify one file or directory tree and exit
//! - `reconcile`: rebuild the canonical symlink view and exit
//!
//! Classification events fan out to the configured webhooks and, when a
//! `[view]` section is configured, to incremental view reconciliation.

use anyhow::{Context, Result};
use audedup_common::config::{self, TomlConfig};
use audedup_common::db::init_database;
use audedup_common::events::EventBus;
use audedup_worker::services::{notifier, view_reconciler};
use audedup_worker::{
    run_worker, DedupEngine, JobQueue, Notifier, SymphoniaClassifier, ViewLayout, ViewReconciler,
    WorkerOptions, EVENT_BUS_CAPACITY,
};
use clap::{Parser, Subcommand};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for audedup-worker
#[derive(Parser, Debug)]
#[command(name = "audedup-worker")]
#[command(about = "Audio duplicate detection worker")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database file (overrides config and AUDEDUP_DATABASE)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Webhook URL notified about processed files (repeatable, replaces configured URLs)
    #[arg(long = "webhook-url", env = "AUDEDUP_WEBHOOK_URL", value_delimiter = ',')]
    webhook_urls: Vec<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consume the job queue (default)
    Worker,
    /// Classify a file or directory tree once
    Scan {
        /// File or directory to process
        path: PathBuf,
    },
    /// Rebuild the canonical view from the record store
    Reconcile,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = config::locate_config_file(args.config.as_deref());
    let config = match &config_path {
        Some(path) => TomlConfig::from_file(path)?,
        None => TomlConfig::default(),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("GIT_HASH"),
        built = env!("BUILD_TIMESTAMP"),
        profile = env!("BUILD_PROFILE"),
        "Starting audedup-worker"
    );
    match &config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => warn!("No configuration file found, using built-in defaults"),
    }

    let db_path = config.resolve_database_path(args.db.as_deref());
    info!("Database: {}", db_path.display());
    let pool = init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
    let mut listeners: Vec<JoinHandle<()>> = Vec::new();

    let webhook_urls = if args.webhook_urls.is_empty() {
        config.worker.webhook_urls.clone()
    } else {
        args.webhook_urls.clone()
    };

    let reconciler = build_reconciler(&config, &pool)?;

    if matches!(args.command, Some(Command::Reconcile)) {
        let reconciler = reconciler.context("`reconcile` requires a [view] section in the configuration")?;
        reconciler.full_reconcile().await?;
        return Ok(());
    }

    if !webhook_urls.is_empty() {
        info!(targets = webhook_urls.len(), "Webhook notifications enabled");
        let notifier = Notifier::new(webhook_urls, config.worker.notify_timeout())?;
        listeners.push(notifier::spawn_listener(Arc::new(notifier), event_bus.subscribe()));
    }

    // Full pass first; the incremental listener must not run concurrently with it.
    // The lock is held until shutdown so a second worker cannot touch the view.
    let mut view_lock = None;
    if let Some(reconciler) = reconciler {
        let lock = reconciler
            .lock()
            .context("Another worker already maintains this view; run a single worker with [view]")?;
        reconciler.full_reconcile_locked(&lock).await?;
        view_lock = Some(lock);
        listeners.push(view_reconciler::spawn_listener(reconciler, event_bus.subscribe()));
    }

    let engine = DedupEngine::new(pool.clone(), Arc::new(SymphoniaClassifier::new()), event_bus.clone())
        .with_max_lock_wait_ms(config.worker.max_lock_wait_ms);
    // Listeners stop once every sender is gone
    drop(event_bus);

    match args.command.unwrap_or(Command::Worker) {
        Command::Scan { path } => {
            let report = engine.process_path(&path).await?;
            info!(
                classified = report.events.len(),
                skipped = report.skipped,
                failed = report.failed.len(),
                "Scan complete"
            );
            for failed in &report.failed {
                warn!(path = %failed, "Not classified");
            }
            drop(engine);
        }
        Command::Worker | Command::Reconcile => {
            let queue = JobQueue::new(pool.clone()).with_max_lock_wait_ms(config.worker.max_lock_wait_ms);
            let options = WorkerOptions {
                poll_interval: config.worker.poll_interval(),
                job_lease: config.worker.job_lease(),
            };

            let shutdown = CancellationToken::new();
            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                signal_token.cancel();
            });

            run_worker(queue, engine, options, shutdown).await?;
        }
    }

    for listener in listeners {
        if let Err(e) = listener.await {
            warn!(error = %e, "Event listener task failed");
        }
    }

    drop(view_lock);
    pool.close().await;
    info!("Shutdown complete");
    Ok(())
}

fn build_reconciler(config: &TomlConfig, pool: &SqlitePool) -> Result<Option<Arc<ViewReconciler>>> {
    let Some(view) = &config.view else {
        info!("No [view] section configured, canonical view disabled");
        return Ok(None);
    };

    let layout = ViewLayout::new(&view.view_root, &view.source_root, &view.store_prefix)?;
    info!(
        view_root = %layout.view_root().display(),
        source = %layout.source_relative().display(),
        prefix = %view.store_prefix.display(),
        "Canonical view enabled"
    );

    Ok(Some(Arc::new(
        ViewReconciler::new(pool.clone(), layout).with_batch_size(view.batch_size),
    )))
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, finishing current job");
        },
        _ = terminate => {
            info!("Received terminate signal, finishing current job");
        },
    }
}
