//! audedup-connector - HTTP front door for the dedup job queue
//!
//! Accepts scan requests and tgmount webhooks and appends them to the shared
//! job queue consumed by `audedup-worker`. `backfill <dir>` queues the files
//! already present in a tgmount directory and exits.

use anyhow::{Context, Result};
use audedup_common::config::{self, TomlConfig};
use audedup_common::db::init_database;
use audedup_connector::{backfill, build_router, AppState};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for audedup-connector
#[derive(Parser, Debug)]
#[command(name = "audedup-connector")]
#[command(about = "HTTP connector feeding the audedup job queue")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database file (overrides config and AUDEDUP_DATABASE)
    #[arg(long, alias = "database")]
    db: Option<PathBuf>,

    /// Path prepended to files added from the tgmount webhook
    #[arg(long)]
    basedir: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "AUDEDUP_CONNECTOR_PORT")]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API (default)
    Serve,
    /// Queue existing tgmount files, newest message first
    Backfill {
        /// Local tgmount directory to list
        directory: PathBuf,

        /// Only queue messages with a larger id
        #[arg(long, default_value_t = 0)]
        min_msgid: i64,
    },
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
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=info", config.logging.level))),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting audedup-connector v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
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

    let basedir = args.basedir.unwrap_or_else(|| config.connector.basedir.clone());
    info!("tgmount base directory: {}", basedir.display());

    let state = AppState::new(pool.clone(), basedir).with_max_lock_wait_ms(config.worker.max_lock_wait_ms);

    if let Some(Command::Backfill { directory, min_msgid }) = &args.command {
        let queued = backfill::run_backfill(&state, directory, *min_msgid).await?;
        info!(queued = queued.len(), "Backfill complete");
        pool.close().await;
        return Ok(());
    }

    let host = args.host.unwrap_or_else(|| config.connector.host.clone());
    let port = args.port.unwrap_or(config.connector.port);
    let addr = format!("{}:{}", host, port);

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("audedup-connector listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    pool.close().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
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
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
