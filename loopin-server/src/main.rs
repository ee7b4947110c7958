//! Loopin Server
//!
//! Receives platform webhooks, stores every change exactly once and hands
//! it to the event handlers through a retrying work queue.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

mod api;
mod audit;
mod config;
mod server;
mod shutdown;
mod state;

use anyhow::Context;
use audit::AuditHandler;
use clap::Parser;
use config::file::LogFormat;
use config::{ConfigLoader, get_database_url};
use loopin_core::config::ProcessingMode;
use loopin_core::framework::DatabaseProcessor;
use loopin_core::handlers::HandlerRegistry;
use loopin_core::lock::{LockManager, LockStore, PgLockStore};
use loopin_core::processors::{
    Dispatcher, IngestPipeline, JobRunner, PendingSweep, ScheduledTask, Scheduler, StorePrune,
    WorkerPool,
};
use loopin_core::queue::{DeadLetterSink, JobQueue, PgDeadLetterSink, PgJobQueue};
use loopin_core::rate_guard::{PgRateCounterStore, RateCounterStore, RateGuard};
use loopin_core::store::{EventStore, PgEventStore, PgSubjectDirectory, SubjectDirectory};
use loopin_core::utils::{Clock, SystemClock};
use server::{build_router, run_server};
use shutdown::spawn_config_reload_handler;
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// How long an event may sit unprocessed and error-free before the
/// pending sweep re-dispatches it.
const PENDING_SWEEP_GRACE: Duration = Duration::from_secs(5 * 60);

/// Loopin - webhook event delivery service
#[derive(Parser, Debug)]
#[command(name = "loopin-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./loopin-config.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration; the log format lives in it, so tracing comes after
    let config_loader = Arc::new(ConfigLoader::new(&args.config, args.listen));
    let loaded_config = config_loader
        .load()
        .with_context(|| format!("failed to load configuration from {:?}", args.config))?;

    init_tracing(loaded_config.log_format);

    tracing::info!("Starting loopin-server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Configuration loaded from {:?}", config_loader.path());
    if loaded_config.secret_rehashed {
        tracing::info!("Admin secret hashed and config file updated");
    }

    let listen_addr = loaded_config.listen;

    // Get database URL from environment
    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    // Run migrations if requested
    if args.migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    // Stores
    let db = DatabaseProcessor::new(db_pool.clone());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let events: Arc<dyn EventStore> = Arc::new(PgEventStore::new(db.clone()));
    let subjects: Arc<dyn SubjectDirectory> = Arc::new(PgSubjectDirectory::new(db.clone()));
    let queue: Arc<dyn JobQueue> = Arc::new(PgJobQueue::new(
        db.clone(),
        loaded_config.queue.name.clone(),
        loaded_config.queue.retry,
        loaded_config.queue.lease,
    ));
    let dead_letters: Arc<dyn DeadLetterSink> = Arc::new(PgDeadLetterSink::new(
        db.clone(),
        loaded_config.queue.dead_letter_name.clone(),
    ));
    let lock_store: Arc<dyn LockStore> = Arc::new(PgLockStore::new(db.clone()));
    let rate_store: Arc<dyn RateCounterStore> = Arc::new(PgRateCounterStore::new(db));
    let rate_guard = Arc::new(RateGuard::from_mode(
        loaded_config.rate_guard,
        rate_store.clone(),
        clock.clone(),
    ));
    tracing::info!(mode = ?loaded_config.rate_guard, "Rate guard ready");

    // Processing
    let handlers = HandlerRegistry::new().register_all(Arc::new(AuditHandler::new(rate_guard)));
    let processing_mode = loaded_config.webhook.processing_mode;
    let dispatcher = Arc::new(Dispatcher::new(
        processing_mode,
        queue.clone(),
        events.clone(),
        handlers.clone(),
    ));
    let ingest = Arc::new(IngestPipeline::new(
        subjects,
        events.clone(),
        dispatcher.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut background = Vec::new();

    match processing_mode {
        ProcessingMode::Queue => {
            let runner = Arc::new(JobRunner::new(
                events.clone(),
                handlers,
                queue,
                dead_letters.clone(),
                clock.clone(),
            ));
            let pool = WorkerPool::new(
                runner,
                loaded_config.queue.concurrency,
                loaded_config.queue.poll_interval,
                shutdown_rx.clone(),
            );
            background.push(tokio::spawn(pool.run()));
        }
        ProcessingMode::Inline => {
            tracing::info!("Inline processing mode, worker pool not started");
        }
    }

    let tasks: HashMap<String, Arc<dyn ScheduledTask>> = [
        Arc::new(PendingSweep::new(
            events.clone(),
            dispatcher.clone(),
            clock,
            PENDING_SWEEP_GRACE,
        )) as Arc<dyn ScheduledTask>,
        Arc::new(StorePrune::new(lock_store.clone(), rate_store)) as Arc<dyn ScheduledTask>,
    ]
    .into_iter()
    .map(|task| (task.name().to_string(), task))
    .collect();
    let scheduler = Scheduler::from_config(
        &loaded_config.schedules,
        &tasks,
        LockManager::new(lock_store),
        shutdown_rx,
    )?;
    if scheduler.is_empty() {
        tracing::info!("No scheduled jobs configured");
    } else {
        background.push(tokio::spawn(scheduler.run()));
    }

    // Create application state
    let state = AppState {
        db: Some(db_pool.clone()),
        config: loaded_config.shared(),
        events,
        dead_letters,
        dispatcher,
        ingest,
    };

    // Spawn config reload handler (listens for SIGHUP)
    let shutdown_notify = spawn_config_reload_handler(state.clone(), config_loader);

    // Build the router
    let router = build_router(state);

    // Run the server
    tracing::info!("Starting HTTP server on {}", listen_addr);
    let result = run_server(router, listen_addr).await;

    // Stop the worker pool and scheduler, letting in-flight jobs finish
    if shutdown_tx.send(true).is_err() {
        tracing::debug!("No background task was listening for shutdown");
    }
    for handle in background {
        if let Err(e) = handle.await {
            tracing::error!("Background task failed: {}", e);
        }
    }

    // Signal the config reload handler to stop
    shutdown_notify.notify_one();

    // Close database connections gracefully
    tracing::info!("Closing database connections...");
    db_pool.close().await;
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}
