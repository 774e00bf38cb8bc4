//! # workq worker
//!
//! Loads configuration, wires the queue engine to Redis and MySQL, and runs
//! one bounded batch per interval until Ctrl+C or SIGTERM.

use anyhow::Context;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use workq_config::{ConfigLoader, ObservabilityConfig, WorkqConfig};
use workq_jobs::{
    connect_pool, register_builtin_jobs, register_metrics, BatchWorker, JobRegistry,
    MySqlJobRepository, QueueContext, RedisStore, ResourceLimits,
};

#[tokio::main]
async fn main() {
    let config = match ConfigLoader::from_default_location().load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config.observability);

    info!("Starting workq worker...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(config).await {
        error!("Worker error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(config: WorkqConfig) -> anyhow::Result<()> {
    info!("Environment: {}", config.app.environment);
    register_metrics();

    let store = RedisStore::connect(&config.redis)
        .await
        .context("connecting to Redis")?;
    let pool = connect_pool(&config.database)
        .await
        .context("connecting to MySQL")?;

    let registry = JobRegistry::new();
    register_builtin_jobs(&registry);
    info!(job_types = ?registry.job_types(), "Registered job types");

    let ctx = QueueContext::builder()
        .store(Arc::new(store))
        .repository(Arc::new(MySqlJobRepository::new(pool)))
        .registry(Arc::new(registry))
        .key_prefix(config.redis.key_prefix.clone())
        .build()
        .context("building queue context")?;

    let worker = BatchWorker::new(ctx, ResourceLimits::from_settings(&config.worker));
    info!(
        worker_id = %worker.id(),
        queues = ?config.worker.queues,
        max_jobs = config.worker.max_jobs_per_batch,
        interval_ms = config.worker.batch_interval_ms,
        "Worker ready"
    );

    run_batches(&worker, &config).await;

    let stats = worker.stats();
    info!(
        batches = stats.batches,
        processed = stats.jobs_processed,
        failed = stats.jobs_failed,
        "Worker stopped"
    );
    Ok(())
}

/// Runs a batch every interval until a shutdown signal arrives.
///
/// The signal is only observed between batches, so a running job is never
/// abandoned in `processing`.
async fn run_batches(worker: &BatchWorker, config: &WorkqConfig) {
    let queues = config.worker.queue_refs();
    let mut interval = tokio::time::interval(config.worker.batch_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            () = &mut shutdown => break,
        }

        if !worker.processor().queue().is_connected().await {
            warn!("Queue store unreachable, reconnecting");
            if let Err(e) = worker.processor().queue().reconnect().await {
                error!(error = %e, "Reconnect failed");
                continue;
            }
        }

        if let Err(e) = worker
            .process_jobs(&queues, config.worker.max_jobs_per_batch)
            .await
        {
            warn!(error = %e, "Batch skipped");
        }
    }
}

fn init_logging(config: &ObservabilityConfig) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    let registry = tracing_subscriber::registry().with(filter);
    if config.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        () = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        }
    }
}
