//! Long-running bot: watchers, scanner workers, and the rescan scheduler.

use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use sigil_core::config::AppConfig;
use sigil_core::error::AppError;
use sigil_worker::adapters::default_collaborators;
use sigil_worker::watchers::build_watchers;
use sigil_worker::{JobExecutor, RescanScheduler, WatcherRunner, WorkerPool};

/// Arguments for the run command
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Run only the registry watchers
    #[arg(long, conflicts_with = "workers_only")]
    pub watchers_only: bool,

    /// Run only the scanner workers
    #[arg(long)]
    pub workers_only: bool,

    /// Restrict watchers to these names (repeatable)
    #[arg(long = "watcher", value_name = "NAME")]
    pub watchers: Vec<String>,

    /// Override worker concurrency
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Do not start the rescan scheduler
    #[arg(long)]
    pub no_rescan: bool,
}

/// Run until SIGINT or SIGTERM, then drain
pub async fn execute(args: &RunArgs, config: AppConfig) -> Result<(), AppError> {
    info!("Starting Sigil Bot v{}", env!("CARGO_PKG_VERSION"));

    let queue = super::connect_queue(&config).await?;
    if !queue.health_check().await? {
        return Err(AppError::queue("Queue backend failed its health check"));
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let collaborators = default_collaborators(&config.adapters)?;
    let mut producers: Vec<JoinHandle<()>> = Vec::new();

    // ── Watchers ─────────────────────────────────────────────────
    if !args.workers_only {
        let watchers = build_watchers(&config.watchers, &queue, &args.watchers)?;
        if watchers.is_empty() {
            warn!("No watchers enabled");
        }
        for watcher in watchers {
            let runner = WatcherRunner::new(watcher, queue.clone(), config.worker.max_retries);
            let rx = shutdown_rx.clone();
            producers.push(tokio::spawn(async move { runner.run(rx).await }));
        }
    }

    // ── Rescan scheduler ─────────────────────────────────────────
    if !args.workers_only && !args.no_rescan && config.rescan.enabled {
        let scheduler = RescanScheduler::new(
            queue.clone(),
            Arc::clone(&collaborators.store),
            config.rescan.clone(),
            config.worker.max_retries,
        );
        let rx = shutdown_rx.clone();
        producers.push(tokio::spawn(async move { scheduler.run(rx).await }));
    }

    // ── Scanner workers ──────────────────────────────────────────
    let mut workers = None;
    if !args.watchers_only && config.worker.enabled {
        let executor = Arc::new(JobExecutor::new(collaborators, &config.worker));
        let pool = WorkerPool::new(
            queue.clone(),
            executor,
            &config.worker,
            Duration::from_secs(config.queue.dequeue_timeout_seconds),
            args.workers,
        );
        let handles = pool.spawn(&shutdown_rx);
        workers = Some((pool, handles));
    }

    if producers.is_empty() && workers.is_none() {
        return Err(AppError::configuration(
            "Nothing to run: every watcher, the worker pool, and the rescan scheduler are disabled",
        ));
    }

    shutdown_signal().await;
    info!("Shutdown signal received, starting graceful shutdown...");
    if shutdown_tx.send(true).is_err() {
        warn!("No task was listening for shutdown");
    }

    // ── Drain ────────────────────────────────────────────────────
    // Producers never hold a dequeued job, so they are bounded by the grace.
    let grace = Duration::from_secs(config.worker.shutdown_grace_seconds);
    match tokio::time::timeout(grace, join_all(producers)).await {
        Ok(results) => {
            for result in results {
                if let Err(e) = result {
                    error!(error = %e, "Background task failed");
                }
            }
        }
        Err(_) => warn!("Background tasks did not stop within the grace period"),
    }
    if let Some((pool, handles)) = workers {
        pool.shutdown(handles, grace).await;
    }

    info!("Sigil Bot shut down gracefully");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
