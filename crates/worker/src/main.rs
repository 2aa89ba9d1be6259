use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dq_events::{EventBus, EventPersistence, LogSink, NotificationRouter};
use dq_pipeline::{BaselineProvider, CheckOrchestrator, CheckService, CheckWorkerPool, IncidentManager};
use dq_worker::adapters::{PgCheckCatalog, PgConnectionRegistry, PgIncidentStore, PgResultsStore};
use dq_worker::config::{LogFormat, WorkerConfig};
use dq_worker::dispatcher::CheckDispatcher;
use dq_worker::executor::PgQueryExecutor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "dq_worker=debug,dq_pipeline=debug,dq_events=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    tracing::info!(
        max_concurrent_checks = config.max_concurrent_checks,
        timeout_secs = config.execution.timeout.as_secs(),
        retry_attempts = config.execution.retry.max_attempts,
        "Loaded worker configuration"
    );

    // --- Database ---
    let pool = dq_db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    dq_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    dq_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());
    let persistence_handle = tokio::spawn(EventPersistence::run(pool.clone(), event_bus.subscribe()));
    let router = NotificationRouter::new(Arc::new(LogSink), config.notify_min_severity);
    let router_handle = tokio::spawn(router.run(event_bus.subscribe()));
    tracing::info!("Event services started (persistence, notification router)");

    // --- Pipeline ---
    let results = Arc::new(PgResultsStore::new(pool.clone()));
    let orchestrator = CheckOrchestrator::new(
        Arc::new(PgConnectionRegistry::new(pool.clone())),
        Arc::new(PgQueryExecutor::new(pool.clone())),
        results.clone(),
        config.execution.clone(),
    )
    .with_baselines(BaselineProvider::new(results.clone()).with_tolerance(chrono::Duration::from_std(config.baseline_tolerance).expect("baseline tolerance out of range")));
    let incidents = IncidentManager::new(
        Arc::new(PgIncidentStore::new(pool.clone())),
        Arc::clone(&event_bus),
        config.incident_policy,
    );
    let service = Arc::new(CheckService::new(
        Arc::new(PgCheckCatalog::new(pool.clone())),
        results,
        orchestrator,
        incidents,
    ));

    let cancel = CancellationToken::new();
    let workers = Arc::new(CheckWorkerPool::start(
        service,
        config.max_concurrent_checks,
        cancel.clone(),
    ));

    // --- Dispatcher ---
    let dispatcher = Arc::new(
        CheckDispatcher::new(pool.clone(), Arc::clone(&workers), config.max_concurrent_checks)
            .with_poll_interval(config.dispatch_poll_interval),
    );
    let dispatcher_cancel = cancel.clone();
    let dispatcher_run = Arc::clone(&dispatcher);
    let dispatcher_handle = tokio::spawn(async move { dispatcher_run.run(dispatcher_cancel).await });

    tracing::info!("Worker running");
    shutdown_signal().await;
    tracing::info!("Shutdown requested, draining");

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), dispatcher_handle).await;
    if tokio::time::timeout(config.execution.timeout, dispatcher.wait_idle())
        .await
        .is_err()
    {
        tracing::warn!("Timed out waiting for running checks");
    }
    drop(dispatcher);
    drop(workers);

    drop(event_bus);
    let _ = tokio::time::timeout(Duration::from_secs(5), persistence_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), router_handle).await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
