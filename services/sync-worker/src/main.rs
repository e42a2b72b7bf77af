//! PSN trophy sync worker
//!
//! Single-binary service that:
//! 1. Claims pool ownership and builds one instance per NPSSO token
//! 2. Runs the credential health loop in the background
//! 3. Spawns per-credential worker pools that drain the job queues
//! 4. Serves health, metrics and admin endpoints

mod admin;
mod config;
mod metrics;
mod worker;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use coordination::{MemoryStore, Store};
use credential_pool::{spawn_health_loop, CredentialCoordinator, InitOutcome};
use dispatch::JobDispatcher;
use psn_api::TracingAuditSink;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::admin::AdminState;
use crate::config::Config;
use crate::worker::{spawn_workers, WorkerContext};

/// How long to wait for workers and the server to drain on shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting psn-sync-worker");

    // Install the Prometheus recorder before any metrics are emitted
    let prometheus = metrics::install_recorder().context("failed to install metrics recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let mut config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    info!(
        listen_addr = %config.service.listen_addr,
        credentials = config.pool.credentials,
        workers_per_credential = config.service.workers_per_credential,
        "configuration loaded"
    );

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let http = reqwest::Client::new();

    let coordinator = match CredentialCoordinator::initialize(
        config.pool_config(),
        std::mem::take(&mut config.pool.npsso),
        store.clone(),
        http,
    )
    .await
    .context("pool initialization failed")?
    {
        InitOutcome::Started(coordinator) => coordinator,
        InitOutcome::AlreadyRunning => {
            anyhow::bail!(
                "another coordinator owns the pool; run exactly one sync worker per store"
            );
        }
    };

    let dispatcher = Arc::new(JobDispatcher::new(
        store,
        coordinator.clone(),
        config.dispatcher_config(),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let health_handle = spawn_health_loop(coordinator, shutdown_rx.clone());

    let worker_ctx = Arc::new(WorkerContext {
        dispatcher: dispatcher.clone(),
        policy: config.retry_policy(),
        checkout_timeout: Duration::from_secs(config.service.checkout_timeout_secs),
        workers_per_credential: config.service.workers_per_credential,
        audit: Arc::new(TracingAuditSink),
    });
    let worker_handles = spawn_workers(worker_ctx, shutdown_rx);

    let app = admin::build_router(AdminState {
        dispatcher,
        prometheus,
        started_at: Instant::now(),
    });
    let listener = TcpListener::bind(config.service.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.service.listen_addr))?;
    info!(addr = %config.service.listen_addr, "accepting requests");

    // Graceful shutdown: signal → stop server intake, flip the watch
    // channel for workers and the health loop, then enforce DRAIN_TIMEOUT
    let (server_tx, server_rx) = tokio::sync::oneshot::channel::<()>();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = server_rx.await;
            })
            .await
    });

    shutdown_signal().await;

    let _ = server_tx.send(());
    let _ = shutdown_tx.send(true);

    let drain = async {
        for handle in worker_handles {
            let _ = handle.await;
        }
        let _ = health_handle.await;
        match server_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "server error during shutdown"),
            Err(e) => error!(error = %e, "server task panicked"),
        }
    };
    if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
        warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        );
    }

    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
