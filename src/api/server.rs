use std::sync::Arc;
use std::time::Duration;

use axum::{Router, routing::get, routing::post};
use tokio::net::TcpListener;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::{info, warn};

use super::{
    services::{get_balance, get_operation, get_user_stats, health, list_operations, submit_job},
    state::AppState,
};
use crate::cache::TaskCache;
use crate::config::Config;
use crate::ledger::BillingLedger;
use crate::notify::{LogNotifier, Notifier, WebhookNotifier};
use crate::observability::Metrics;
use crate::orchestrator::JobOrchestrator;
use crate::provider::ProviderJobClient;
use crate::queue::JobBroker;
use crate::worker::spawn_workers;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/jobs", post(submit_job))
        .route("/users/{user_id}/balance", get(get_balance))
        .route("/users/{user_id}/operations", get(list_operations))
        .route("/users/{user_id}/stats", get(get_user_stats))
        .route("/operations/{operation_id}", get(get_operation))
        .route("/health", get(health))
        .with_state(state)
        // gzip request bodies are decoded before handlers see them
        .layer(RequestDecompressionLayer::new())
}

/// Wire the ledger, provider client, orchestrator and worker pool, then serve
/// the HTTP API until a shutdown signal arrives.
pub async fn run(config: Config) -> Result<(), AnyError> {
    let pricing = Arc::new(config.pricing());
    info!(path = %config.server.ledger_path.display(), "Opening ledger");
    let ledger = BillingLedger::open(&config.server.ledger_path, pricing)
        .map_err(|e| format!("Failed to open ledger: {}", e))?;

    // No worker is running yet, so any PENDING row belongs to a previous
    // process that stopped mid-job.
    let released = ledger.fail_stale_pending(chrono::Utc::now())?;
    if released > 0 {
        info!(released, "Released reservations left by the previous run");
    }

    let cache = Arc::new(TaskCache::new(config.cache.ttl.as_duration()));
    let client = ProviderJobClient::new(config.provider_client_config()?, cache.clone())
        .map_err(|e| format!("Failed to build provider client: {}", e))?;

    let notifier: Arc<dyn Notifier> = match &config.notify.webhook_url {
        Some(url) => {
            info!(url = %url, "Delivering results via webhook");
            Arc::new(WebhookNotifier::new(url.clone(), config.notify.timeout.as_duration())?)
        }
        None => {
            warn!("notify.webhook_url not set, results are only logged");
            Arc::new(LogNotifier)
        }
    };

    let metrics = Arc::new(Metrics::new());
    let orchestrator = Arc::new(JobOrchestrator::new(
        Arc::new(client),
        ledger.clone(),
        Arc::new(config.catalog()),
        notifier,
        config.poll.settings(),
        metrics.clone(),
    ));

    let (broker, receivers) = JobBroker::new(config.workers.count, config.workers.channel_size);
    let workers = spawn_workers(receivers, orchestrator);
    let purger = spawn_cache_purger(cache);

    let address = config.server.bind_addr;
    let drain_timeout = config.poll.timeout.as_duration();
    let state = AppState::new(config, ledger.clone(), Arc::new(broker), metrics);
    let app = router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "genledger API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router owned the broker; its senders are gone, so each worker
    // exits once its channel backlog is drained. Jobs still running at the
    // deadline keep their PENDING reservation until the next startup sweep.
    purger.abort();
    let deadline = tokio::time::Instant::now() + drain_timeout;
    for handle in workers {
        if tokio::time::timeout_at(deadline, handle).await.is_err() {
            warn!("Worker did not drain before timeout");
        }
    }

    ledger.persist()?;
    info!("Ledger persisted, shutting down");

    Ok(())
}

fn spawn_cache_purger(cache: Arc<TaskCache>) -> tokio::task::JoinHandle<()> {
    let period = cache.ttl().max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            cache.purge_expired();
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())
            .expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
