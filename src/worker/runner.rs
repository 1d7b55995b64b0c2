//! Worker loop - runs individual JobEnvelope messages through the orchestrator

use crate::orchestrator::{JobError, JobOrchestrator};
use crate::queue::JobEnvelope;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Pull jobs until the channel closes
pub async fn run_worker(
    worker_id: usize,
    mut rx: mpsc::Receiver<JobEnvelope>,
    orchestrator: Arc<JobOrchestrator>,
) {
    info!(worker_id, "Worker started");

    while let Some(envelope) = rx.recv().await {
        let seq = envelope.seq;
        match orchestrator.run(envelope.request).await {
            Ok(outcome) => {
                info!(worker_id, seq, job_id = %outcome.job_id, "Worker finished job");
            }
            Err(JobError::InsufficientFunds { .. }) => {
                info!(worker_id, seq, "Job rejected for insufficient funds");
            }
            Err(e @ (JobError::Ledger(_) | JobError::Catalog(_))) => {
                error!(worker_id, seq, error = %e, "Job aborted");
            }
            Err(e) => {
                warn!(worker_id, seq, error = %e, "Job failed");
            }
        }
    }

    info!(worker_id, "Worker channel closed, stopping");
}
