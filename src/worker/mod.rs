//! Job worker pool
//!
//! Each worker owns one broker channel and runs jobs strictly one at a time;
//! concurrency comes from the number of workers.

pub mod runner;

use crate::orchestrator::JobOrchestrator;
use crate::queue::JobEnvelope;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

pub use runner::run_worker;

/// Spawn one worker per receiver. Workers stop once their channel closes.
pub fn spawn_workers(
    receivers: Vec<mpsc::Receiver<JobEnvelope>>,
    orchestrator: Arc<JobOrchestrator>,
) -> Vec<JoinHandle<()>> {
    info!(workers = receivers.len(), "Starting worker pool");
    receivers
        .into_iter()
        .enumerate()
        .map(|(worker_id, rx)| tokio::spawn(run_worker(worker_id, rx, orchestrator.clone())))
        .collect()
}
