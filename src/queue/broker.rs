use crate::orchestrator::JobRequest;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Worker channel {0} is closed")]
    WorkerClosed(usize),

    #[error("Broker has no workers")]
    NoWorkers,
}

/// JobEnvelope wraps an accepted JobRequest with its intake sequence number
#[derive(Clone, Debug)]
pub struct JobEnvelope {
    pub seq: u64,
    pub request: JobRequest,
}

/// JobBroker distributes accepted jobs from the API to the worker pool
///
/// Architecture:
/// 1. API calls `broker.enqueue(request)`
/// 2. Broker assigns the next intake sequence number
/// 3. Broker sends JobEnvelope{seq, request} to a worker via mpsc channel
/// 4. Round-robin distribution across worker pool
/// 5. Backpressure via bounded channels
///
/// Jobs are not persisted before distribution: money only moves through the
/// ledger, which the worker touches after the job is received.
pub struct JobBroker {
    worker_channels: Vec<mpsc::Sender<JobEnvelope>>,
    next_worker: AtomicUsize,
    next_seq: AtomicU64,
}

impl JobBroker {
    /// Create a new JobBroker with worker channels
    ///
    /// Returns:
    /// - JobBroker instance (to be passed to API via Arc)
    /// - Vec of receivers (one per worker, for spawning workers)
    pub fn new(num_workers: usize, channel_size: usize) -> (Self, Vec<mpsc::Receiver<JobEnvelope>>) {
        info!(
            num_workers,
            channel_size, "Creating JobBroker with worker channels"
        );

        let mut worker_channels = Vec::with_capacity(num_workers);
        let mut worker_receivers = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let (tx, rx) = mpsc::channel(channel_size.max(1));
            worker_channels.push(tx);
            worker_receivers.push(rx);
            debug!(worker_id, "Created worker channel");
        }

        let broker = Self {
            worker_channels,
            next_worker: AtomicUsize::new(0),
            next_seq: AtomicU64::new(0),
        };

        (broker, worker_receivers)
    }

    /// Hand a job to the next worker (round-robin). Waits when that worker's
    /// channel is full.
    pub async fn enqueue(&self, request: JobRequest) -> Result<u64, BrokerError> {
        if self.worker_channels.is_empty() {
            return Err(BrokerError::NoWorkers);
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let worker_idx =
            self.next_worker.fetch_add(1, Ordering::Relaxed) % self.worker_channels.len();

        let envelope = JobEnvelope { seq, request };

        match self.worker_channels[worker_idx].send(envelope).await {
            Ok(_) => {
                debug!(seq, worker_idx, "Job sent to worker");
                Ok(seq)
            }
            Err(_) => {
                warn!(seq, worker_idx, "Worker channel closed, job not delivered");
                Err(BrokerError::WorkerClosed(worker_idx))
            }
        }
    }

    /// Get number of active workers
    pub fn num_workers(&self) -> usize {
        self.worker_channels.len()
    }

    /// Check if all worker channels are healthy (not closed)
    pub fn health_check(&self) -> bool {
        !self.worker_channels.is_empty() && self.worker_channels.iter().all(|ch| !ch.is_closed())
    }
}
