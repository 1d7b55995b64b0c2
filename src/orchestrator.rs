//! Per-job sequencing across the provider and the ledger
//!
//! ```text
//! resolve model -> reserve -> submit -> attach task -> poll until terminal
//!   -> resolve result -> deliver -> confirm
//! ```
//!
//! Once a reservation exists, any error fails that operation before the error
//! propagates, so a user is never charged for a job that did not deliver.

use crate::catalog::{CatalogError, ModelCatalog};
use crate::humanize::format_minor;
use crate::ledger::{BillingLedger, LedgerError, ReserveOutcome, ReserveRequest};
use crate::notify::{DeliveryTarget, Notifier};
use crate::observability::Metrics;
use crate::provider::{
    Asset, GenerationProvider, JobKind, JobStatus, ProviderError, StatusReport,
};
use crate::retry::Classification;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Insufficient funds: need {required}, have {available}")]
    InsufficientFunds { required: i64, available: i64 },

    #[error("Provider did not finish after {attempts} polls ({elapsed:?})")]
    Timeout { attempts: u32, elapsed: Duration },

    #[error("Provider rejected the job: {0}")]
    ProviderRejected(String),

    #[error("Provider lost track of task {0}")]
    TaskLost(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl JobError {
    /// Text safe to show the end user
    pub fn user_message(&self) -> String {
        match self {
            JobError::InsufficientFunds {
                required,
                available,
            } => format!(
                "Not enough balance: this costs {}, you have {} (short by {}).",
                format_minor(*required),
                format_minor(*available),
                format_minor(required - available)
            ),
            JobError::Timeout { .. } => {
                "The generation service did not finish in time. You were not charged.".to_string()
            }
            _ => "Generation failed. You were not charged.".to_string(),
        }
    }
}

/// A job accepted for processing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(default)]
    pub job_id: Option<String>,
    pub user_id: u64,
    #[serde(default)]
    pub chat_id: Option<i64>,
    pub kind: JobKind,
    #[serde(default)]
    pub model_alias: Option<String>,
    pub payload: Value,
    #[serde(default)]
    pub discount_percent: Option<u8>,
    #[serde(default)]
    pub caption: Option<String>,
}

impl JobRequest {
    pub fn new(user_id: u64, kind: JobKind, payload: Value) -> Self {
        Self {
            job_id: None,
            user_id,
            chat_id: None,
            kind,
            model_alias: None,
            payload,
            discount_percent: None,
            caption: None,
        }
    }

    fn target(&self) -> DeliveryTarget {
        DeliveryTarget {
            user_id: self.user_id,
            chat_id: self.chat_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Billing {
    Charged { price: i64 },
    Free,
    /// Delivered, but the balance no longer covered the reservation
    NotCharged,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job_id: String,
    pub operation_id: u64,
    pub provider_task_id: String,
    pub asset: Asset,
    pub billing: Billing,
}

/// Poll ceilings for one job kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub max_attempts: u32,
    pub timeout: Duration,
}

/// Status polling cadence and ceilings
#[derive(Debug, Clone, PartialEq)]
pub struct PollSettings {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub backoff_multiplier: f64,
    pub max_attempts: u32,
    pub timeout: Duration,
    /// Kinds that do not use `max_attempts`/`timeout`
    pub per_kind: HashMap<JobKind, PollBudget>,
}

impl Default for PollSettings {
    fn default() -> Self {
        let budget = |max_attempts, secs| PollBudget {
            max_attempts,
            timeout: Duration::from_secs(secs),
        };
        Self {
            initial_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(10),
            backoff_multiplier: 1.2,
            max_attempts: 120,
            timeout: Duration::from_secs(240),
            per_kind: HashMap::from([
                (JobKind::Edit, budget(180, 360)),
                (JobKind::Merge, budget(180, 360)),
                (JobKind::Retouch, budget(180, 360)),
                (JobKind::FaceSwap, budget(150, 300)),
                (JobKind::Upscale, budget(90, 180)),
            ]),
        }
    }
}

impl PollSettings {
    pub fn for_kind(&self, kind: JobKind) -> PollBudget {
        self.per_kind.get(&kind).copied().unwrap_or(PollBudget {
            max_attempts: self.max_attempts,
            timeout: self.timeout,
        })
    }

    fn next_interval(&self, current: Duration) -> Duration {
        current
            .mul_f64(self.backoff_multiplier.max(1.0))
            .min(self.max_interval)
    }
}

pub struct JobOrchestrator {
    provider: Arc<dyn GenerationProvider>,
    ledger: BillingLedger,
    catalog: Arc<dyn ModelCatalog>,
    notifier: Arc<dyn Notifier>,
    poll: PollSettings,
    metrics: Arc<Metrics>,
}

impl JobOrchestrator {
    pub fn new(
        provider: Arc<dyn GenerationProvider>,
        ledger: BillingLedger,
        catalog: Arc<dyn ModelCatalog>,
        notifier: Arc<dyn Notifier>,
        poll: PollSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            provider,
            ledger,
            catalog,
            notifier,
            poll,
            metrics,
        }
    }

    pub fn ledger(&self) -> &BillingLedger {
        &self.ledger
    }

    /// Run one job to completion
    pub async fn run(&self, request: JobRequest) -> Result<JobOutcome, JobError> {
        let job_id = request
            .job_id
            .clone()
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        let span = info_span!(
            "job",
            job_id = %job_id,
            user_id = request.user_id,
            kind = %request.kind
        );

        async move {
            let result = self.run_inner(job_id, &request).await;
            match &result {
                Ok(outcome) => {
                    self.metrics.job_completed();
                    info!(
                        operation_id = outcome.operation_id,
                        task_id = %outcome.provider_task_id,
                        billing = ?outcome.billing,
                        "Job completed"
                    );
                }
                Err(e) => {
                    self.metrics.job_failed();
                    warn!(error = %e, "Job failed");
                    self.send_failure(&request, e).await;
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_inner(&self, job_id: String, request: &JobRequest) -> Result<JobOutcome, JobError> {
        let model = self
            .catalog
            .resolve(request.kind, request.model_alias.as_deref())?;

        let reservation = ReserveRequest::new(request.kind.as_str())
            .with_model(model.clone())
            .with_discount(request.discount_percent);

        let (operation_id, free) = match self.ledger.reserve(request.user_id, &reservation)? {
            ReserveOutcome::Reserved { operation_id, .. } => (operation_id, false),
            ReserveOutcome::Free { operation_id } => (operation_id, true),
            ReserveOutcome::InsufficientFunds {
                required,
                available,
            } => {
                self.metrics.insufficient_funds();
                return Err(JobError::InsufficientFunds {
                    required,
                    available,
                });
            }
        };

        let (task_id, asset) = match self.execute(request, &model, operation_id).await {
            Ok(done) => done,
            Err(e) => {
                if !free {
                    self.release(operation_id);
                }
                return Err(e);
            }
        };

        match self
            .notifier
            .deliver(&request.target(), &asset, request.caption.as_deref())
            .await
        {
            Ok(true) => debug!(operation_id, "Result delivered"),
            Ok(false) => warn!(operation_id, "Notifier refused delivery, confirming anyway"),
            Err(e) => warn!(operation_id, error = %e, "Delivery failed, confirming anyway"),
        }

        let billing = if free {
            Billing::Free
        } else {
            match self.ledger.confirm(operation_id) {
                Ok(true) => {
                    self.metrics.operation_charged();
                    let price = self
                        .ledger
                        .operation(operation_id)?
                        .map(|op| op.price)
                        .unwrap_or_default();
                    Billing::Charged { price }
                }
                Ok(false) => Billing::NotCharged,
                Err(e) => {
                    self.release(operation_id);
                    return Err(e.into());
                }
            }
        };

        Ok(JobOutcome {
            job_id,
            operation_id,
            provider_task_id: task_id,
            asset,
            billing,
        })
    }

    async fn execute(
        &self,
        request: &JobRequest,
        model: &str,
        operation_id: u64,
    ) -> Result<(String, Asset), JobError> {
        let task_id = self
            .provider
            .submit(request.kind, model, &request.payload)
            .await?;
        self.ledger.attach_task(operation_id, &task_id)?;

        let report = self
            .poll_until_terminal(&task_id, model, self.poll.for_kind(request.kind))
            .await?;
        let result_ref = report
            .result_ref
            .ok_or_else(|| ProviderError::NoResult(task_id.clone()))?;

        let asset = self.provider.resolve_result(&result_ref).await?;
        Ok((task_id, asset))
    }

    async fn poll_until_terminal(
        &self,
        task_id: &str,
        model: &str,
        budget: PollBudget,
    ) -> Result<StatusReport, JobError> {
        let started = Instant::now();
        let mut interval = self.poll.initial_interval;

        for attempt in 1..=budget.max_attempts {
            let remaining = budget.timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(JobError::Timeout {
                    attempts: attempt - 1,
                    elapsed: started.elapsed(),
                });
            }
            tokio::time::sleep(interval.min(remaining)).await;

            match self.provider.poll_status(task_id, model).await {
                Ok(report) => match report.status {
                    JobStatus::Succeeded => {
                        debug!(task_id, attempt, "Provider job succeeded");
                        return Ok(report);
                    }
                    JobStatus::Failed => {
                        let message = report
                            .error
                            .unwrap_or_else(|| "provider reported failure".to_string());
                        return Err(JobError::ProviderRejected(message));
                    }
                    JobStatus::NotFound => return Err(JobError::TaskLost(task_id.to_string())),
                    JobStatus::Queued | JobStatus::Processing => {
                        debug!(task_id, attempt, status = %report.status, "Provider job pending");
                    }
                },
                Err(e) if e.classify() == Classification::Retryable => {
                    warn!(task_id, attempt, error = %e, "Status poll failed, will retry");
                }
                Err(e) => return Err(e.into()),
            }

            interval = self.poll.next_interval(interval);
        }

        Err(JobError::Timeout {
            attempts: budget.max_attempts,
            elapsed: started.elapsed(),
        })
    }

    fn release(&self, operation_id: u64) {
        match self.ledger.fail(operation_id) {
            Ok(true) => info!(operation_id, "Reservation released"),
            Ok(false) => warn!(operation_id, "Reservation was not pending, nothing released"),
            Err(e) => warn!(operation_id, error = %e, "Failed to release reservation"),
        }
    }

    async fn send_failure(&self, request: &JobRequest, error: &JobError) {
        match self
            .notifier
            .notify_failure(&request.target(), &error.user_message())
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!("Failure message refused by notifier"),
            Err(e) => warn!(error = %e, "Failure message could not be sent"),
        }
    }
}
