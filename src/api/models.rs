//! Wire types for the job intake and ledger inspection endpoints.
//!
//! `POST /jobs` accepts a [`JobRequest`](crate::orchestrator::JobRequest):
//!
//! ```json
//! {
//!   "user_id": 42,
//!   "chat_id": 1001,
//!   "kind": "edit",
//!   "model_alias": "seedream",
//!   "payload": { "prompt": "make it blue", "image_urls": ["https://..."] },
//!   "discount_percent": 10,
//!   "caption": "Here you go"
//! }
//! ```
//!
//! Ledger rows ([`Account`](crate::ledger::Account),
//! [`Operation`](crate::ledger::Operation)) are returned as stored.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ledger::LedgerStats;
use crate::observability::MetricsSnapshot;

pub const DEFAULT_OPERATIONS_LIMIT: usize = 20;
pub const MAX_OPERATIONS_LIMIT: usize = 100;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct JobAcceptedResponse {
    pub job_id: String,
    pub seq: u64,
}

#[derive(Debug, Deserialize, Default)]
pub struct OperationsQuery {
    pub limit: Option<usize>,
}

impl OperationsQuery {
    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_OPERATIONS_LIMIT)
            .clamp(1, MAX_OPERATIONS_LIMIT)
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
    pub metrics: MetricsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger: Option<LedgerStats>,
}
