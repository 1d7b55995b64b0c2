use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle of a billed operation.
///
/// Legal transitions: PENDING -> {CHARGED, FREE, FAILED}, CHARGED -> REFUNDED.
/// Unmetered reservations are created directly in FREE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Charged,
    Free,
    Failed,
    Refunded,
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationStatus::Pending => "PENDING",
            OperationStatus::Charged => "CHARGED",
            OperationStatus::Free => "FREE",
            OperationStatus::Failed => "FAILED",
            OperationStatus::Refunded => "REFUNDED",
        };
        f.write_str(s)
    }
}

/// Persistent billing record for one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: u64,
    pub user_id: u64,
    #[serde(rename = "type")]
    pub operation_type: String,
    /// Minor units
    pub price: i64,
    pub original_price: Option<i64>,
    pub discount_percent: Option<u8>,
    pub status: OperationStatus,
    pub provider_task_id: Option<String>,
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-user balance row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: u64,
    /// Minor units, never negative
    pub balance: i64,
    /// Reservations for unmetered users are recorded as FREE
    #[serde(default)]
    pub unmetered: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn empty(user_id: u64) -> Self {
        Self {
            user_id,
            balance: 0,
            unmetered: false,
            updated_at: None,
        }
    }
}

/// Per-user usage aggregates, updated when an operation is confirmed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: u64,
    pub total_operations: u64,
    /// Minor units actually charged
    pub total_spent: i64,
    #[serde(default)]
    pub operations_by_type: BTreeMap<String, u64>,
    #[serde(default)]
    pub models_used: BTreeMap<String, u64>,
    pub first_operation_at: Option<DateTime<Utc>>,
    pub last_operation_at: Option<DateTime<Utc>>,
}

impl UserStats {
    pub fn empty(user_id: u64) -> Self {
        Self {
            user_id,
            total_operations: 0,
            total_spent: 0,
            operations_by_type: BTreeMap::new(),
            models_used: BTreeMap::new(),
            first_operation_at: None,
            last_operation_at: None,
        }
    }

    /// Count a CHARGED or FREE operation
    pub fn record(&mut self, operation: &Operation, at: DateTime<Utc>) {
        self.total_operations += 1;
        if operation.status == OperationStatus::Charged {
            self.total_spent = self.total_spent.saturating_add(operation.price);
        }
        *self
            .operations_by_type
            .entry(operation.operation_type.clone())
            .or_default() += 1;
        if let Some(model) = &operation.model {
            *self.models_used.entry(model.clone()).or_default() += 1;
        }
        self.first_operation_at.get_or_insert(at);
        self.last_operation_at = Some(at);
    }
}

/// What is being reserved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveRequest {
    pub operation_type: String,
    pub model: Option<String>,
    pub discount_percent: Option<u8>,
}

impl ReserveRequest {
    pub fn new(operation_type: impl Into<String>) -> Self {
        Self {
            operation_type: operation_type.into(),
            model: None,
            discount_percent: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_discount(mut self, percent: Option<u8>) -> Self {
        self.discount_percent = percent;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// PENDING operation created; balance untouched until confirm
    Reserved { operation_id: u64, price: i64 },
    /// Unmetered user; FREE operation created
    Free { operation_id: u64 },
    /// Nothing was written
    InsufficientFunds { required: i64, available: i64 },
}

impl ReserveOutcome {
    pub fn operation_id(&self) -> Option<u64> {
        match self {
            ReserveOutcome::Reserved { operation_id, .. } | ReserveOutcome::Free { operation_id } => {
                Some(*operation_id)
            }
            ReserveOutcome::InsufficientFunds { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub account_count: usize,
    pub operation_count: usize,
    pub pending_count: usize,
}
