use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, info, warn};

use crate::pricing::PricingPolicy;

use super::error::{LedgerError, Result};
use super::locks::UserLocks;
use super::models::{
    Account, LedgerStats, Operation, OperationStatus, ReserveOutcome, ReserveRequest, UserStats,
};
use super::partitions::{
    NEXT_OPERATION_ID, decode_operation_key, decode_user_operation_key, encode_account_key,
    encode_meta_key, encode_operation_key, encode_user_operation_key, encode_user_operation_prefix,
    encode_user_stats_key,
};

/// Two-phase billing ledger backed by Fjall
///
/// Every read-check-write on a user's balance or operations holds that
/// user's exclusive lock. Writes touching more than one row go through a
/// single Fjall batch.
#[derive(Clone)]
pub struct BillingLedger {
    keyspace: Keyspace,
    accounts: PartitionHandle,
    operations: PartitionHandle,
    user_operations: PartitionHandle,
    user_stats: PartitionHandle,
    metadata: PartitionHandle,
    next_id: Arc<AtomicU64>,
    locks: Arc<UserLocks>,
    pricing: Arc<dyn PricingPolicy>,
}

impl BillingLedger {
    /// Open or create a ledger at the given path
    pub fn open<P: AsRef<Path>>(path: P, pricing: Arc<dyn PricingPolicy>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening billing ledger at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let accounts = keyspace.open_partition("accounts", PartitionCreateOptions::default())?;
        let operations = keyspace.open_partition("operations", PartitionCreateOptions::default())?;
        let user_operations =
            keyspace.open_partition("user_operations", PartitionCreateOptions::default())?;
        let user_stats = keyspace.open_partition("user_stats", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        // The stored counter may lag the newest row when reservations for
        // different users commit out of order.
        let stored = metadata
            .get(encode_meta_key(NEXT_OPERATION_ID))?
            .map(|bytes| u64::from_be_bytes(bytes.as_ref().try_into().unwrap_or([0u8; 8])))
            .unwrap_or(1);
        let after_last = match operations.last_key_value()? {
            Some((key, _)) => decode_operation_key(&key)
                .ok_or_else(|| LedgerError::InvalidKey(String::from_utf8_lossy(&key).into_owned()))?
                + 1,
            None => 1,
        };
        let next_id = stored.max(after_last);

        info!(next_operation_id = next_id, "Billing ledger opened");
        Ok(Self {
            keyspace,
            accounts,
            operations,
            user_operations,
            user_stats,
            metadata,
            next_id: Arc::new(AtomicU64::new(next_id)),
            locks: Arc::new(UserLocks::default()),
            pricing,
        })
    }

    /// Account row, or a zero-balance metered account when none exists
    pub fn account(&self, user_id: u64) -> Result<Account> {
        match self.accounts.get(encode_account_key(user_id))? {
            Some(value) => Ok(serde_json::from_slice(&value)?),
            None => Ok(Account::empty(user_id)),
        }
    }

    pub fn balance(&self, user_id: u64) -> Result<i64> {
        Ok(self.account(user_id)?.balance)
    }

    /// Usage aggregates, or an empty row when the user never completed a job
    pub fn user_stats(&self, user_id: u64) -> Result<UserStats> {
        match self.user_stats.get(encode_user_stats_key(user_id))? {
            Some(value) => Ok(serde_json::from_slice(&value)?),
            None => Ok(UserStats::empty(user_id)),
        }
    }

    pub fn operation(&self, operation_id: u64) -> Result<Option<Operation>> {
        match self.operations.get(encode_operation_key(operation_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Newest first
    pub fn operations_for_user(&self, user_id: u64, limit: usize) -> Result<Vec<Operation>> {
        let mut result = Vec::new();
        for item in self
            .user_operations
            .prefix(encode_user_operation_prefix(user_id))
            .rev()
        {
            if result.len() >= limit {
                break;
            }
            let (key, _) = item?;
            let (_, operation_id) = decode_user_operation_key(&key)
                .ok_or_else(|| LedgerError::InvalidKey(String::from_utf8_lossy(&key).into_owned()))?;
            if let Some(operation) = self.operation(operation_id)? {
                result.push(operation);
            }
        }
        Ok(result)
    }

    /// Add funds; returns the new balance
    pub fn credit(&self, user_id: u64, amount: i64) -> Result<i64> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let handle = self.locks.handle(user_id);
        let _guard = handle.lock();

        let mut account = self.account(user_id)?;
        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or(LedgerError::InvalidAmount(amount))?;
        account.updated_at = Some(Utc::now());
        self.write_account(&account)?;

        info!(user_id, amount, balance = account.balance, "Balance credited");
        Ok(account.balance)
    }

    pub fn set_unmetered(&self, user_id: u64, unmetered: bool) -> Result<()> {
        let handle = self.locks.handle(user_id);
        let _guard = handle.lock();

        let mut account = self.account(user_id)?;
        account.unmetered = unmetered;
        account.updated_at = Some(Utc::now());
        self.write_account(&account)?;

        info!(user_id, unmetered, "Account access updated");
        Ok(())
    }

    /// Reserve the price of an operation without moving money
    pub fn reserve(&self, user_id: u64, request: &ReserveRequest) -> Result<ReserveOutcome> {
        let handle = self.locks.handle(user_id);
        let _guard = handle.lock();

        let quote = self.pricing.quote(
            &request.operation_type,
            request.model.as_deref(),
            request.discount_percent,
        );
        let account = self.account(user_id)?;

        let (status, price, original_price) = if account.unmetered {
            (OperationStatus::Free, 0, Some(quote.price))
        } else if account.balance < quote.price {
            info!(
                user_id,
                required = quote.price,
                available = account.balance,
                "Insufficient balance for reservation"
            );
            return Ok(ReserveOutcome::InsufficientFunds {
                required: quote.price,
                available: account.balance,
            });
        } else {
            (OperationStatus::Pending, quote.price, quote.original_price)
        };

        let operation_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let operation = Operation {
            id: operation_id,
            user_id,
            operation_type: request.operation_type.clone(),
            price,
            original_price,
            discount_percent: quote.discount_percent,
            status,
            provider_task_id: None,
            model: request.model.clone(),
            created_at: now,
            updated_at: now,
        };

        let mut batch = self.keyspace.batch();
        batch.insert(
            &self.operations,
            encode_operation_key(operation_id),
            serde_json::to_vec(&operation)?,
        );
        batch.insert(
            &self.user_operations,
            encode_user_operation_key(user_id, operation_id),
            Vec::<u8>::new(),
        );
        batch.insert(
            &self.metadata,
            encode_meta_key(NEXT_OPERATION_ID),
            (operation_id + 1).to_be_bytes().to_vec(),
        );
        batch.commit()?;

        info!(user_id, operation_id, price, status = %status, "Reservation created");
        Ok(match status {
            OperationStatus::Free => ReserveOutcome::Free { operation_id },
            _ => ReserveOutcome::Reserved {
                operation_id,
                price,
            },
        })
    }

    /// PENDING -> CHARGED (or FREE for a zero price). Returns false on any
    /// other status, or when the balance no longer covers the price, in which
    /// case the operation is marked FAILED.
    pub fn confirm(&self, operation_id: u64) -> Result<bool> {
        self.with_locked_operation(operation_id, "confirm", |ledger, mut operation| {
            if operation.status != OperationStatus::Pending {
                debug!(operation_id, status = %operation.status, "Confirm skipped, not pending");
                return Ok(false);
            }

            let now = Utc::now();
            operation.updated_at = now;

            if operation.price == 0 {
                operation.status = OperationStatus::Free;
                let stats = ledger.recorded_stats(&operation)?;
                ledger.commit_rows(None, &operation, Some(&stats))?;
                info!(operation_id, "Zero-price operation confirmed as free");
                return Ok(true);
            }

            let mut account = ledger.account(operation.user_id)?;
            if account.balance < operation.price {
                operation.status = OperationStatus::Failed;
                ledger.write_operation(&operation)?;
                warn!(
                    operation_id,
                    user_id = operation.user_id,
                    required = operation.price,
                    available = account.balance,
                    "Balance no longer covers reservation, operation failed"
                );
                return Ok(false);
            }

            account.balance -= operation.price;
            account.updated_at = Some(now);
            operation.status = OperationStatus::Charged;
            let stats = ledger.recorded_stats(&operation)?;
            ledger.commit_rows(Some(&account), &operation, Some(&stats))?;

            info!(
                operation_id,
                user_id = operation.user_id,
                price = operation.price,
                balance = account.balance,
                "Operation charged"
            );
            Ok(true)
        })
    }

    /// PENDING -> FAILED without touching the balance
    pub fn fail(&self, operation_id: u64) -> Result<bool> {
        self.with_locked_operation(operation_id, "fail", |ledger, mut operation| {
            if operation.status != OperationStatus::Pending {
                if operation.status == OperationStatus::Charged {
                    warn!(operation_id, "Refusing to fail a charged operation, refund it instead");
                } else {
                    debug!(operation_id, status = %operation.status, "Fail skipped");
                }
                return Ok(false);
            }

            operation.status = OperationStatus::Failed;
            operation.updated_at = Utc::now();
            ledger.write_operation(&operation)?;
            info!(operation_id, user_id = operation.user_id, "Operation failed, nothing charged");
            Ok(true)
        })
    }

    /// CHARGED -> REFUNDED, crediting the price back
    pub fn refund(&self, operation_id: u64) -> Result<bool> {
        self.with_locked_operation(operation_id, "refund", |ledger, mut operation| {
            if operation.status != OperationStatus::Charged {
                debug!(operation_id, status = %operation.status, "Refund skipped, not charged");
                return Ok(false);
            }

            let now = Utc::now();
            let mut account = ledger.account(operation.user_id)?;
            account.balance = account
                .balance
                .checked_add(operation.price)
                .ok_or(LedgerError::InvalidAmount(operation.price))?;
            account.updated_at = Some(now);
            operation.status = OperationStatus::Refunded;
            operation.updated_at = now;
            ledger.commit_rows(Some(&account), &operation, None)?;

            info!(
                operation_id,
                user_id = operation.user_id,
                amount = operation.price,
                balance = account.balance,
                "Operation refunded"
            );
            Ok(true)
        })
    }

    /// Record the provider task for an operation. Only the first link sticks.
    pub fn attach_task(&self, operation_id: u64, task_id: &str) -> Result<bool> {
        self.with_locked_operation(operation_id, "attach_task", |ledger, mut operation| {
            if operation.provider_task_id.is_some() {
                return Ok(false);
            }
            operation.provider_task_id = Some(task_id.to_string());
            operation.updated_at = Utc::now();
            ledger.write_operation(&operation)?;
            debug!(operation_id, task_id, "Provider task attached");
            Ok(true)
        })
    }

    /// Fail every PENDING operation created before `created_before`.
    ///
    /// Run at startup, before any worker exists, to release reservations left
    /// behind by a process that stopped mid-job.
    pub fn fail_stale_pending(&self, created_before: DateTime<Utc>) -> Result<usize> {
        let mut stale = Vec::new();
        for item in self.operations.iter() {
            let (_, value) = item?;
            let operation: Operation = serde_json::from_slice(&value)?;
            if operation.status == OperationStatus::Pending && operation.created_at < created_before {
                stale.push(operation.id);
            }
        }

        let mut failed = 0;
        for operation_id in stale {
            if self.fail(operation_id)? {
                failed += 1;
            }
        }
        if failed > 0 {
            warn!(failed, "Released stale pending reservations");
        }
        Ok(failed)
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    pub fn stats(&self) -> Result<LedgerStats> {
        let mut stats = LedgerStats::default();

        for item in self.accounts.iter() {
            item?;
            stats.account_count += 1;
        }

        for item in self.operations.iter() {
            let (_, value) = item?;
            stats.operation_count += 1;
            let operation: Operation = serde_json::from_slice(&value)?;
            if operation.status == OperationStatus::Pending {
                stats.pending_count += 1;
            }
        }

        Ok(stats)
    }

    // Look up the owner, lock it, then re-read under the lock so the closure
    // sees the committed state.
    fn with_locked_operation<F>(&self, operation_id: u64, action: &str, f: F) -> Result<bool>
    where
        F: FnOnce(&Self, Operation) -> Result<bool>,
    {
        let Some(unlocked) = self.operation(operation_id)? else {
            warn!(operation_id, action, "Unknown operation");
            return Ok(false);
        };

        let handle = self.locks.handle(unlocked.user_id);
        let _guard = handle.lock();

        match self.operation(operation_id)? {
            Some(operation) => f(self, operation),
            None => Ok(false),
        }
    }

    fn write_account(&self, account: &Account) -> Result<()> {
        self.accounts
            .insert(encode_account_key(account.user_id), serde_json::to_vec(account)?)?;
        Ok(())
    }

    fn write_operation(&self, operation: &Operation) -> Result<()> {
        self.operations
            .insert(encode_operation_key(operation.id), serde_json::to_vec(operation)?)?;
        Ok(())
    }

    fn recorded_stats(&self, operation: &Operation) -> Result<UserStats> {
        let mut stats = self.user_stats(operation.user_id)?;
        stats.record(operation, operation.updated_at);
        Ok(stats)
    }

    // Account, operation and statistics change together or not at all
    fn commit_rows(
        &self,
        account: Option<&Account>,
        operation: &Operation,
        stats: Option<&UserStats>,
    ) -> Result<()> {
        let mut batch = self.keyspace.batch();
        if let Some(account) = account {
            batch.insert(
                &self.accounts,
                encode_account_key(account.user_id),
                serde_json::to_vec(account)?,
            );
        }
        batch.insert(
            &self.operations,
            encode_operation_key(operation.id),
            serde_json::to_vec(operation)?,
        );
        if let Some(stats) = stats {
            batch.insert(
                &self.user_stats,
                encode_user_stats_key(stats.user_id),
                serde_json::to_vec(stats)?,
            );
        }
        batch.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::ConfiguredPricing;
    use tempfile::TempDir;

    fn create_test_ledger(price: i64) -> (BillingLedger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let ledger = BillingLedger::open(
            temp_dir.path().join("test_ledger"),
            Arc::new(ConfiguredPricing::flat(price)),
        )
        .unwrap();
        (ledger, temp_dir)
    }

    #[test]
    fn test_missing_account_is_empty() {
        let (ledger, _temp) = create_test_ledger(900);
        let account = ledger.account(42).unwrap();
        assert_eq!(account, Account::empty(42));
    }

    #[test]
    fn test_credit_rejects_non_positive() {
        let (ledger, _temp) = create_test_ledger(900);
        assert!(matches!(ledger.credit(1, 0), Err(LedgerError::InvalidAmount(0))));
        assert!(matches!(ledger.credit(1, -5), Err(LedgerError::InvalidAmount(-5))));
        assert_eq!(ledger.credit(1, 250).unwrap(), 250);
        assert_eq!(ledger.credit(1, 50).unwrap(), 300);
    }

    #[test]
    fn test_operation_ids_are_monotonic_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ledger");
        let pricing: Arc<dyn PricingPolicy> = Arc::new(ConfiguredPricing::flat(10));

        let first_id = {
            let ledger = BillingLedger::open(&path, pricing.clone()).unwrap();
            ledger.credit(1, 100).unwrap();
            let a = ledger.reserve(1, &ReserveRequest::new("generate")).unwrap();
            let b = ledger.reserve(1, &ReserveRequest::new("generate")).unwrap();
            assert!(b.operation_id().unwrap() > a.operation_id().unwrap());
            ledger.persist().unwrap();
            b.operation_id().unwrap()
        };

        let ledger = BillingLedger::open(&path, pricing).unwrap();
        let next = ledger.reserve(1, &ReserveRequest::new("generate")).unwrap();
        assert!(next.operation_id().unwrap() > first_id);
    }

    #[test]
    fn test_attach_task_once() {
        let (ledger, _temp) = create_test_ledger(10);
        ledger.credit(1, 100).unwrap();
        let id = ledger
            .reserve(1, &ReserveRequest::new("generate"))
            .unwrap()
            .operation_id()
            .unwrap();

        assert!(ledger.attach_task(id, "req-1").unwrap());
        assert!(!ledger.attach_task(id, "req-2").unwrap());
        assert_eq!(
            ledger.operation(id).unwrap().unwrap().provider_task_id.as_deref(),
            Some("req-1")
        );
        assert!(!ledger.attach_task(999, "req-3").unwrap());
    }

    #[test]
    fn test_stats() {
        let (ledger, _temp) = create_test_ledger(10);
        ledger.credit(1, 100).unwrap();
        ledger.credit(2, 100).unwrap();
        let id = ledger
            .reserve(1, &ReserveRequest::new("generate"))
            .unwrap()
            .operation_id()
            .unwrap();
        ledger.reserve(2, &ReserveRequest::new("generate")).unwrap();
        ledger.confirm(id).unwrap();

        let stats = ledger.stats().unwrap();
        assert_eq!(stats.account_count, 2);
        assert_eq!(stats.operation_count, 2);
        assert_eq!(stats.pending_count, 1);
    }

    #[test]
    fn test_confirm_updates_user_stats() {
        let (ledger, _temp) = create_test_ledger(300);
        ledger.credit(1, 1000).unwrap();

        let charged = ledger
            .reserve(1, &ReserveRequest::new("generate").with_model("fal-ai/flux"))
            .unwrap()
            .operation_id()
            .unwrap();
        let failed = ledger
            .reserve(1, &ReserveRequest::new("upscale"))
            .unwrap()
            .operation_id()
            .unwrap();
        assert!(ledger.confirm(charged).unwrap());
        assert!(ledger.fail(failed).unwrap());

        let stats = ledger.user_stats(1).unwrap();
        assert_eq!(stats.total_operations, 1);
        assert_eq!(stats.total_spent, 300);
        assert_eq!(stats.operations_by_type.get("generate"), Some(&1));
        assert!(!stats.operations_by_type.contains_key("upscale"));
        assert_eq!(stats.models_used.get("fal-ai/flux"), Some(&1));
        assert!(stats.first_operation_at.is_some());

        // Refunds leave usage history untouched
        assert!(ledger.refund(charged).unwrap());
        assert_eq!(ledger.user_stats(1).unwrap().total_spent, 300);
        assert_eq!(ledger.user_stats(2).unwrap(), UserStats::empty(2));
    }

    #[test]
    fn test_fail_stale_pending() {
        let (ledger, _temp) = create_test_ledger(100);
        ledger.credit(1, 1000).unwrap();
        let orphan = ledger
            .reserve(1, &ReserveRequest::new("generate"))
            .unwrap()
            .operation_id()
            .unwrap();
        let charged = ledger
            .reserve(1, &ReserveRequest::new("generate"))
            .unwrap()
            .operation_id()
            .unwrap();
        ledger.confirm(charged).unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(ledger.fail_stale_pending(cutoff).unwrap(), 1);
        assert_eq!(
            ledger.operation(orphan).unwrap().unwrap().status,
            OperationStatus::Failed
        );
        assert_eq!(
            ledger.operation(charged).unwrap().unwrap().status,
            OperationStatus::Charged
        );
        assert_eq!(ledger.balance(1).unwrap(), 900);

        let fresh = ledger
            .reserve(1, &ReserveRequest::new("generate"))
            .unwrap()
            .operation_id()
            .unwrap();
        let past = Utc::now() - chrono::Duration::seconds(60);
        assert_eq!(ledger.fail_stale_pending(past).unwrap(), 0);
        assert_eq!(
            ledger.operation(fresh).unwrap().unwrap().status,
            OperationStatus::Pending
        );
    }

    #[test]
    fn test_persist() {
        let (ledger, _temp) = create_test_ledger(10);
        ledger.credit(1, 100).unwrap();
        ledger.persist().unwrap();
    }
}
