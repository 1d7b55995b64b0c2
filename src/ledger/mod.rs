//! Two-phase billing ledger persisted in Fjall
//!
//! A job's price is *reserved* before any provider work starts and only
//! *confirmed* (debited) once the result has been delivered. Failures before
//! that point release the reservation without touching the balance:
//!
//! ```text
//! reserve -> PENDING --confirm--> CHARGED --refund--> REFUNDED
//!                    \--confirm (price 0)--> FREE
//!                    \--fail / confirm without funds--> FAILED
//! reserve (unmetered user) -> FREE
//! ```
//!
//! Balances are integer minor units and never go negative. All mutations of
//! one user's rows are serialized by a per-user lock.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use genledger::ledger::{BillingLedger, ReserveRequest, ReserveOutcome};
//!
//! let ledger = BillingLedger::open("data/ledger", pricing)?;
//! ledger.credit(user_id, 1000)?;
//! if let ReserveOutcome::Reserved { operation_id, .. } =
//!     ledger.reserve(user_id, &ReserveRequest::new("generate"))?
//! {
//!     ledger.confirm(operation_id)?;
//! }
//! ```

pub mod error;
pub mod locks;
pub mod models;
pub mod partitions;
pub mod store;

pub use error::{LedgerError, Result};
pub use models::{
    Account, LedgerStats, Operation, OperationStatus, ReserveOutcome, ReserveRequest, UserStats,
};
pub use store::BillingLedger;
