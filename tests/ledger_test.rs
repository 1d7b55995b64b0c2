mod common;

use common::create_test_ledger;
use genledger::ledger::{BillingLedger, OperationStatus, ReserveOutcome, ReserveRequest};
use genledger::pricing::ConfiguredPricing;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn reserve(ledger: &BillingLedger, user_id: u64) -> ReserveOutcome {
    ledger
        .reserve(user_id, &ReserveRequest::new("generate").with_model("fal-ai/nano-banana"))
        .unwrap()
}

fn reserved_id(outcome: ReserveOutcome) -> u64 {
    match outcome {
        ReserveOutcome::Reserved { operation_id, .. } => operation_id,
        other => panic!("expected reservation, got {other:?}"),
    }
}

#[test]
fn test_reserve_then_confirm_charges_once() {
    let (ledger, _dir) = create_test_ledger(900);
    ledger.credit(1, 1000).unwrap();

    let outcome = reserve(&ledger, 1);
    assert!(matches!(outcome, ReserveOutcome::Reserved { price: 900, .. }));
    let op_id = reserved_id(outcome);

    // Reservation alone moves no money
    assert_eq!(ledger.balance(1).unwrap(), 1000);
    let op = ledger.operation(op_id).unwrap().unwrap();
    assert_eq!(op.status, OperationStatus::Pending);
    assert_eq!(op.model.as_deref(), Some("fal-ai/nano-banana"));

    assert!(ledger.confirm(op_id).unwrap());
    assert_eq!(ledger.balance(1).unwrap(), 100);
    assert_eq!(
        ledger.operation(op_id).unwrap().unwrap().status,
        OperationStatus::Charged
    );

    assert!(!ledger.confirm(op_id).unwrap());
    assert_eq!(ledger.balance(1).unwrap(), 100);
}

#[test]
fn test_insufficient_funds_writes_nothing() {
    let (ledger, _dir) = create_test_ledger(900);
    ledger.credit(2, 100).unwrap();

    let outcome = reserve(&ledger, 2);

    assert_eq!(
        outcome,
        ReserveOutcome::InsufficientFunds {
            required: 900,
            available: 100
        }
    );
    assert_eq!(ledger.balance(2).unwrap(), 100);
    assert!(ledger.operations_for_user(2, 10).unwrap().is_empty());
}

#[test]
fn test_unknown_user_has_no_funds() {
    let (ledger, _dir) = create_test_ledger(900);

    let outcome = reserve(&ledger, 99);

    assert_eq!(
        outcome,
        ReserveOutcome::InsufficientFunds {
            required: 900,
            available: 0
        }
    );
}

#[test]
fn test_refund_restores_balance_exactly() {
    let (ledger, _dir) = create_test_ledger(900);
    ledger.credit(3, 1250).unwrap();

    let op_id = reserved_id(reserve(&ledger, 3));
    assert!(ledger.confirm(op_id).unwrap());
    assert_eq!(ledger.balance(3).unwrap(), 350);

    assert!(ledger.refund(op_id).unwrap());
    assert_eq!(ledger.balance(3).unwrap(), 1250);
    assert_eq!(
        ledger.operation(op_id).unwrap().unwrap().status,
        OperationStatus::Refunded
    );

    // Refund is one-shot
    assert!(!ledger.refund(op_id).unwrap());
    assert_eq!(ledger.balance(3).unwrap(), 1250);
}

#[test]
fn test_illegal_transitions_are_rejected() {
    let (ledger, _dir) = create_test_ledger(900);
    ledger.credit(4, 5000).unwrap();

    // PENDING -> FAILED, then nothing else applies
    let failed = reserved_id(reserve(&ledger, 4));
    assert!(ledger.fail(failed).unwrap());
    assert!(!ledger.confirm(failed).unwrap());
    assert!(!ledger.refund(failed).unwrap());
    assert!(!ledger.fail(failed).unwrap());

    // PENDING cannot be refunded
    let pending = reserved_id(reserve(&ledger, 4));
    assert!(!ledger.refund(pending).unwrap());

    // CHARGED cannot be failed
    assert!(ledger.confirm(pending).unwrap());
    assert!(!ledger.fail(pending).unwrap());
    assert_eq!(
        ledger.operation(pending).unwrap().unwrap().status,
        OperationStatus::Charged
    );

    assert_eq!(ledger.balance(4).unwrap(), 4100);
}

#[test]
fn test_unknown_operation_is_rejected() {
    let (ledger, _dir) = create_test_ledger(900);

    assert!(!ledger.confirm(12345).unwrap());
    assert!(!ledger.fail(12345).unwrap());
    assert!(!ledger.refund(12345).unwrap());
    assert!(ledger.operation(12345).unwrap().is_none());
}

#[test]
fn test_unmetered_user_gets_free_operation() {
    let (ledger, _dir) = create_test_ledger(900);
    ledger.set_unmetered(5, true).unwrap();

    let outcome = reserve(&ledger, 5);
    let ReserveOutcome::Free { operation_id } = outcome else {
        panic!("expected free reservation, got {outcome:?}");
    };

    let op = ledger.operation(operation_id).unwrap().unwrap();
    assert_eq!(op.status, OperationStatus::Free);
    assert_eq!(op.price, 0);
    assert_eq!(op.original_price, Some(900));
    assert_eq!(ledger.balance(5).unwrap(), 0);

    // FREE is terminal
    assert!(!ledger.confirm(operation_id).unwrap());
    assert!(!ledger.fail(operation_id).unwrap());
}

#[test]
fn test_discount_is_recorded() {
    let (ledger, _dir) = create_test_ledger(900);
    ledger.credit(6, 1000).unwrap();

    let outcome = ledger
        .reserve(6, &ReserveRequest::new("edit").with_discount(Some(15)))
        .unwrap();
    let op_id = reserved_id(outcome);

    let op = ledger.operation(op_id).unwrap().unwrap();
    // 900 * 15% = 135
    assert_eq!(op.price, 765);
    assert_eq!(op.original_price, Some(900));
    assert_eq!(op.discount_percent, Some(15));

    ledger.confirm(op_id).unwrap();
    assert_eq!(ledger.balance(6).unwrap(), 235);
}

#[test]
fn test_confirm_fails_when_balance_no_longer_covers() {
    let (ledger, _dir) = create_test_ledger(900);
    ledger.credit(7, 1000).unwrap();

    // Two reservations fit individually, not together
    let first = reserved_id(reserve(&ledger, 7));
    let second = reserved_id(reserve(&ledger, 7));

    assert!(ledger.confirm(first).unwrap());
    assert!(!ledger.confirm(second).unwrap());

    assert_eq!(ledger.balance(7).unwrap(), 100);
    assert_eq!(
        ledger.operation(second).unwrap().unwrap().status,
        OperationStatus::Failed
    );
}

#[test]
fn test_concurrent_confirms_charge_once() {
    let (ledger, _dir) = create_test_ledger(900);
    ledger.credit(8, 1000).unwrap();
    let op_id = reserved_id(reserve(&ledger, 8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ledger = ledger.clone();
            thread::spawn(move || ledger.confirm(op_id).unwrap())
        })
        .collect();
    let charged = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|confirmed| *confirmed)
        .count();

    assert_eq!(charged, 1);
    assert_eq!(ledger.balance(8).unwrap(), 100);
}

#[test]
fn test_concurrent_jobs_never_overdraw() {
    let (ledger, _dir) = create_test_ledger(300);
    ledger.credit(9, 1000).unwrap();

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let ledger = ledger.clone();
            thread::spawn(move || match reserve(&ledger, 9) {
                ReserveOutcome::Reserved { operation_id, .. } => ledger.confirm(operation_id).unwrap(),
                _ => false,
            })
        })
        .collect();
    let charged = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|confirmed| *confirmed)
        .count();

    assert_eq!(charged, 3);
    assert_eq!(ledger.balance(9).unwrap(), 100);
}

#[test]
fn test_operations_listed_newest_first() {
    let (ledger, _dir) = create_test_ledger(100);
    ledger.credit(10, 1000).unwrap();
    ledger.credit(11, 1000).unwrap();

    let ids: Vec<u64> = (0..5).map(|_| reserved_id(reserve(&ledger, 10))).collect();
    reserve(&ledger, 11);

    let listed: Vec<u64> = ledger
        .operations_for_user(10, 3)
        .unwrap()
        .into_iter()
        .map(|op| op.id)
        .collect();

    assert_eq!(listed, vec![ids[4], ids[3], ids[2]]);
    assert!(listed.iter().all(|id| ledger.operation(*id).unwrap().unwrap().user_id == 10));
}

#[test]
fn test_state_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("ledger");
    let pricing = Arc::new(ConfiguredPricing::new(900, HashMap::from([("upscale".to_string(), 400)])));

    let op_id = {
        let ledger = BillingLedger::open(&path, pricing.clone()).unwrap();
        ledger.credit(12, 1000).unwrap();
        let outcome = ledger
            .reserve(12, &ReserveRequest::new("upscale"))
            .unwrap();
        let op_id = reserved_id(outcome);
        ledger.confirm(op_id).unwrap();
        ledger.persist().unwrap();
        op_id
    };

    let ledger = BillingLedger::open(&path, pricing).unwrap();
    assert_eq!(ledger.balance(12).unwrap(), 600);
    let op = ledger.operation(op_id).unwrap().unwrap();
    assert_eq!(op.status, OperationStatus::Charged);
    assert_eq!(op.price, 400);

    let next = reserved_id(reserve(&ledger, 12));
    assert!(next > op_id);
}
