//! Outgoing transfer lifecycle against a real PostgreSQL store.
//!
//! Run with: cargo test -- --ignored

mod common;

use chrono::{Duration, SubsecRound, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use creditors_agent::account::{AccountService, apply_account_update};
use creditors_agent::messages::FinalizationOutcome;
use creditors_agent::transfer::{
    TransferError, TransferOutcome, TransferPhase, TransferRequest, TransferService,
    apply_prep_failed, apply_transfer_finalized, apply_transfer_prepared,
};

use common::{activated_creditor, count_pending_signals, ledger_sum, setup_pool};

/// Creditor with an ACTIVE account holding `balance` units.
async fn active_account(pool: &PgPool, debtor_id: i64, balance: i64) -> i64 {
    let creditor_id = activated_creditor(pool).await;
    AccountService::new(pool.clone())
        .create(creditor_id, debtor_id)
        .await
        .expect("Failed to create account");
    let ts = Utc::now().trunc_subsecs(6);
    apply_account_update(pool, creditor_id, debtor_id, ts, 1, balance)
        .await
        .expect("Failed to apply activating snapshot");
    creditor_id
}

fn request(creditor_id: i64, debtor_id: i64, amount: i64) -> TransferRequest {
    TransferRequest {
        creditor_id,
        transfer_id: Uuid::new_v4(),
        debtor_id,
        amount,
        recipient: "acct-recipient-1".to_string(),
        deadline: Utc::now() + Duration::hours(1),
    }
}

#[tokio::test]
#[ignore] // Requires PostgreSQL running
async fn test_transfer_commit_flow() {
    let pool = setup_pool().await;
    let debtor_id = 2001;
    let creditor_id = active_account(&pool, debtor_id, 1000).await;
    let service = TransferService::new(pool.clone());

    let req = request(creditor_id, debtor_id, 100);
    let transfer = service.initiate(&req).await.expect("initiate");
    assert_eq!(transfer.phase, TransferPhase::Initiated);
    assert_eq!(transfer.outcome, TransferOutcome::Pending);
    assert_eq!(
        count_pending_signals(&pool, creditor_id).await,
        2,
        "configure and prepare commands queued"
    );

    let prepared = apply_transfer_prepared(&pool, creditor_id, debtor_id, req.transfer_id, 100)
        .await
        .expect("prepared event");
    assert!(prepared);
    let transfer = service
        .get(creditor_id, req.transfer_id)
        .await
        .expect("get")
        .expect("transfer exists");
    assert_eq!(transfer.phase, TransferPhase::Prepared);
    assert_eq!(transfer.prepared_amount, 100);

    let transfer = service
        .finalize_request(creditor_id, req.transfer_id, true)
        .await
        .expect("finalize request");
    assert_eq!(transfer.phase, TransferPhase::Finalizing);
    assert_eq!(count_pending_signals(&pool, creditor_id).await, 3);

    // Re-requesting while the command is in flight is a no-op.
    let again = service
        .finalize_request(creditor_id, req.transfer_id, true)
        .await
        .expect("repeat finalize request");
    assert_eq!(again.latest_update_id, transfer.latest_update_id);

    let finalized = apply_transfer_finalized(
        &pool,
        creditor_id,
        debtor_id,
        req.transfer_id,
        FinalizationOutcome::Committed,
        None,
    )
    .await
    .expect("finalized event");
    assert!(finalized);

    let transfer = service
        .get(creditor_id, req.transfer_id)
        .await
        .expect("get")
        .expect("transfer exists");
    assert_eq!(transfer.phase, TransferPhase::Finalized);
    assert_eq!(transfer.outcome, TransferOutcome::Committed);
    assert!(transfer.finalized_at.is_some());

    let account = AccountService::new(pool.clone())
        .get(creditor_id, debtor_id)
        .await
        .expect("get account")
        .expect("account exists");
    assert_eq!(account.current_balance, 900, "commit debits the account");
    assert_eq!(
        ledger_sum(&pool, creditor_id, debtor_id).await,
        900,
        "the debit entry keeps the ledger in step with the balance"
    );
    assert_eq!(
        count_pending_signals(&pool, creditor_id).await,
        1,
        "finalization clears the transfer's queued commands"
    );
}

#[tokio::test]
#[ignore]
async fn test_initiate_idempotency() {
    let pool = setup_pool().await;
    let debtor_id = 2002;
    let creditor_id = active_account(&pool, debtor_id, 1000).await;
    let service = TransferService::new(pool.clone());

    let req = request(creditor_id, debtor_id, 100);
    let first = service.initiate(&req).await.expect("initiate");

    // Same request again returns the existing record without a second
    // prepare command.
    let retried = service.initiate(&req).await.expect("retry");
    assert_eq!(retried.latest_update_id, first.latest_update_id);
    assert_eq!(count_pending_signals(&pool, creditor_id).await, 2);

    // Same UUID with different parameters is a different transfer.
    let mut altered = req.clone();
    altered.amount = 200;
    let conflict = service.initiate(&altered).await;
    assert!(matches!(
        conflict,
        Err(TransferError::TransferExists(id)) if id == req.transfer_id
    ));

    let no_account = request(creditor_id, 999_999, 100);
    assert!(matches!(
        service.initiate(&no_account).await,
        Err(TransferError::AccountNotFound(999_999))
    ));

    let zero = request(creditor_id, debtor_id, 0);
    assert!(matches!(
        service.initiate(&zero).await,
        Err(TransferError::InvalidAmount)
    ));
}

#[tokio::test]
#[ignore]
async fn test_prepare_refused() {
    let pool = setup_pool().await;
    let debtor_id = 2003;
    let creditor_id = active_account(&pool, debtor_id, 1000).await;
    let service = TransferService::new(pool.clone());

    let req = request(creditor_id, debtor_id, 100);
    service.initiate(&req).await.expect("initiate");

    let applied = apply_prep_failed(
        &pool,
        creditor_id,
        debtor_id,
        req.transfer_id,
        "INSUFFICIENT_AVAILABLE_AMOUNT",
    )
    .await
    .expect("prep failed event");
    assert!(applied);

    let transfer = service
        .get(creditor_id, req.transfer_id)
        .await
        .expect("get")
        .expect("transfer exists");
    assert_eq!(transfer.phase, TransferPhase::Finalized);
    assert_eq!(transfer.outcome, TransferOutcome::Cancelled);
    assert_eq!(
        transfer.error_code.as_deref(),
        Some("INSUFFICIENT_AVAILABLE_AMOUNT")
    );

    assert_eq!(
        count_pending_signals(&pool, creditor_id).await,
        1,
        "the undelivered prepare command is withdrawn"
    );
    assert_eq!(
        ledger_sum(&pool, creditor_id, debtor_id).await,
        1000,
        "a refused transfer never touches the ledger"
    );

    // A prepared event arriving after the refusal is stale.
    let late = apply_transfer_prepared(&pool, creditor_id, debtor_id, req.transfer_id, 100)
        .await
        .expect("late prepared event");
    assert!(!late);
}

#[tokio::test]
#[ignore]
async fn test_cancelled_finalization_leaves_balance() {
    let pool = setup_pool().await;
    let debtor_id = 2004;
    let creditor_id = active_account(&pool, debtor_id, 1000).await;
    let service = TransferService::new(pool.clone());

    let req = request(creditor_id, debtor_id, 300);
    service.initiate(&req).await.expect("initiate");
    apply_transfer_prepared(&pool, creditor_id, debtor_id, req.transfer_id, 300)
        .await
        .expect("prepared event");

    // The client dismisses the prepared transfer.
    service
        .finalize_request(creditor_id, req.transfer_id, false)
        .await
        .expect("dismiss");
    apply_transfer_finalized(
        &pool,
        creditor_id,
        debtor_id,
        req.transfer_id,
        FinalizationOutcome::Cancelled,
        None,
    )
    .await
    .expect("finalized event");

    let transfer = service
        .get(creditor_id, req.transfer_id)
        .await
        .expect("get")
        .expect("transfer exists");
    assert_eq!(transfer.outcome, TransferOutcome::Cancelled);

    let account = AccountService::new(pool.clone())
        .get(creditor_id, debtor_id)
        .await
        .expect("get account")
        .expect("account exists");
    assert_eq!(account.current_balance, 1000, "cancellation releases the lock");
    assert_eq!(ledger_sum(&pool, creditor_id, debtor_id).await, 1000);
}

#[tokio::test]
#[ignore]
async fn test_phase_guards() {
    let pool = setup_pool().await;
    let debtor_id = 2005;
    let creditor_id = active_account(&pool, debtor_id, 1000).await;
    let service = TransferService::new(pool.clone());

    let req = request(creditor_id, debtor_id, 100);
    service.initiate(&req).await.expect("initiate");

    // No finalize before the funds are locked.
    let early = service.finalize_request(creditor_id, req.transfer_id, true).await;
    assert!(matches!(early, Err(TransferError::WrongPhase { .. })));

    // No deleting a live transfer.
    let delete = service.delete(creditor_id, req.transfer_id).await;
    assert!(matches!(delete, Err(TransferError::WrongPhase { .. })));

    // Events for unknown transfers are dropped, not errored.
    let ghost = Uuid::new_v4();
    assert!(
        !apply_transfer_prepared(&pool, creditor_id, debtor_id, ghost, 100)
            .await
            .expect("ghost prepared")
    );
    assert!(
        !apply_transfer_finalized(
            &pool,
            creditor_id,
            debtor_id,
            ghost,
            FinalizationOutcome::Committed,
            None
        )
        .await
        .expect("ghost finalized")
    );
}

#[tokio::test]
#[ignore]
async fn test_finalized_outruns_prepared() {
    let pool = setup_pool().await;
    let debtor_id = 2006;
    let creditor_id = active_account(&pool, debtor_id, 1000).await;
    let service = TransferService::new(pool.clone());

    let req = request(creditor_id, debtor_id, 100);
    service.initiate(&req).await.expect("initiate");

    // The committed event arrives before any prepared event. The
    // transfer still terminates, but no local debit can be posted.
    let applied = apply_transfer_finalized(
        &pool,
        creditor_id,
        debtor_id,
        req.transfer_id,
        FinalizationOutcome::Committed,
        None,
    )
    .await
    .expect("finalized event");
    assert!(applied);

    let transfer = service
        .get(creditor_id, req.transfer_id)
        .await
        .expect("get")
        .expect("transfer exists");
    assert_eq!(transfer.phase, TransferPhase::Finalized);
    assert_eq!(transfer.outcome, TransferOutcome::Committed);

    let account = AccountService::new(pool.clone())
        .get(creditor_id, debtor_id)
        .await
        .expect("get account")
        .expect("account exists");
    assert_eq!(account.current_balance, 1000, "no prepared amount, no debit");

    // The debtor's next snapshot carries the true balance; the ledger
    // re-converges through a correcting entry.
    let ts = Utc::now().trunc_subsecs(6);
    apply_account_update(&pool, creditor_id, debtor_id, ts, 2, 900)
        .await
        .expect("snapshot");
    assert_eq!(ledger_sum(&pool, creditor_id, debtor_id).await, 900);

    // A prepared event trailing in afterwards is stale.
    let late = apply_transfer_prepared(&pool, creditor_id, debtor_id, req.transfer_id, 100)
        .await
        .expect("late prepared");
    assert!(!late);
}

#[tokio::test]
#[ignore]
async fn test_delete_finalized_transfer() {
    let pool = setup_pool().await;
    let debtor_id = 2007;
    let creditor_id = active_account(&pool, debtor_id, 1000).await;
    let service = TransferService::new(pool.clone());

    let req = request(creditor_id, debtor_id, 100);
    service.initiate(&req).await.expect("initiate");
    apply_prep_failed(&pool, creditor_id, debtor_id, req.transfer_id, "TIMEOUT")
        .await
        .expect("prep failed");

    service
        .delete(creditor_id, req.transfer_id)
        .await
        .expect("delete finalized transfer");
    assert!(
        service
            .get(creditor_id, req.transfer_id)
            .await
            .expect("get")
            .is_none()
    );

    // Deleting again reports the record as gone.
    let again = service.delete(creditor_id, req.transfer_id).await;
    assert!(matches!(
        again,
        Err(TransferError::TransferNotFound(id)) if id == req.transfer_id
    ));
}
