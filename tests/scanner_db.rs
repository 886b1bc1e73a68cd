//! Reconciliation sweeps and outbox claiming against a real
//! PostgreSQL store.
//!
//! Each test backdates only the rows it stages, so concurrently
//! running tests never fall inside another test's sweep window.
//!
//! Run with: cargo test -- --ignored

mod common;

use chrono::{Duration, SubsecRound, Utc};
use sqlx::PgPool;
use std::time::Duration as StdDuration;
use uuid::Uuid;

use creditors_agent::account::{AccountService, AccountStatus, apply_account_purged, apply_account_update};
use creditors_agent::config::ScannerConfig;
use creditors_agent::creditor::CreditorService;
use creditors_agent::ledger::{LogObjectType, ledger_entries_page};
use creditors_agent::outbox::{SignalKind, claim_due};
use creditors_agent::scanner::{AccountScanner, CreditorScanner, RetentionScanner, TransferScanner};
use creditors_agent::transfer::{
    TransferOutcome, TransferPhase, TransferRequest, TransferService, apply_prep_failed,
    apply_transfer_prepared,
};

use common::{
    activated_creditor, count_ledger_entries, count_pending_signals, ledger_sum, setup_pool,
    unique_creditor_id,
};

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

fn overdue_request(creditor_id: i64, debtor_id: i64) -> TransferRequest {
    TransferRequest {
        creditor_id,
        transfer_id: Uuid::new_v4(),
        debtor_id,
        amount: 100,
        recipient: "acct-recipient-1".to_string(),
        deadline: Utc::now() - Duration::hours(1),
    }
}

#[tokio::test]
#[ignore] // Requires PostgreSQL running
async fn test_claimed_signals_back_off() {
    let pool = setup_pool().await;
    let creditor_id = activated_creditor(&pool).await;
    AccountService::new(pool.clone())
        .create(creditor_id, 3001)
        .await
        .expect("create account");

    let mine = |signals: &[creditors_agent::outbox::PendingSignal]| {
        signals.iter().any(|s| s.creditor_id == creditor_id)
    };

    let claimed = claim_due(
        &pool,
        SignalKind::ConfigureAccount,
        10_000,
        StdDuration::from_secs(60),
    )
    .await
    .expect("claim");
    assert!(mine(&claimed), "a freshly enqueued signal is due at once");

    // Claiming pushed eligible_at into the future; an immediate second
    // pass must skip the row.
    let reclaimed = claim_due(
        &pool,
        SignalKind::ConfigureAccount,
        10_000,
        StdDuration::from_secs(60),
    )
    .await
    .expect("second claim");
    assert!(!mine(&reclaimed), "claimed signals are invisible until the backoff expires");
}

#[tokio::test]
#[ignore]
async fn test_overdue_unsent_transfer_times_out() {
    let pool = setup_pool().await;
    let debtor_id = 3002;
    let creditor_id = active_account(&pool, debtor_id, 1000).await;
    let transfers = TransferService::new(pool.clone());

    let req = overdue_request(creditor_id, debtor_id);
    transfers.initiate(&req).await.expect("initiate");

    let scanner = TransferScanner::new(pool.clone(), ScannerConfig::default());
    scanner.scan_once().await.expect("scan");

    let transfer = transfers
        .get(creditor_id, req.transfer_id)
        .await
        .expect("get")
        .expect("transfer exists");
    assert_eq!(transfer.phase, TransferPhase::Finalized);
    assert_eq!(transfer.outcome, TransferOutcome::Cancelled);
    assert_eq!(transfer.error_code.as_deref(), Some("TIMEOUT"));
    assert!(transfer.finalized_at.is_some());
    assert_eq!(
        count_pending_signals(&pool, creditor_id).await,
        1,
        "the queued prepare command is withdrawn with the timeout"
    );
    assert_eq!(ledger_sum(&pool, creditor_id, debtor_id).await, 1000);
}

#[tokio::test]
#[ignore]
async fn test_stuck_prepared_transfer_gets_cancel_request() {
    let pool = setup_pool().await;
    let debtor_id = 3003;
    let creditor_id = active_account(&pool, debtor_id, 1000).await;
    let transfers = TransferService::new(pool.clone());

    let req = overdue_request(creditor_id, debtor_id);
    transfers.initiate(&req).await.expect("initiate");
    apply_transfer_prepared(&pool, creditor_id, debtor_id, req.transfer_id, 100)
        .await
        .expect("prepared event");

    let scanner = TransferScanner::new(pool.clone(), ScannerConfig::default());
    scanner.scan_once().await.expect("scan");

    // Funds are locked remotely, so the sweep cannot cancel locally;
    // it asks the debtor's node to dismiss the transfer.
    let transfer = transfers
        .get(creditor_id, req.transfer_id)
        .await
        .expect("get")
        .expect("transfer exists");
    assert_eq!(transfer.phase, TransferPhase::Finalizing);
    assert_eq!(transfer.outcome, TransferOutcome::Pending);
    assert_eq!(
        count_pending_signals(&pool, creditor_id).await,
        3,
        "a finalize command with zero committed amount is queued"
    );

    // A second sweep does not queue another one.
    scanner.scan_once().await.expect("second scan");
    assert_eq!(count_pending_signals(&pool, creditor_id).await, 3);
}

#[tokio::test]
#[ignore]
async fn test_finalized_transfers_pruned_after_retention() {
    let pool = setup_pool().await;
    let debtor_id = 3004;
    let creditor_id = active_account(&pool, debtor_id, 1000).await;
    let transfers = TransferService::new(pool.clone());

    let req = TransferRequest {
        deadline: Utc::now() + Duration::hours(1),
        ..overdue_request(creditor_id, debtor_id)
    };
    transfers.initiate(&req).await.expect("initiate");
    apply_prep_failed(&pool, creditor_id, debtor_id, req.transfer_id, "NO_RECIPIENT")
        .await
        .expect("prep failed");

    sqlx::query(
        "UPDATE transfers_tb SET finalized_at = NOW() - INTERVAL '30 days'
         WHERE creditor_id = $1 AND transfer_id = $2",
    )
    .bind(creditor_id)
    .bind(req.transfer_id)
    .execute(&pool)
    .await
    .expect("backdate finalized_at");

    TransferScanner::new(pool.clone(), ScannerConfig::default())
        .scan_once()
        .await
        .expect("scan");

    assert!(
        transfers
            .get(creditor_id, req.transfer_id)
            .await
            .expect("get")
            .is_none(),
        "old finalized transfers are removed"
    );

    // Clients following the log learn about the removal.
    let (entries, _) = CreditorService::new(pool.clone())
        .log_entries(creditor_id, 0, 100)
        .await
        .expect("log page");
    let last = entries.last().expect("log has entries");
    assert_eq!(last.object_type, LogObjectType::Transfer);
    assert!(last.is_deleted);
}

#[tokio::test]
#[ignore]
async fn test_pending_config_resent_with_same_token() {
    let pool = setup_pool().await;
    let creditor_id = activated_creditor(&pool).await;
    let accounts = AccountService::new(pool.clone());
    let debtor_id = 3005;

    accounts.create(creditor_id, debtor_id).await.expect("create");

    // Pretend the first configure command was delivered two hours ago
    // and nothing came back.
    sqlx::query("DELETE FROM pending_signals_tb WHERE creditor_id = $1")
        .bind(creditor_id)
        .execute(&pool)
        .await
        .expect("drain signals");
    sqlx::query(
        "UPDATE accounts_tb SET last_config_ts = last_config_ts - INTERVAL '2 hours'
         WHERE creditor_id = $1 AND debtor_id = $2",
    )
    .bind(creditor_id)
    .bind(debtor_id)
    .execute(&pool)
    .await
    .expect("backdate config token");

    let before = accounts
        .get(creditor_id, debtor_id)
        .await
        .expect("get")
        .expect("account exists");

    let config = ScannerConfig {
        pending_retry_hours: 1,
        pending_fail_days: 9999,
        ..ScannerConfig::default()
    };
    AccountScanner::new(pool.clone(), config)
        .scan_once()
        .await
        .expect("scan");

    let payload = sqlx::query_scalar::<_, serde_json::Value>(
        "SELECT payload FROM pending_signals_tb WHERE creditor_id = $1",
    )
    .bind(creditor_id)
    .fetch_one(&pool)
    .await
    .expect("resent signal present");
    assert_eq!(payload["seqnum"], serde_json::json!(0), "the stored token is resent unchanged");

    let after = accounts
        .get(creditor_id, debtor_id)
        .await
        .expect("get")
        .expect("account exists");
    assert_eq!(
        after.last_config_ts, before.last_config_ts,
        "resending must not restart the failure window"
    );
    assert_eq!(after.config_seqnum, before.config_seqnum);

    // With a command back in the queue the next sweep stays quiet.
    let config = ScannerConfig {
        pending_retry_hours: 1,
        pending_fail_days: 9999,
        ..ScannerConfig::default()
    };
    AccountScanner::new(pool.clone(), config)
        .scan_once()
        .await
        .expect("second scan");
    assert_eq!(count_pending_signals(&pool, creditor_id).await, 1);
}

#[tokio::test]
#[ignore]
async fn test_pending_config_fails_after_window() {
    let pool = setup_pool().await;
    let creditor_id = activated_creditor(&pool).await;
    let accounts = AccountService::new(pool.clone());
    let debtor_id = 3006;

    accounts.create(creditor_id, debtor_id).await.expect("create");
    sqlx::query(
        "UPDATE accounts_tb SET last_config_ts = last_config_ts - INTERVAL '2 days'
         WHERE creditor_id = $1 AND debtor_id = $2",
    )
    .bind(creditor_id)
    .bind(debtor_id)
    .execute(&pool)
    .await
    .expect("backdate config token");

    let config = ScannerConfig {
        pending_retry_hours: 9999,
        pending_fail_days: 1,
        ..ScannerConfig::default()
    };
    let scanner = AccountScanner::new(pool.clone(), config);
    scanner.scan_once().await.expect("scan");

    let account = accounts
        .get(creditor_id, debtor_id)
        .await
        .expect("get")
        .expect("account exists");
    assert_eq!(account.status, AccountStatus::Pending, "the account is not purged, only marked");
    assert_eq!(
        account.config_error.as_deref(),
        Some("CONFIGURATION_IS_NOT_EFFECTUAL")
    );
    assert_eq!(account.latest_update_id, 2);

    let (entries, _) = CreditorService::new(pool.clone())
        .log_entries(creditor_id, 0, 100)
        .await
        .expect("log page");
    let last = entries.last().expect("log has entries");
    assert_eq!(last.object_type, LogObjectType::AccountInfo);

    // Already failed accounts are left alone.
    scanner.scan_once().await.expect("second scan");
    let account = accounts
        .get(creditor_id, debtor_id)
        .await
        .expect("get")
        .expect("account exists");
    assert_eq!(account.latest_update_id, 2);
}

#[tokio::test]
#[ignore]
async fn test_retention_respects_read_cursors() {
    let pool = setup_pool().await;
    let debtor_id = 3007;
    let creditor_id = active_account(&pool, debtor_id, 500).await;

    sqlx::query("UPDATE ledger_entries_tb SET added_at = NOW() - INTERVAL '400 days' WHERE creditor_id = $1")
        .bind(creditor_id)
        .execute(&pool)
        .await
        .expect("backdate ledger entries");
    sqlx::query("UPDATE log_entries_tb SET added_at = NOW() - INTERVAL '400 days' WHERE creditor_id = $1")
        .bind(creditor_id)
        .execute(&pool)
        .await
        .expect("backdate log entries");

    let scanner = RetentionScanner::new(pool.clone(), ScannerConfig::default());
    scanner.scan_once().await.expect("scan");

    // Nothing was read yet, so nothing may be pruned however old it is.
    assert_eq!(count_ledger_entries(&pool, creditor_id, debtor_id).await, 1);
    let log_count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM log_entries_tb WHERE creditor_id = $1",
    )
    .bind(creditor_id)
    .fetch_one(&pool)
    .await
    .expect("count log entries");
    assert!(log_count > 0, "unread log entries survive retention");

    // Reading the pages moves the cursors past every entry.
    ledger_entries_page(&pool, creditor_id, debtor_id, i64::MAX, 100)
        .await
        .expect("ledger page");
    CreditorService::new(pool.clone())
        .log_entries(creditor_id, 0, 100)
        .await
        .expect("log page");

    scanner.scan_once().await.expect("second scan");
    assert_eq!(count_ledger_entries(&pool, creditor_id, debtor_id).await, 0);
    let log_count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM log_entries_tb WHERE creditor_id = $1",
    )
    .bind(creditor_id)
    .fetch_one(&pool)
    .await
    .expect("count log entries");
    assert_eq!(log_count, 0, "read and expired log entries are pruned");

    // The owning rows are untouched.
    assert!(
        AccountService::new(pool.clone())
            .get(creditor_id, debtor_id)
            .await
            .expect("get account")
            .is_some()
    );
}

#[tokio::test]
#[ignore]
async fn test_purged_account_row_removed_after_retention() {
    let pool = setup_pool().await;
    let debtor_id = 3008;
    let creditor_id = active_account(&pool, debtor_id, 500).await;

    apply_account_purged(&pool, creditor_id, debtor_id)
        .await
        .expect("purge");
    sqlx::query(
        "UPDATE accounts_tb SET latest_update_ts = NOW() - INTERVAL '30 days'
         WHERE creditor_id = $1 AND debtor_id = $2",
    )
    .bind(creditor_id)
    .bind(debtor_id)
    .execute(&pool)
    .await
    .expect("backdate purged row");

    RetentionScanner::new(pool.clone(), ScannerConfig::default())
        .scan_once()
        .await
        .expect("scan");

    assert!(
        AccountService::new(pool.clone())
            .get(creditor_id, debtor_id)
            .await
            .expect("get account")
            .is_none(),
        "the tombstone row goes away after its retention window"
    );
    // With the tombstone gone the pair can be used from scratch.
    let recreated = AccountService::new(pool.clone())
        .create(creditor_id, debtor_id)
        .await
        .expect("recreate");
    assert_eq!(recreated.status, AccountStatus::Pending);
    assert_eq!(recreated.config_seqnum, 0);
}

#[tokio::test]
#[ignore]
async fn test_creditor_sweep_removes_dead_ids() {
    let pool = setup_pool().await;
    let creditors = CreditorService::new(pool.clone());

    // Registered but never activated.
    let abandoned_id = unique_creditor_id();
    creditors.register(abandoned_id).await.expect("register");
    sqlx::query("UPDATE creditors_tb SET created_at = NOW() - INTERVAL '30 days' WHERE creditor_id = $1")
        .bind(abandoned_id)
        .execute(&pool)
        .await
        .expect("backdate created_at");

    // Deactivated long ago.
    let retired_id = activated_creditor(&pool).await;
    creditors.deactivate(retired_id).await.expect("deactivate");
    sqlx::query(
        "UPDATE creditors_tb SET deactivated_at = (NOW() - INTERVAL '30 days')::date
         WHERE creditor_id = $1",
    )
    .bind(retired_id)
    .execute(&pool)
    .await
    .expect("backdate deactivated_at");

    // Old but alive.
    let living_id = activated_creditor(&pool).await;
    sqlx::query("UPDATE creditors_tb SET created_at = NOW() - INTERVAL '30 days' WHERE creditor_id = $1")
        .bind(living_id)
        .execute(&pool)
        .await
        .expect("backdate created_at");

    CreditorScanner::new(pool.clone(), ScannerConfig::default())
        .scan_once()
        .await
        .expect("scan");

    assert!(creditors.get(abandoned_id).await.expect("get").is_none());
    assert!(creditors.get(retired_id).await.expect("get").is_none());
    assert!(
        creditors.get(living_id).await.expect("get").is_some(),
        "an activated creditor is never swept by age"
    );
}
