//! Inbound event appliers for the transfer FSM
//!
//! Called by the inbound dispatcher. Every applier returns `Ok(true)`
//! when the event changed state and `Ok(false)` when it was stale,
//! duplicate or unknown, so redeliveries converge without side
//! effects.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::db;
use super::error::TransferError;
use super::state::{TransferOutcome, TransferPhase};
use super::types::Transfer;
use crate::account::AccountStatus;
use crate::ledger::{LogObjectType, NewLogEntry, append_ledger_entry, append_log_entry};
use crate::messages::FinalizationOutcome;
use crate::outbox::{SignalKind, delete_transfer_signals};

/// Apply a `TransferPrepared` event: the debtor's node locked funds.
pub async fn apply_transfer_prepared(
    pool: &PgPool,
    creditor_id: i64,
    debtor_id: i64,
    transfer_id: Uuid,
    locked_amount: i64,
) -> Result<bool, TransferError> {
    if locked_amount <= 0 {
        warn!(
            creditor_id,
            transfer_id = %transfer_id,
            locked_amount,
            "Prepared event with non-positive amount; dropped"
        );
        return Ok(false);
    }

    let mut tx = pool.begin().await?;

    let Some(transfer) = db::lock_transfer(&mut tx, creditor_id, transfer_id).await? else {
        warn!(
            creditor_id,
            transfer_id = %transfer_id,
            "Prepared event for unknown transfer; dropped"
        );
        return Ok(false);
    };
    if transfer.debtor_id != debtor_id {
        warn!(
            creditor_id,
            transfer_id = %transfer_id,
            debtor_id,
            "Prepared event debtor mismatch; dropped"
        );
        return Ok(false);
    }
    if !transfer.phase.can_advance_to(TransferPhase::Prepared) {
        if transfer.phase == TransferPhase::Prepared && transfer.prepared_amount != locked_amount {
            warn!(
                creditor_id,
                transfer_id = %transfer_id,
                stored = transfer.prepared_amount,
                locked_amount,
                "Duplicate prepared event disagrees on amount; dropped"
            );
        } else {
            debug!(
                creditor_id,
                transfer_id = %transfer_id,
                phase = %transfer.phase,
                "Stale prepared event; dropped"
            );
        }
        return Ok(false);
    }

    let now = Utc::now();
    let update_id = transfer.latest_update_id + 1;
    sqlx::query(
        r#"
        UPDATE transfers_tb
        SET phase = $1, prepared_amount = $2, latest_update_id = $3, latest_update_ts = $4
        WHERE creditor_id = $5 AND transfer_id = $6
        "#,
    )
    .bind(TransferPhase::Prepared.id())
    .bind(locked_amount)
    .bind(update_id)
    .bind(now)
    .bind(creditor_id)
    .bind(transfer_id)
    .execute(&mut *tx)
    .await?;

    let mut entry = NewLogEntry::new(LogObjectType::Transfer);
    entry.debtor_id = Some(transfer.debtor_id);
    entry.transfer_id = Some(transfer_id);
    entry.object_update_id = Some(update_id);
    entry.data = Some(serde_json::json!({
        "phase": TransferPhase::Prepared.as_str(),
        "prepared_amount": locked_amount,
    }));
    append_log_entry(&mut tx, creditor_id, entry, now).await?;

    tx.commit().await?;

    info!(creditor_id, transfer_id = %transfer_id, locked_amount, "Transfer prepared");
    Ok(true)
}

/// Apply a `TransferPrepFailed` event: the prepare was refused and no
/// funds are locked. Legal before the prepared event only.
pub async fn apply_prep_failed(
    pool: &PgPool,
    creditor_id: i64,
    debtor_id: i64,
    transfer_id: Uuid,
    status_code: &str,
) -> Result<bool, TransferError> {
    let mut tx = pool.begin().await?;

    let Some(transfer) = db::lock_transfer(&mut tx, creditor_id, transfer_id).await? else {
        warn!(
            creditor_id,
            transfer_id = %transfer_id,
            "Prep-failed event for unknown transfer; dropped"
        );
        return Ok(false);
    };
    if transfer.debtor_id != debtor_id {
        warn!(
            creditor_id,
            transfer_id = %transfer_id,
            debtor_id,
            "Prep-failed event debtor mismatch; dropped"
        );
        return Ok(false);
    }
    match transfer.phase {
        TransferPhase::Initiated | TransferPhase::Sent => {}
        TransferPhase::Prepared | TransferPhase::Finalizing => {
            warn!(
                creditor_id,
                transfer_id = %transfer_id,
                phase = %transfer.phase,
                "Prep-failed event after funds were locked; dropped"
            );
            return Ok(false);
        }
        TransferPhase::Finalized => {
            debug!(
                creditor_id,
                transfer_id = %transfer_id,
                "Stale prep-failed event; dropped"
            );
            return Ok(false);
        }
    }

    let now = Utc::now();
    let update_id = transfer.latest_update_id + 1;
    sqlx::query(
        r#"
        UPDATE transfers_tb
        SET phase = $1, outcome = $2, error_code = $3, finalized_at = $4,
            latest_update_id = $5, latest_update_ts = $4
        WHERE creditor_id = $6 AND transfer_id = $7
        "#,
    )
    .bind(TransferPhase::Finalized.id())
    .bind(TransferOutcome::Cancelled.id())
    .bind(status_code)
    .bind(now)
    .bind(update_id)
    .bind(creditor_id)
    .bind(transfer_id)
    .execute(&mut *tx)
    .await?;

    // An undelivered copy of the prepare command must not go out now.
    delete_transfer_signals(&mut tx, creditor_id, transfer_id, SignalKind::PrepareTransfer)
        .await?;

    let mut entry = NewLogEntry::new(LogObjectType::Transfer);
    entry.debtor_id = Some(transfer.debtor_id);
    entry.transfer_id = Some(transfer_id);
    entry.object_update_id = Some(update_id);
    entry.data = Some(serde_json::json!({
        "phase": TransferPhase::Finalized.as_str(),
        "outcome": TransferOutcome::Cancelled.as_str(),
        "error_code": status_code,
    }));
    append_log_entry(&mut tx, creditor_id, entry, now).await?;

    tx.commit().await?;

    info!(creditor_id, transfer_id = %transfer_id, status_code, "Transfer prepare refused");
    Ok(true)
}

/// Apply a `TransferFinalized` event: the terminal word on a transfer.
///
/// A committed transfer debits the account ledger in the same
/// transaction. If the finalized event outran the prepared one, the
/// debit is skipped here and the next account snapshot posts the
/// correcting entry.
pub async fn apply_transfer_finalized(
    pool: &PgPool,
    creditor_id: i64,
    debtor_id: i64,
    transfer_id: Uuid,
    outcome: FinalizationOutcome,
    error_code: Option<&str>,
) -> Result<bool, TransferError> {
    let mut tx = pool.begin().await?;

    let Some(transfer) = db::lock_transfer(&mut tx, creditor_id, transfer_id).await? else {
        warn!(
            creditor_id,
            transfer_id = %transfer_id,
            "Finalized event for unknown transfer; dropped"
        );
        return Ok(false);
    };
    if transfer.debtor_id != debtor_id {
        warn!(
            creditor_id,
            transfer_id = %transfer_id,
            debtor_id,
            "Finalized event debtor mismatch; dropped"
        );
        return Ok(false);
    }
    if transfer.phase.is_terminal() {
        debug!(
            creditor_id,
            transfer_id = %transfer_id,
            "Duplicate finalized event; dropped"
        );
        return Ok(false);
    }

    let committed = outcome == FinalizationOutcome::Committed;
    let row_outcome = if committed {
        TransferOutcome::Committed
    } else {
        TransferOutcome::Cancelled
    };

    let now = Utc::now();
    let update_id = transfer.latest_update_id + 1;
    sqlx::query(
        r#"
        UPDATE transfers_tb
        SET phase = $1, outcome = $2, error_code = $3, finalized_at = $4,
            latest_update_id = $5, latest_update_ts = $4
        WHERE creditor_id = $6 AND transfer_id = $7
        "#,
    )
    .bind(TransferPhase::Finalized.id())
    .bind(row_outcome.id())
    .bind(error_code)
    .bind(now)
    .bind(update_id)
    .bind(creditor_id)
    .bind(transfer_id)
    .execute(&mut *tx)
    .await?;

    if committed {
        if transfer.prepared_amount > 0 {
            post_commit_debit(&mut tx, &transfer, now).await?;
        } else {
            warn!(
                creditor_id,
                transfer_id = %transfer_id,
                "Committed event before any prepared amount; debit left to the next account snapshot"
            );
        }
    }

    delete_transfer_signals(&mut tx, creditor_id, transfer_id, SignalKind::PrepareTransfer)
        .await?;
    delete_transfer_signals(&mut tx, creditor_id, transfer_id, SignalKind::FinalizeTransfer)
        .await?;

    let mut entry = NewLogEntry::new(LogObjectType::Transfer);
    entry.debtor_id = Some(transfer.debtor_id);
    entry.transfer_id = Some(transfer_id);
    entry.object_update_id = Some(update_id);
    entry.data = Some(serde_json::json!({
        "phase": TransferPhase::Finalized.as_str(),
        "outcome": row_outcome.as_str(),
        "error_code": error_code,
    }));
    append_log_entry(&mut tx, creditor_id, entry, now).await?;

    tx.commit().await?;

    info!(creditor_id, transfer_id = %transfer_id, outcome = %row_outcome, "Transfer finalized");
    Ok(true)
}

/// Debit the account for a committed transfer and surface the new
/// ledger entry in the log.
async fn post_commit_debit(
    conn: &mut sqlx::PgConnection,
    transfer: &Transfer,
    now: DateTime<Utc>,
) -> Result<(), TransferError> {
    // A purged account's ledger is closed; no writes may reopen it.
    let principal = sqlx::query_scalar::<_, i64>(
        r#"
        UPDATE accounts_tb
        SET current_balance = current_balance - $1
        WHERE creditor_id = $2 AND debtor_id = $3 AND status <> $4
        RETURNING current_balance
        "#,
    )
    .bind(transfer.prepared_amount)
    .bind(transfer.creditor_id)
    .bind(transfer.debtor_id)
    .bind(AccountStatus::Purged.id())
    .fetch_optional(&mut *conn)
    .await?;

    let Some(principal) = principal else {
        warn!(
            creditor_id = transfer.creditor_id,
            debtor_id = transfer.debtor_id,
            "Committed transfer against a missing or purged account; ledger debit skipped"
        );
        return Ok(());
    };

    let entry_id = append_ledger_entry(
        &mut *conn,
        transfer.creditor_id,
        transfer.debtor_id,
        -transfer.prepared_amount,
        principal,
        Some(transfer.transfer_id),
        now,
    )
    .await?;

    let mut entry = NewLogEntry::new(LogObjectType::AccountLedger);
    entry.debtor_id = Some(transfer.debtor_id);
    entry.data = Some(serde_json::json!({
        "entry_id": entry_id,
        "principal": principal,
    }));
    append_log_entry(&mut *conn, transfer.creditor_id, entry, now).await?;

    Ok(())
}
