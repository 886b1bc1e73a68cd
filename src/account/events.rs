//! Inbound event appliers for accounts
//!
//! Snapshot ordering relies on the `(ts, seqnum)` token carried by
//! every `AccountUpdate`; `seqnum` uses serial-number arithmetic, so
//! the token survives an i32 wraparound. Appliers return `Ok(true)`
//! when the event changed state and `Ok(false)` when it was stale,
//! duplicate or unknown.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, info, warn};

use super::db;
use super::error::AccountError;
use super::types::AccountStatus;
use crate::core_types::Seqnum;
use crate::ledger::{LogObjectType, NewLogEntry, append_ledger_entry, append_log_entry};
use crate::outbox::{SignalKind, delete_account_signals};

/// True when the event token `(ts, seqnum)` supersedes the stored one.
fn token_is_newer(
    ts: DateTime<Utc>,
    seqnum: i32,
    stored_ts: DateTime<Utc>,
    stored_seqnum: i32,
) -> bool {
    ts > stored_ts || (ts == stored_ts && Seqnum(seqnum).is_newer_than(Seqnum(stored_seqnum)))
}

/// Apply an `AccountUpdate` snapshot.
///
/// The first snapshot activates a PENDING account. When the reported
/// balance disagrees with the running ledger principal, a correcting
/// entry re-converges the ledger in the same transaction.
pub async fn apply_account_update(
    pool: &PgPool,
    creditor_id: i64,
    debtor_id: i64,
    ts: DateTime<Utc>,
    seqnum: i32,
    balance: i64,
) -> Result<bool, AccountError> {
    let mut tx = pool.begin().await?;

    let Some(account) = db::lock_account(&mut tx, creditor_id, debtor_id).await? else {
        warn!(
            creditor_id,
            debtor_id, "Account snapshot for unknown account; dropped"
        );
        return Ok(false);
    };
    if account.status == AccountStatus::Purged {
        debug!(
            creditor_id,
            debtor_id, "Account snapshot for purged account; dropped"
        );
        return Ok(false);
    }
    if !token_is_newer(ts, seqnum, account.last_change_ts, account.last_change_seqnum) {
        debug!(creditor_id, debtor_id, seqnum, "Stale account snapshot; dropped");
        return Ok(false);
    }

    let now = Utc::now();
    let activating = account.status == AccountStatus::Pending;
    let status = if activating {
        AccountStatus::Active
    } else {
        account.status
    };
    let update_id = if activating {
        account.latest_update_id + 1
    } else {
        account.latest_update_id
    };

    sqlx::query(
        r#"
        UPDATE accounts_tb
        SET status = $1, current_balance = $2, last_change_ts = $3,
            last_change_seqnum = $4, latest_update_id = $5, latest_update_ts = $6
        WHERE creditor_id = $7 AND debtor_id = $8
        "#,
    )
    .bind(status.id())
    .bind(balance)
    .bind(ts)
    .bind(seqnum)
    .bind(update_id)
    .bind(if activating {
        now
    } else {
        account.latest_update_ts
    })
    .bind(creditor_id)
    .bind(debtor_id)
    .execute(&mut *tx)
    .await?;

    let delta = balance - account.current_balance;
    if delta != 0 {
        let entry_id =
            append_ledger_entry(&mut tx, creditor_id, debtor_id, delta, balance, None, now).await?;
        let mut entry = NewLogEntry::new(LogObjectType::AccountLedger);
        entry.debtor_id = Some(debtor_id);
        entry.data = Some(serde_json::json!({
            "entry_id": entry_id,
            "principal": balance,
        }));
        append_log_entry(&mut tx, creditor_id, entry, now).await?;
    }

    if activating {
        let mut entry = NewLogEntry::new(LogObjectType::Account);
        entry.debtor_id = Some(debtor_id);
        entry.object_update_id = Some(update_id);
        entry.data = Some(serde_json::json!({
            "debtor_id": debtor_id,
            "status": AccountStatus::Active.as_str(),
        }));
        append_log_entry(&mut tx, creditor_id, entry, now).await?;
    }

    tx.commit().await?;

    if activating {
        info!(creditor_id, debtor_id, balance, "Account activated");
    } else {
        debug!(creditor_id, debtor_id, balance, delta, "Account snapshot applied");
    }
    Ok(true)
}

/// Apply an `AccountConfigFailed` event.
///
/// Only a rejection echoing the newest configure token counts; stale
/// rejections refer to attempts the client has since replaced.
pub async fn apply_config_rejected(
    pool: &PgPool,
    creditor_id: i64,
    debtor_id: i64,
    config_ts: DateTime<Utc>,
    config_seqnum: i32,
    rejection_code: &str,
) -> Result<bool, AccountError> {
    let mut tx = pool.begin().await?;

    let Some(account) = db::lock_account(&mut tx, creditor_id, debtor_id).await? else {
        warn!(
            creditor_id,
            debtor_id, "Config rejection for unknown account; dropped"
        );
        return Ok(false);
    };
    if account.status == AccountStatus::Purged {
        debug!(
            creditor_id,
            debtor_id, "Config rejection for purged account; dropped"
        );
        return Ok(false);
    }
    if config_ts != account.last_config_ts || config_seqnum != account.config_seqnum {
        debug!(
            creditor_id,
            debtor_id, config_seqnum, "Stale config rejection; dropped"
        );
        return Ok(false);
    }
    if account.config_error.as_deref() == Some(rejection_code) {
        return Ok(false);
    }

    let now = Utc::now();
    let update_id = account.latest_update_id + 1;
    sqlx::query(
        r#"
        UPDATE accounts_tb
        SET config_error = $1, latest_update_id = $2, latest_update_ts = $3
        WHERE creditor_id = $4 AND debtor_id = $5
        "#,
    )
    .bind(rejection_code)
    .bind(update_id)
    .bind(now)
    .bind(creditor_id)
    .bind(debtor_id)
    .execute(&mut *tx)
    .await?;

    let mut entry = NewLogEntry::new(LogObjectType::AccountInfo);
    entry.debtor_id = Some(debtor_id);
    entry.object_update_id = Some(update_id);
    entry.data = Some(serde_json::json!({
        "config_error": rejection_code,
    }));
    append_log_entry(&mut tx, creditor_id, entry, now).await?;

    tx.commit().await?;

    info!(creditor_id, debtor_id, rejection_code, "Account config rejected");
    Ok(true)
}

/// Apply an `AccountPurged` event: the debtor's node deleted the
/// account. The local row stays for the retention scanner; writes
/// are rejected from here on.
pub async fn apply_account_purged(
    pool: &PgPool,
    creditor_id: i64,
    debtor_id: i64,
) -> Result<bool, AccountError> {
    let mut tx = pool.begin().await?;

    let Some(account) = db::lock_account(&mut tx, creditor_id, debtor_id).await? else {
        debug!(creditor_id, debtor_id, "Purge event for unknown account; dropped");
        return Ok(false);
    };
    if account.status == AccountStatus::Purged {
        debug!(creditor_id, debtor_id, "Duplicate purge event; dropped");
        return Ok(false);
    }

    let now = Utc::now();

    // Close the ledger before sealing the row.
    if account.current_balance != 0 {
        let entry_id = append_ledger_entry(
            &mut tx,
            creditor_id,
            debtor_id,
            -account.current_balance,
            0,
            None,
            now,
        )
        .await?;
        let mut entry = NewLogEntry::new(LogObjectType::AccountLedger);
        entry.debtor_id = Some(debtor_id);
        entry.data = Some(serde_json::json!({
            "entry_id": entry_id,
            "principal": 0,
        }));
        append_log_entry(&mut tx, creditor_id, entry, now).await?;
    }

    let update_id = account.latest_update_id + 1;
    sqlx::query(
        r#"
        UPDATE accounts_tb
        SET status = $1, current_balance = 0, latest_update_id = $2, latest_update_ts = $3
        WHERE creditor_id = $4 AND debtor_id = $5
        "#,
    )
    .bind(AccountStatus::Purged.id())
    .bind(update_id)
    .bind(now)
    .bind(creditor_id)
    .bind(debtor_id)
    .execute(&mut *tx)
    .await?;

    // Queued configure commands reference the dead incarnation.
    delete_account_signals(&mut tx, creditor_id, debtor_id, SignalKind::ConfigureAccount).await?;

    let mut entry = NewLogEntry::new(LogObjectType::Account);
    entry.debtor_id = Some(debtor_id);
    entry.object_update_id = Some(update_id);
    entry.is_deleted = true;
    append_log_entry(&mut tx, creditor_id, entry, now).await?;

    tx.commit().await?;

    info!(creditor_id, debtor_id, "Account purged");
    Ok(true)
}
