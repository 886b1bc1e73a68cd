//! Transfer persistence helpers
//!
//! Row-level queries shared by the client-facing service and the
//! inbound event appliers. Helpers take a plain connection so they
//! compose into the caller's transaction.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use super::state::{TransferOutcome, TransferPhase};
use super::types::{Transfer, TransferRequest, row_to_transfer};

pub(crate) async fn fetch_transfer(
    conn: &mut PgConnection,
    creditor_id: i64,
    transfer_id: Uuid,
) -> Result<Option<Transfer>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT creditor_id, transfer_id, debtor_id, amount, recipient,
               phase, outcome, prepared_amount, deadline, initiated_at,
               finalized_at, error_code, latest_update_id, latest_update_ts
        FROM transfers_tb
        WHERE creditor_id = $1 AND transfer_id = $2
        "#,
    )
    .bind(creditor_id)
    .bind(transfer_id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(Some(row_to_transfer(&row)?)),
        None => Ok(None),
    }
}

/// Fetch a transfer and hold its row lock for the transaction.
pub(crate) async fn lock_transfer(
    conn: &mut PgConnection,
    creditor_id: i64,
    transfer_id: Uuid,
) -> Result<Option<Transfer>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT creditor_id, transfer_id, debtor_id, amount, recipient,
               phase, outcome, prepared_amount, deadline, initiated_at,
               finalized_at, error_code, latest_update_id, latest_update_ts
        FROM transfers_tb
        WHERE creditor_id = $1 AND transfer_id = $2
        FOR UPDATE
        "#,
    )
    .bind(creditor_id)
    .bind(transfer_id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(Some(row_to_transfer(&row)?)),
        None => Ok(None),
    }
}

pub(crate) async fn insert_transfer(
    conn: &mut PgConnection,
    req: &TransferRequest,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO transfers_tb
            (creditor_id, transfer_id, debtor_id, amount, recipient,
             phase, outcome, prepared_amount, deadline, initiated_at,
             latest_update_id, latest_update_ts)
        VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8, $9, 1, $9)
        "#,
    )
    .bind(req.creditor_id)
    .bind(req.transfer_id)
    .bind(req.debtor_id)
    .bind(req.amount)
    .bind(&req.recipient)
    .bind(TransferPhase::Initiated.id())
    .bind(TransferOutcome::Pending.id())
    .bind(req.deadline)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
