//! Transfer record types and row mapping

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use super::state::{TransferOutcome, TransferPhase};

/// A client request to start a direct transfer.
///
/// `transfer_id` is chosen by the client and doubles as the
/// idempotency key: re-submitting the same request returns the
/// existing record instead of creating a second transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub creditor_id: i64,
    pub transfer_id: Uuid,
    pub debtor_id: i64,
    pub amount: i64,
    /// Recipient account identifier on the debtor's node.
    pub recipient: String,
    /// Past this instant the transfer is cancelled wherever it stands.
    pub deadline: DateTime<Utc>,
}

/// A transfer row as stored in `transfers_tb`.
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub creditor_id: i64,
    pub transfer_id: Uuid,
    pub debtor_id: i64,
    pub amount: i64,
    pub recipient: String,
    pub phase: TransferPhase,
    pub outcome: TransferOutcome,
    /// Amount locked by the debtor's node; zero until PREPARED.
    pub prepared_amount: i64,
    pub deadline: DateTime<Utc>,
    pub initiated_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub error_code: Option<String>,
    pub latest_update_id: i64,
    pub latest_update_ts: DateTime<Utc>,
}

impl Transfer {
    /// True when the stored attributes match a (repeated) request.
    pub fn matches_request(&self, req: &TransferRequest) -> bool {
        self.debtor_id == req.debtor_id
            && self.amount == req.amount
            && self.recipient == req.recipient
            && self.deadline == req.deadline
    }
}

pub(crate) fn row_to_transfer(row: &sqlx::postgres::PgRow) -> Result<Transfer, sqlx::Error> {
    let phase_id: i16 = row.try_get("phase")?;
    let phase = TransferPhase::from_id(phase_id).ok_or_else(|| sqlx::Error::ColumnDecode {
        index: "phase".into(),
        source: format!("invalid transfer phase id: {}", phase_id).into(),
    })?;

    let outcome_id: i16 = row.try_get("outcome")?;
    let outcome = TransferOutcome::from_id(outcome_id).ok_or_else(|| sqlx::Error::ColumnDecode {
        index: "outcome".into(),
        source: format!("invalid transfer outcome id: {}", outcome_id).into(),
    })?;

    Ok(Transfer {
        creditor_id: row.try_get("creditor_id")?,
        transfer_id: row.try_get("transfer_id")?,
        debtor_id: row.try_get("debtor_id")?,
        amount: row.try_get("amount")?,
        recipient: row.try_get("recipient")?,
        phase,
        outcome,
        prepared_amount: row.try_get("prepared_amount")?,
        deadline: row.try_get("deadline")?,
        initiated_at: row.try_get("initiated_at")?,
        finalized_at: row.try_get("finalized_at")?,
        error_code: row.try_get("error_code")?,
        latest_update_id: row.try_get("latest_update_id")?,
        latest_update_ts: row.try_get("latest_update_ts")?,
    })
}
