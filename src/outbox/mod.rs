//! Signal outbox
//!
//! Outbound commands are never published directly. A procedure that
//! needs to tell the accounting network something inserts a
//! `pending_signals_tb` row in the SAME transaction as its entity
//! mutation; the [`flusher`] later claims due rows, publishes them, and
//! deletes them only after the broker confirmed delivery. A crash at
//! any point leaves either nothing, or an undelivered row, or a
//! delivered-but-undeleted row that gets republished; the remote side
//! dedups, so at-least-once is safe and at-most-zero-loss is guaranteed.
//!
//! Claiming uses `FOR UPDATE SKIP LOCKED` so flusher replicas never
//! fight over rows, and pushes `eligible_at` into the future with
//! jittered exponential backoff, which doubles as the retry schedule.

pub mod error;
pub mod flusher;

pub use error::OutboxError;
pub use flusher::{FlusherConfig, SignalFlusher};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use sqlx::{PgPool, Row};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::messages::OutboundMessage;

/// Kind of outbound command signal; each kind gets its own flusher
/// process and broker subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum SignalKind {
    ConfigureAccount = 0,
    PrepareTransfer = 1,
    FinalizeTransfer = 2,
}

impl SignalKind {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(SignalKind::ConfigureAccount),
            1 => Some(SignalKind::PrepareTransfer),
            2 => Some(SignalKind::FinalizeTransfer),
            _ => None,
        }
    }

    /// Subject suffix on the broker.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::ConfigureAccount => "configure_account",
            SignalKind::PrepareTransfer => "prepare_transfer",
            SignalKind::FinalizeTransfer => "finalize_transfer",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&OutboundMessage> for SignalKind {
    fn from(msg: &OutboundMessage) -> Self {
        match msg {
            OutboundMessage::ConfigureAccount { .. } => SignalKind::ConfigureAccount,
            OutboundMessage::PrepareTransfer { .. } => SignalKind::PrepareTransfer,
            OutboundMessage::FinalizeTransfer { .. } => SignalKind::FinalizeTransfer,
        }
    }
}

/// One queued outbound command.
#[derive(Debug, Clone)]
pub struct PendingSignal {
    pub signal_id: i64,
    pub creditor_id: i64,
    pub kind: SignalKind,
    pub debtor_id: i64,
    pub transfer_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub eligible_at: DateTime<Utc>,
    pub inserted_at: DateTime<Utc>,
}

// ============================================================
// QUEUE OPERATIONS
// ============================================================

/// Insert a signal row inside the caller's transaction.
///
/// This is the transactional-outbox write: it must share the
/// transaction of the entity mutation that triggered the command.
pub async fn enqueue(
    conn: &mut sqlx::PgConnection,
    creditor_id: i64,
    debtor_id: i64,
    transfer_id: Option<Uuid>,
    msg: &OutboundMessage,
) -> Result<i64, OutboxError> {
    let kind = SignalKind::from(msg);
    let payload = serde_json::to_value(msg)?;

    let signal_id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO pending_signals_tb
            (creditor_id, kind, debtor_id, transfer_id, payload)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING signal_id
        "#,
    )
    .bind(creditor_id)
    .bind(kind.id())
    .bind(debtor_id)
    .bind(transfer_id)
    .bind(payload)
    .fetch_one(&mut *conn)
    .await?;

    Ok(signal_id)
}

/// Is a configure signal already queued for this account?
///
/// The account scanner uses this to avoid piling up duplicate
/// configure commands for an unresponsive accounting node.
pub async fn has_queued_configure(
    conn: &mut sqlx::PgConnection,
    creditor_id: i64,
    debtor_id: i64,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM pending_signals_tb
            WHERE creditor_id = $1 AND debtor_id = $2 AND kind = $3
        )
        "#,
    )
    .bind(creditor_id)
    .bind(debtor_id)
    .bind(SignalKind::ConfigureAccount.id())
    .fetch_one(&mut *conn)
    .await
}

/// Drop queued signals of one kind for an account. Used when a fresher
/// command supersedes them or the account is gone.
pub async fn delete_account_signals(
    conn: &mut sqlx::PgConnection,
    creditor_id: i64,
    debtor_id: i64,
    kind: SignalKind,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM pending_signals_tb
        WHERE creditor_id = $1 AND debtor_id = $2 AND kind = $3
        "#,
    )
    .bind(creditor_id)
    .bind(debtor_id)
    .bind(kind.id())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

/// Drop queued signals of one kind for a transfer.
pub async fn delete_transfer_signals(
    conn: &mut sqlx::PgConnection,
    creditor_id: i64,
    transfer_id: Uuid,
    kind: SignalKind,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM pending_signals_tb
        WHERE creditor_id = $1 AND transfer_id = $2 AND kind = $3
        "#,
    )
    .bind(creditor_id)
    .bind(transfer_id)
    .bind(kind.id())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

/// Claim a batch of due signals of one kind.
///
/// Claimed rows get `attempts + 1` and a backed-off `eligible_at`, so a
/// flusher crash after claiming simply means a delayed retry. Rows stay
/// in the table until [`delete_delivered`] removes them.
pub async fn claim_due(
    pool: &PgPool,
    kind: SignalKind,
    batch_size: i64,
    retry_min: Duration,
) -> Result<Vec<PendingSignal>, OutboxError> {
    let mut tx = pool.begin().await?;

    let rows = sqlx::query(
        r#"
        SELECT signal_id, creditor_id, kind, debtor_id, transfer_id,
               payload, attempts, eligible_at, inserted_at
        FROM pending_signals_tb
        WHERE kind = $1 AND eligible_at <= NOW()
        ORDER BY signal_id
        LIMIT $2
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(kind.id())
    .bind(batch_size)
    .fetch_all(&mut *tx)
    .await?;

    let mut signals = Vec::with_capacity(rows.len());
    for row in &rows {
        signals.push(row_to_signal(row)?);
    }

    let now = Utc::now();
    for signal in &signals {
        let delay = backoff_delay(signal.attempts, retry_min);
        let next_eligible = now
            + ChronoDuration::from_std(delay).unwrap_or(ChronoDuration::seconds(i32::MAX as i64));

        sqlx::query(
            r#"
            UPDATE pending_signals_tb
            SET attempts = attempts + 1, eligible_at = $2
            WHERE signal_id = $1
            "#,
        )
        .bind(signal.signal_id)
        .bind(next_eligible)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(signals)
}

/// Remove rows whose messages the broker confirmed.
pub async fn delete_delivered(pool: &PgPool, signal_ids: &[i64]) -> Result<u64, sqlx::Error> {
    if signal_ids.is_empty() {
        return Ok(0);
    }

    let result = sqlx::query("DELETE FROM pending_signals_tb WHERE signal_id = ANY($1)")
        .bind(signal_ids)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// Retry delay for a signal on its n-th attempt: base delay doubled per
/// attempt (capped at 2^5) with a ±25% jitter so retries spread out.
pub(crate) fn backoff_delay(attempts: i32, retry_min: Duration) -> Duration {
    let doublings = attempts.clamp(0, 5) as u32;
    let base = retry_min.as_secs_f64() * f64::from(1u32 << doublings);
    let jitter = rand::thread_rng().gen_range(0.75..1.25);
    Duration::from_secs_f64(base * jitter)
}

fn row_to_signal(row: &sqlx::postgres::PgRow) -> Result<PendingSignal, OutboxError> {
    let signal_id: i64 = row.try_get("signal_id").map_err(OutboxError::Database)?;
    let kind_id: i16 = row.try_get("kind").map_err(OutboxError::Database)?;
    let kind = SignalKind::from_id(kind_id).ok_or_else(|| OutboxError::CorruptRow {
        signal_id,
        reason: format!("invalid signal kind id: {}", kind_id),
    })?;

    Ok(PendingSignal {
        signal_id,
        creditor_id: row.try_get("creditor_id").map_err(OutboxError::Database)?,
        kind,
        debtor_id: row.try_get("debtor_id").map_err(OutboxError::Database)?,
        transfer_id: row.try_get("transfer_id").map_err(OutboxError::Database)?,
        payload: row.try_get("payload").map_err(OutboxError::Database)?,
        attempts: row.try_get("attempts").map_err(OutboxError::Database)?,
        eligible_at: row.try_get("eligible_at").map_err(OutboxError::Database)?,
        inserted_at: row.try_get("inserted_at").map_err(OutboxError::Database)?,
    })
}
