//! Ledger & log materialization
//!
//! Two append-only journals back every account and creditor:
//!
//! - `ledger_entries_tb`: per-account money movements with a running
//!   balance (`principal`), numbered by a gap-free `entry_id`.
//! - `log_entries_tb`: per-creditor record of externally visible state
//!   changes, numbered by a gap-free per-creditor `entry_id`; polling
//!   clients page it forward by cursor.
//!
//! Sequence numbers come from `UPDATE .. RETURNING` on the owning row,
//! inside the caller's transaction, so ids stay gap-free and strictly
//! increasing even under concurrent writers. The running balance is
//! carried forward in O(1): `principal = previous balance + acquired`.
//!
//! Pagination reads advance a per-owner "read cursor"; the retention
//! scanner prunes only entries at or below that cursor.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::fmt;
use uuid::Uuid;

// ============================================================
// ROW TYPES
// ============================================================

/// One money movement on one account.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub creditor_id: i64,
    pub debtor_id: i64,
    pub entry_id: i64,
    /// Signed amount this entry adds to the balance; never zero.
    pub acquired_amount: i64,
    /// Balance after this entry.
    pub principal: i64,
    /// Set when the movement settles a known outgoing transfer.
    pub transfer_id: Option<Uuid>,
    pub added_at: DateTime<Utc>,
}

/// Object a log entry refers to.
///
/// IDs are stored as SMALLINT; the string form matches the object-type
/// names a resource layer exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum LogObjectType {
    Creditor = 0,
    Account = 10,
    AccountConfig = 20,
    AccountInfo = 30,
    AccountLedger = 40,
    Transfer = 50,
}

impl LogObjectType {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(LogObjectType::Creditor),
            10 => Some(LogObjectType::Account),
            20 => Some(LogObjectType::AccountConfig),
            30 => Some(LogObjectType::AccountInfo),
            40 => Some(LogObjectType::AccountLedger),
            50 => Some(LogObjectType::Transfer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogObjectType::Creditor => "creditor",
            LogObjectType::Account => "account",
            LogObjectType::AccountConfig => "account-config",
            LogObjectType::AccountInfo => "account-info",
            LogObjectType::AccountLedger => "account-ledger",
            LogObjectType::Transfer => "transfer",
        }
    }
}

impl fmt::Display for LogObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One externally visible state change.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub creditor_id: i64,
    pub entry_id: i64,
    pub object_type: LogObjectType,
    pub debtor_id: Option<i64>,
    pub transfer_id: Option<Uuid>,
    pub object_update_id: Option<i64>,
    pub is_deleted: bool,
    pub data: Option<serde_json::Value>,
    pub added_at: DateTime<Utc>,
}

/// Log entry to append; the entry id is assigned on write.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub object_type: LogObjectType,
    pub debtor_id: Option<i64>,
    pub transfer_id: Option<Uuid>,
    pub object_update_id: Option<i64>,
    pub is_deleted: bool,
    pub data: Option<serde_json::Value>,
}

impl NewLogEntry {
    pub fn new(object_type: LogObjectType) -> Self {
        Self {
            object_type,
            debtor_id: None,
            transfer_id: None,
            object_update_id: None,
            is_deleted: false,
            data: None,
        }
    }
}

// ============================================================
// APPEND (inside the caller's transaction)
// ============================================================

/// Append one ledger entry for `(creditor_id, debtor_id)`.
///
/// Assigns the next `entry_id` by bumping the account's cursor, which
/// also takes the account row lock. Does NOT touch `current_balance`;
/// the caller updates the account row in the same transaction.
pub async fn append_ledger_entry(
    conn: &mut sqlx::PgConnection,
    creditor_id: i64,
    debtor_id: i64,
    acquired_amount: i64,
    principal: i64,
    transfer_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<i64, sqlx::Error> {
    debug_assert!(acquired_amount != 0);

    let entry_id = sqlx::query_scalar::<_, i64>(
        r#"
        UPDATE accounts_tb
        SET last_entry_id = last_entry_id + 1
        WHERE creditor_id = $1 AND debtor_id = $2
        RETURNING last_entry_id
        "#,
    )
    .bind(creditor_id)
    .bind(debtor_id)
    .fetch_one(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO ledger_entries_tb
            (creditor_id, debtor_id, entry_id, acquired_amount, principal, transfer_id, added_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(creditor_id)
    .bind(debtor_id)
    .bind(entry_id)
    .bind(acquired_amount)
    .bind(principal)
    .bind(transfer_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(entry_id)
}

/// Append one log entry for `creditor_id`.
///
/// Assigns the next per-creditor `entry_id` by bumping the creditor's
/// cursor under its row lock.
pub async fn append_log_entry(
    conn: &mut sqlx::PgConnection,
    creditor_id: i64,
    entry: NewLogEntry,
    now: DateTime<Utc>,
) -> Result<i64, sqlx::Error> {
    let entry_id = sqlx::query_scalar::<_, i64>(
        r#"
        UPDATE creditors_tb
        SET last_log_entry_id = last_log_entry_id + 1
        WHERE creditor_id = $1
        RETURNING last_log_entry_id
        "#,
    )
    .bind(creditor_id)
    .fetch_one(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO log_entries_tb
            (creditor_id, entry_id, object_type, debtor_id, transfer_id,
             object_update_id, is_deleted, data, added_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(creditor_id)
    .bind(entry_id)
    .bind(entry.object_type.id())
    .bind(entry.debtor_id)
    .bind(entry.transfer_id)
    .bind(entry.object_update_id)
    .bind(entry.is_deleted)
    .bind(entry.data)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(entry_id)
}

// ============================================================
// PAGINATION (resource-layer reads)
// ============================================================

/// Ledger page, newest first, entries strictly below `before_id`.
///
/// Advances the account's `ledger_read_cursor` to the highest entry id
/// ever served; retention never prunes above it.
pub async fn ledger_entries_page(
    pool: &PgPool,
    creditor_id: i64,
    debtor_id: i64,
    before_id: i64,
    count: i64,
) -> Result<Vec<LedgerEntry>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT creditor_id, debtor_id, entry_id, acquired_amount, principal,
               transfer_id, added_at
        FROM ledger_entries_tb
        WHERE creditor_id = $1 AND debtor_id = $2 AND entry_id < $3
        ORDER BY entry_id DESC
        LIMIT $4
        "#,
    )
    .bind(creditor_id)
    .bind(debtor_id)
    .bind(before_id)
    .bind(count)
    .fetch_all(pool)
    .await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in &rows {
        entries.push(row_to_ledger_entry(row)?);
    }

    if let Some(first) = entries.first() {
        sqlx::query(
            r#"
            UPDATE accounts_tb
            SET ledger_read_cursor = GREATEST(ledger_read_cursor, $3)
            WHERE creditor_id = $1 AND debtor_id = $2
            "#,
        )
        .bind(creditor_id)
        .bind(debtor_id)
        .bind(first.entry_id)
        .execute(pool)
        .await?;
    }

    Ok(entries)
}

/// Log page, oldest first, entries strictly above `after_id`, plus the
/// creditor's current highest log entry id so the caller knows whether
/// it is caught up.
///
/// Advances the creditor's `log_read_cursor` to the highest id served.
pub async fn log_entries_page(
    pool: &PgPool,
    creditor_id: i64,
    after_id: i64,
    count: i64,
) -> Result<(Vec<LogEntry>, i64), sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT creditor_id, entry_id, object_type, debtor_id, transfer_id,
               object_update_id, is_deleted, data, added_at
        FROM log_entries_tb
        WHERE creditor_id = $1 AND entry_id > $2
        ORDER BY entry_id ASC
        LIMIT $3
        "#,
    )
    .bind(creditor_id)
    .bind(after_id)
    .bind(count)
    .fetch_all(pool)
    .await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in &rows {
        entries.push(row_to_log_entry(row)?);
    }

    if let Some(last) = entries.last() {
        sqlx::query(
            r#"
            UPDATE creditors_tb
            SET log_read_cursor = GREATEST(log_read_cursor, $2)
            WHERE creditor_id = $1
            "#,
        )
        .bind(creditor_id)
        .bind(last.entry_id)
        .execute(pool)
        .await?;
    }

    let latest_id = sqlx::query_scalar::<_, i64>(
        "SELECT last_log_entry_id FROM creditors_tb WHERE creditor_id = $1",
    )
    .bind(creditor_id)
    .fetch_one(pool)
    .await?;

    Ok((entries, latest_id))
}

fn row_to_ledger_entry(row: &sqlx::postgres::PgRow) -> Result<LedgerEntry, sqlx::Error> {
    Ok(LedgerEntry {
        creditor_id: row.try_get("creditor_id")?,
        debtor_id: row.try_get("debtor_id")?,
        entry_id: row.try_get("entry_id")?,
        acquired_amount: row.try_get("acquired_amount")?,
        principal: row.try_get("principal")?,
        transfer_id: row.try_get("transfer_id")?,
        added_at: row.try_get("added_at")?,
    })
}

fn row_to_log_entry(row: &sqlx::postgres::PgRow) -> Result<LogEntry, sqlx::Error> {
    let type_id: i16 = row.try_get("object_type")?;
    let object_type = LogObjectType::from_id(type_id).ok_or_else(|| sqlx::Error::ColumnDecode {
        index: "object_type".to_string(),
        source: format!("invalid object type id: {}", type_id).into(),
    })?;

    Ok(LogEntry {
        creditor_id: row.try_get("creditor_id")?,
        entry_id: row.try_get("entry_id")?,
        object_type,
        debtor_id: row.try_get("debtor_id")?,
        transfer_id: row.try_get("transfer_id")?,
        object_update_id: row.try_get("object_update_id")?,
        is_deleted: row.try_get("is_deleted")?,
        data: row.try_get("data")?,
        added_at: row.try_get("added_at")?,
    })
}
