//! Creditor registry operations
//!
//! All mutations run in a single transaction together with the log
//! entry they produce. The creditor row lock is taken last, consistent
//! with the transfer and account services.

use chrono::Utc;
use sqlx::PgPool;
use tracing::info;

use super::error::CreditorError;
use super::types::{
    Creditor, STATUS_IS_ACTIVATED_FLAG, STATUS_IS_DEACTIVATED_FLAG, row_to_creditor,
};
use crate::ledger::{self, LogEntry, LogObjectType, NewLogEntry, append_log_entry};

const CREDITOR_SELECT: &str = r#"
    SELECT creditor_id, created_at, status_flags, deactivated_at,
           last_log_entry_id, log_read_cursor, latest_update_id, latest_update_ts
    FROM creditors_tb
    WHERE creditor_id = $1
"#;

pub struct CreditorService {
    pool: PgPool,
}

impl CreditorService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Reserve a creditor id.
    ///
    /// The row starts with no status flags set and stays externally
    /// invisible until `activate`; no log entry is written here.
    pub async fn register(&self, creditor_id: i64) -> Result<Creditor, CreditorError> {
        let now = Utc::now();
        let insert_result = sqlx::query(
            r#"
            INSERT INTO creditors_tb
                (creditor_id, created_at, status_flags, deactivated_at,
                 last_log_entry_id, log_read_cursor, latest_update_id, latest_update_ts)
            VALUES ($1, $2, 0, NULL, 0, 0, 1, $2)
            ON CONFLICT (creditor_id) DO NOTHING
            "#,
        )
        .bind(creditor_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if insert_result.rows_affected() == 0 {
            return Err(CreditorError::CreditorExists(creditor_id));
        }

        info!(creditor_id, "Creditor registered");

        Ok(Creditor {
            creditor_id,
            created_at: now,
            status_flags: 0,
            deactivated_at: None,
            last_log_entry_id: 0,
            log_read_cursor: 0,
            latest_update_id: 1,
            latest_update_ts: now,
        })
    }

    /// Turn a registered creditor live. Retrying an already live
    /// creditor returns the current record unchanged.
    pub async fn activate(&self, creditor_id: i64) -> Result<Creditor, CreditorError> {
        let mut tx = self.pool.begin().await?;

        let mut creditor = lock_creditor(&mut tx, creditor_id)
            .await?
            .ok_or(CreditorError::CreditorNotFound(creditor_id))?;

        if creditor.is_deactivated() {
            // The row is waiting for the retention sweep; the id
            // cannot come back before it is gone.
            return Err(CreditorError::CreditorNotFound(creditor_id));
        }
        if creditor.is_activated() {
            return Ok(creditor);
        }

        let now = Utc::now();
        let update_id = creditor.latest_update_id + 1;
        sqlx::query(
            r#"
            UPDATE creditors_tb
            SET status_flags = status_flags | $2,
                latest_update_id = $3,
                latest_update_ts = $4
            WHERE creditor_id = $1
            "#,
        )
        .bind(creditor_id)
        .bind(STATUS_IS_ACTIVATED_FLAG)
        .bind(update_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        // First entry of the creditor's log stream.
        let mut entry = NewLogEntry::new(LogObjectType::Creditor);
        entry.object_update_id = Some(update_id);
        entry.data = Some(serde_json::json!({ "status": "ACTIVE" }));
        append_log_entry(&mut tx, creditor_id, entry, now).await?;

        tx.commit().await?;

        info!(creditor_id, "Creditor activated");

        creditor.status_flags |= STATUS_IS_ACTIVATED_FLAG;
        creditor.last_log_entry_id += 1;
        creditor.latest_update_id = update_id;
        creditor.latest_update_ts = now;
        Ok(creditor)
    }

    /// Take a live creditor out of service.
    ///
    /// Refused while any account row remains, purged ones included;
    /// the retention sweep deletes the creditor row itself once the
    /// grace period after `deactivated_at` has passed.
    pub async fn deactivate(&self, creditor_id: i64) -> Result<Creditor, CreditorError> {
        let mut tx = self.pool.begin().await?;

        let mut creditor = lock_creditor(&mut tx, creditor_id)
            .await?
            .ok_or(CreditorError::CreditorNotFound(creditor_id))?;

        if !creditor.is_activated() {
            return Err(CreditorError::CreditorNotFound(creditor_id));
        }
        if creditor.is_deactivated() {
            return Ok(creditor);
        }

        let account_count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM accounts_tb WHERE creditor_id = $1",
        )
        .bind(creditor_id)
        .fetch_one(&mut *tx)
        .await?;
        if account_count > 0 {
            return Err(CreditorError::AccountsStillExist(creditor_id));
        }

        let now = Utc::now();
        let today = now.date_naive();
        let update_id = creditor.latest_update_id + 1;
        sqlx::query(
            r#"
            UPDATE creditors_tb
            SET status_flags = status_flags | $2,
                deactivated_at = $3,
                latest_update_id = $4,
                latest_update_ts = $5
            WHERE creditor_id = $1
            "#,
        )
        .bind(creditor_id)
        .bind(STATUS_IS_DEACTIVATED_FLAG)
        .bind(today)
        .bind(update_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let mut entry = NewLogEntry::new(LogObjectType::Creditor);
        entry.object_update_id = Some(update_id);
        entry.is_deleted = true;
        append_log_entry(&mut tx, creditor_id, entry, now).await?;

        tx.commit().await?;

        info!(creditor_id, "Creditor deactivated");

        creditor.status_flags |= STATUS_IS_DEACTIVATED_FLAG;
        creditor.deactivated_at = Some(today);
        creditor.last_log_entry_id += 1;
        creditor.latest_update_id = update_id;
        creditor.latest_update_ts = now;
        Ok(creditor)
    }

    /// Client-driven update of the creditor record.
    ///
    /// `update_id` must be exactly one above the stored value; sending
    /// the stored value again is a no-op retry and returns the current
    /// record.
    pub async fn update(
        &self,
        creditor_id: i64,
        update_id: i64,
    ) -> Result<Creditor, CreditorError> {
        let mut tx = self.pool.begin().await?;

        let mut creditor = lock_creditor(&mut tx, creditor_id)
            .await?
            .ok_or(CreditorError::CreditorNotFound(creditor_id))?;

        if !creditor.is_active() {
            return Err(CreditorError::CreditorNotFound(creditor_id));
        }
        if update_id == creditor.latest_update_id {
            return Ok(creditor);
        }
        if update_id != creditor.latest_update_id + 1 {
            return Err(CreditorError::UpdateConflict {
                expected: creditor.latest_update_id + 1,
                got: update_id,
            });
        }

        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE creditors_tb
            SET latest_update_id = $2, latest_update_ts = $3
            WHERE creditor_id = $1
            "#,
        )
        .bind(creditor_id)
        .bind(update_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let mut entry = NewLogEntry::new(LogObjectType::Creditor);
        entry.object_update_id = Some(update_id);
        append_log_entry(&mut tx, creditor_id, entry, now).await?;

        tx.commit().await?;

        creditor.last_log_entry_id += 1;
        creditor.latest_update_id = update_id;
        creditor.latest_update_ts = now;
        Ok(creditor)
    }

    pub async fn get(&self, creditor_id: i64) -> Result<Option<Creditor>, CreditorError> {
        let mut conn = self.pool.acquire().await?;
        Ok(fetch_creditor(&mut conn, creditor_id).await?)
    }

    /// Page of the creditor's log stream, oldest first, entries
    /// strictly above `after_id`. Also returns the current highest
    /// entry id so the caller knows whether it is caught up.
    pub async fn log_entries(
        &self,
        creditor_id: i64,
        after_id: i64,
        count: i64,
    ) -> Result<(Vec<LogEntry>, i64), CreditorError> {
        let mut conn = self.pool.acquire().await?;
        if fetch_creditor(&mut conn, creditor_id).await?.is_none() {
            return Err(CreditorError::CreditorNotFound(creditor_id));
        }
        drop(conn);

        Ok(ledger::log_entries_page(&self.pool, creditor_id, after_id, count).await?)
    }
}

pub(crate) async fn fetch_creditor(
    conn: &mut sqlx::PgConnection,
    creditor_id: i64,
) -> Result<Option<Creditor>, sqlx::Error> {
    let row = sqlx::query(CREDITOR_SELECT)
        .bind(creditor_id)
        .fetch_optional(conn)
        .await?;
    row.as_ref().map(row_to_creditor).transpose()
}

pub(crate) async fn lock_creditor(
    conn: &mut sqlx::PgConnection,
    creditor_id: i64,
) -> Result<Option<Creditor>, sqlx::Error> {
    let row = sqlx::query(&format!("{CREDITOR_SELECT} FOR UPDATE"))
        .bind(creditor_id)
        .fetch_optional(conn)
        .await?;
    row.as_ref().map(row_to_creditor).transpose()
}
