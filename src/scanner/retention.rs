//! Retention sweep
//!
//! Prunes three kinds of old rows:
//!
//! - log entries past the log retention window
//! - ledger entries past the ledger retention window
//! - purged account rows nobody has touched for the purge retention
//!   window (their remaining ledger entries cascade away)
//!
//! Log and ledger pruning never passes the owner's read cursor: an
//! entry a client has not paged past stays, no matter how old. That
//! keeps the streams append-only from the client's point of view; a
//! client that falls behind for months sees a gap only if it also fell
//! behind the retention window itself.

use std::time::Duration;

use sqlx::PgPool;
use tracing::{error, info};

use crate::account::AccountStatus;
use crate::config::ScannerConfig;

pub struct RetentionScanner {
    pool: PgPool,
    config: ScannerConfig,
}

impl RetentionScanner {
    pub fn new(pool: PgPool, config: ScannerConfig) -> Self {
        Self { pool, config }
    }

    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.retention_scan_secs,
            log_retention_days = self.config.log_retention_days,
            ledger_retention_days = self.config.ledger_retention_days,
            "Starting retention scanner"
        );

        loop {
            if let Err(e) = self.scan_once().await {
                error!(error = %e, "Retention scan failed");
            }

            tokio::time::sleep(Duration::from_secs(self.config.retention_scan_secs)).await;
        }
    }

    /// Run one sweep; returns how many rows were deleted.
    pub async fn scan_once(&self) -> Result<u64, sqlx::Error> {
        let log_entries = self.prune_log_entries().await?;
        let ledger_entries = self.prune_ledger_entries().await?;
        let accounts = self.prune_purged_accounts().await?;

        let total = log_entries + ledger_entries + accounts;
        if total > 0 {
            info!(
                log_entries,
                ledger_entries, accounts, "Retention sweep pruned rows"
            );
        }
        Ok(total)
    }

    async fn prune_log_entries(&self) -> Result<u64, sqlx::Error> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(self.config.log_retention_days);
        let mut total = 0u64;

        loop {
            let deleted = sqlx::query(
                r#"
                DELETE FROM log_entries_tb
                WHERE ctid IN (
                    SELECT le.ctid
                    FROM log_entries_tb le
                    JOIN creditors_tb c USING (creditor_id)
                    WHERE le.added_at < $1 AND le.entry_id <= c.log_read_cursor
                    LIMIT $2
                )
                "#,
            )
            .bind(cutoff)
            .bind(self.config.batch_size)
            .execute(&self.pool)
            .await?
            .rows_affected();

            total += deleted;
            if deleted < self.config.batch_size as u64 {
                return Ok(total);
            }
        }
    }

    async fn prune_ledger_entries(&self) -> Result<u64, sqlx::Error> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(self.config.ledger_retention_days);
        let mut total = 0u64;

        loop {
            let deleted = sqlx::query(
                r#"
                DELETE FROM ledger_entries_tb
                WHERE ctid IN (
                    SELECT le.ctid
                    FROM ledger_entries_tb le
                    JOIN accounts_tb a USING (creditor_id, debtor_id)
                    WHERE le.added_at < $1 AND le.entry_id <= a.ledger_read_cursor
                    LIMIT $2
                )
                "#,
            )
            .bind(cutoff)
            .bind(self.config.batch_size)
            .execute(&self.pool)
            .await?
            .rows_affected();

            total += deleted;
            if deleted < self.config.batch_size as u64 {
                return Ok(total);
            }
        }
    }

    /// A purged account row exists only so that late events for the
    /// dead incarnation can be recognized and dropped. After the purge
    /// retention window no such event is plausible anymore.
    async fn prune_purged_accounts(&self) -> Result<u64, sqlx::Error> {
        let cutoff =
            chrono::Utc::now() - chrono::Duration::days(self.config.purged_account_retention_days);
        let mut total = 0u64;

        loop {
            let deleted = sqlx::query(
                r#"
                DELETE FROM accounts_tb
                WHERE ctid IN (
                    SELECT ctid
                    FROM accounts_tb
                    WHERE status = $1 AND latest_update_ts < $2
                    LIMIT $3
                )
                "#,
            )
            .bind(AccountStatus::Purged.id())
            .bind(cutoff)
            .bind(self.config.batch_size)
            .execute(&self.pool)
            .await?
            .rows_affected();

            total += deleted;
            if deleted < self.config.batch_size as u64 {
                return Ok(total);
            }
        }
    }
}
