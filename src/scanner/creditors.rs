//! Creditor cleanup sweep
//!
//! Two kinds of leftover creditor rows are removed once they pass the
//! grace period and hold no accounts:
//!
//! - deactivated creditors (counted from `deactivated_at`)
//! - registered but never activated creditors (counted from
//!   `created_at`)
//!
//! Deleting the row cascades to its transfers, log entries, and queued
//! signals; the account foreign key restricts, so a creditor with any
//! account row left is skipped by the `NOT EXISTS` guard rather than
//! failing the sweep.

use std::time::Duration;

use sqlx::PgPool;
use tracing::{error, info};

use crate::config::ScannerConfig;
use crate::creditor::{STATUS_IS_ACTIVATED_FLAG, STATUS_IS_DEACTIVATED_FLAG};

pub struct CreditorScanner {
    pool: PgPool,
    config: ScannerConfig,
}

impl CreditorScanner {
    pub fn new(pool: PgPool, config: ScannerConfig) -> Self {
        Self { pool, config }
    }

    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.creditors_scan_secs,
            grace_days = self.config.creditor_grace_days,
            "Starting creditor scanner"
        );

        loop {
            if let Err(e) = self.scan_once().await {
                error!(error = %e, "Creditor scan failed");
            }

            tokio::time::sleep(Duration::from_secs(self.config.creditors_scan_secs)).await;
        }
    }

    /// Run one sweep; returns how many creditor rows were deleted.
    pub async fn scan_once(&self) -> Result<u64, sqlx::Error> {
        let now = chrono::Utc::now();
        let grace = chrono::Duration::days(self.config.creditor_grace_days);
        let deactivated_cutoff = (now - grace).date_naive();
        let created_cutoff = now - grace;

        let mut total = 0u64;
        loop {
            let deleted = sqlx::query(
                r#"
                DELETE FROM creditors_tb
                WHERE creditor_id IN (
                    SELECT c.creditor_id
                    FROM creditors_tb c
                    WHERE ((c.status_flags & $1 <> 0 AND c.deactivated_at < $2)
                        OR (c.status_flags & $3 = 0 AND c.created_at < $4))
                      AND NOT EXISTS (
                          SELECT 1 FROM accounts_tb a
                          WHERE a.creditor_id = c.creditor_id
                      )
                    LIMIT $5
                )
                "#,
            )
            .bind(STATUS_IS_DEACTIVATED_FLAG)
            .bind(deactivated_cutoff)
            .bind(STATUS_IS_ACTIVATED_FLAG)
            .bind(created_cutoff)
            .bind(self.config.batch_size)
            .execute(&self.pool)
            .await?
            .rows_affected();

            total += deleted;
            if deleted < self.config.batch_size as u64 {
                break;
            }
        }

        if total > 0 {
            info!(count = total, "Removed expired creditors");
        }
        Ok(total)
    }
}
