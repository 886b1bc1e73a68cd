//! Account configuration sweep
//!
//! Watches PENDING accounts whose configure command was never
//! acknowledged by an account snapshot. Two windows, both anchored on
//! `last_config_ts`:
//!
//! - past the retry window: re-enqueue the configure command with the
//!   stored token, covering a lost outbound message. The resend is a
//!   wire-level duplicate if the first command did arrive.
//! - past the fail window: record `CONFIGURATION_IS_NOT_EFFECTUAL` so
//!   the client learns the account will not activate on its own.
//!
//! Resends keep the stored token, so `last_config_ts` does not move
//! and the fail window keeps counting from the client's last actual
//! configuration change.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{error, info, warn};

use crate::account::db::lock_account;
use crate::account::{AccountError, AccountStatus};
use crate::config::ScannerConfig;
use crate::ledger::{LogObjectType, NewLogEntry, append_log_entry};
use crate::messages::OutboundMessage;
use crate::outbox;

const CONFIG_NOT_EFFECTUAL: &str = "CONFIGURATION_IS_NOT_EFFECTUAL";

pub struct AccountScanner {
    pool: PgPool,
    config: ScannerConfig,
}

impl AccountScanner {
    pub fn new(pool: PgPool, config: ScannerConfig) -> Self {
        Self { pool, config }
    }

    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.accounts_scan_secs,
            batch_size = self.config.batch_size,
            "Starting account scanner"
        );

        loop {
            if let Err(e) = self.scan_once().await {
                error!(error = %e, "Account scan failed");
            }

            tokio::time::sleep(Duration::from_secs(self.config.accounts_scan_secs)).await;
        }
    }

    /// Run one sweep; returns how many accounts were acted on.
    pub async fn scan_once(&self) -> Result<usize, AccountError> {
        // Failing first removes the account from the resend candidates.
        let failed = self.fail_overdue_configs().await?;
        let resent = self.resend_unacknowledged_configs().await?;
        Ok(failed + resent)
    }

    async fn resend_unacknowledged_configs(&self) -> Result<usize, AccountError> {
        let cutoff = Utc::now() - chrono::Duration::hours(self.config.pending_retry_hours);
        let mut resent = 0;
        for (creditor_id, debtor_id) in self.stale_pending_accounts(cutoff).await? {
            if self.resend_config(creditor_id, debtor_id, cutoff).await? {
                resent += 1;
            }
        }
        Ok(resent)
    }

    async fn fail_overdue_configs(&self) -> Result<usize, AccountError> {
        let cutoff = Utc::now() - chrono::Duration::days(self.config.pending_fail_days);
        let mut failed = 0;
        for (creditor_id, debtor_id) in self.stale_pending_accounts(cutoff).await? {
            if self.fail_config(creditor_id, debtor_id, cutoff).await? {
                failed += 1;
            }
        }
        Ok(failed)
    }

    async fn stale_pending_accounts(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<(i64, i64)>, AccountError> {
        let rows = sqlx::query(
            r#"
            SELECT creditor_id, debtor_id
            FROM accounts_tb
            WHERE status = $1 AND config_error IS NULL AND last_config_ts < $2
            ORDER BY last_config_ts
            LIMIT $3
            "#,
        )
        .bind(AccountStatus::Pending.id())
        .bind(cutoff)
        .bind(self.config.batch_size)
        .fetch_all(&self.pool)
        .await?;

        let mut keys = Vec::with_capacity(rows.len());
        for row in &rows {
            keys.push((row.try_get("creditor_id")?, row.try_get("debtor_id")?));
        }
        Ok(keys)
    }

    /// Re-enqueue the stored configure command. Returns false when the
    /// account changed under us or a command is already queued.
    async fn resend_config(
        &self,
        creditor_id: i64,
        debtor_id: i64,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, AccountError> {
        let mut tx = self.pool.begin().await?;

        let Some(account) = lock_account(&mut tx, creditor_id, debtor_id).await? else {
            return Ok(false);
        };
        if account.status != AccountStatus::Pending
            || account.config_error.is_some()
            || account.last_config_ts >= cutoff
        {
            return Ok(false);
        }
        if outbox::has_queued_configure(&mut tx, creditor_id, debtor_id).await? {
            return Ok(false);
        }

        // Same token as the original command; the debtor's node treats
        // the resend as a duplicate if the first one did arrive.
        outbox::enqueue(
            &mut tx,
            creditor_id,
            debtor_id,
            None,
            &OutboundMessage::ConfigureAccount {
                creditor_id,
                debtor_id,
                ts: account.last_config_ts,
                seqnum: account.config_seqnum,
                config_data: account.config_data.clone(),
            },
        )
        .await?;

        tx.commit().await?;

        info!(creditor_id, debtor_id, "Re-sent account configuration");
        Ok(true)
    }

    /// Mark the configuration as not effectual, the same way a wire
    /// rejection would.
    async fn fail_config(
        &self,
        creditor_id: i64,
        debtor_id: i64,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, AccountError> {
        let mut tx = self.pool.begin().await?;

        let Some(account) = lock_account(&mut tx, creditor_id, debtor_id).await? else {
            return Ok(false);
        };
        if account.status != AccountStatus::Pending
            || account.config_error.is_some()
            || account.last_config_ts >= cutoff
        {
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
        .bind(CONFIG_NOT_EFFECTUAL)
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
            "config_error": CONFIG_NOT_EFFECTUAL,
        }));
        append_log_entry(&mut tx, creditor_id, entry, now).await?;

        tx.commit().await?;

        warn!(
            creditor_id,
            debtor_id, "Account configuration marked not effectual"
        );
        Ok(true)
    }
}
