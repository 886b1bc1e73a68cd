//! Client-facing account operations

use chrono::{DateTime, SubsecRound, Utc};
use sqlx::PgPool;
use tracing::info;

use super::db;
use super::error::AccountError;
use super::types::{Account, AccountStatus};
use crate::core_types::Seqnum;
use crate::creditor::flags_are_active;
use crate::ledger::{LogObjectType, NewLogEntry, append_log_entry};
use crate::messages::OutboundMessage;
use crate::outbox;

pub struct AccountService {
    pool: PgPool,
}

impl AccountService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Declare an account with a debtor and queue the first configure
    /// command.
    ///
    /// A live duplicate is rejected. A purged row is revived as
    /// PENDING with a fresh configure command, since the remote
    /// account must be re-created.
    pub async fn create(&self, creditor_id: i64, debtor_id: i64) -> Result<Account, AccountError> {
        let mut tx = self.pool.begin().await?;

        let flags = sqlx::query_scalar::<_, i16>(
            "SELECT status_flags FROM creditors_tb WHERE creditor_id = $1",
        )
        .bind(creditor_id)
        .fetch_optional(&mut *tx)
        .await?;
        if !flags.is_some_and(flags_are_active) {
            return Err(AccountError::CreditorNotFound(creditor_id));
        }

        // PostgreSQL stores microseconds; the configure token must
        // compare equal after the round-trip through the remote echo.
        let now = Utc::now().trunc_subsecs(6);

        if let Some(account) = db::lock_account(&mut tx, creditor_id, debtor_id).await? {
            if account.status != AccountStatus::Purged {
                return Err(AccountError::AccountExists(debtor_id));
            }
            return self.revive_purged(tx, account, now).await;
        }

        // The snapshot token starts at the epoch so the first remote
        // snapshot is never treated as stale.
        sqlx::query(
            r#"
            INSERT INTO accounts_tb
                (creditor_id, debtor_id, created_at, status, last_change_ts,
                 last_config_ts, latest_update_ts)
            VALUES ($1, $2, $3, $4, $5, $3, $3)
            "#,
        )
        .bind(creditor_id)
        .bind(debtor_id)
        .bind(now)
        .bind(AccountStatus::Pending.id())
        .bind(DateTime::UNIX_EPOCH)
        .execute(&mut *tx)
        .await?;

        outbox::enqueue(
            &mut tx,
            creditor_id,
            debtor_id,
            None,
            &OutboundMessage::ConfigureAccount {
                creditor_id,
                debtor_id,
                ts: now,
                seqnum: 0,
                config_data: String::new(),
            },
        )
        .await?;

        let mut entry = NewLogEntry::new(LogObjectType::Account);
        entry.debtor_id = Some(debtor_id);
        entry.object_update_id = Some(1);
        entry.data = Some(serde_json::json!({
            "debtor_id": debtor_id,
            "status": AccountStatus::Pending.as_str(),
        }));
        append_log_entry(&mut tx, creditor_id, entry, now).await?;

        tx.commit().await?;

        info!(creditor_id, debtor_id, "Account created");

        Ok(Account {
            creditor_id,
            debtor_id,
            created_at: now,
            status: AccountStatus::Pending,
            current_balance: 0,
            last_change_ts: DateTime::UNIX_EPOCH,
            last_change_seqnum: 0,
            config_seqnum: 0,
            config_data: String::new(),
            config_error: None,
            last_config_ts: now,
            last_entry_id: 0,
            ledger_read_cursor: 0,
            latest_update_id: 1,
            latest_update_ts: now,
        })
    }

    async fn revive_purged(
        &self,
        mut tx: sqlx::Transaction<'_, sqlx::Postgres>,
        account: Account,
        now: chrono::DateTime<Utc>,
    ) -> Result<Account, AccountError> {
        let seqnum = Seqnum(account.config_seqnum).next();
        let update_id = account.latest_update_id + 1;

        // A revived account is a new remote incarnation; its snapshot
        // token restarts from the epoch.
        sqlx::query(
            r#"
            UPDATE accounts_tb
            SET status = $1, config_seqnum = $2, config_error = NULL,
                last_config_ts = $3, last_change_ts = $4, last_change_seqnum = 0,
                latest_update_id = $5, latest_update_ts = $3
            WHERE creditor_id = $6 AND debtor_id = $7
            "#,
        )
        .bind(AccountStatus::Pending.id())
        .bind(seqnum.0)
        .bind(now)
        .bind(DateTime::UNIX_EPOCH)
        .bind(update_id)
        .bind(account.creditor_id)
        .bind(account.debtor_id)
        .execute(&mut *tx)
        .await?;

        outbox::enqueue(
            &mut tx,
            account.creditor_id,
            account.debtor_id,
            None,
            &OutboundMessage::ConfigureAccount {
                creditor_id: account.creditor_id,
                debtor_id: account.debtor_id,
                ts: now,
                seqnum: seqnum.0,
                config_data: account.config_data.clone(),
            },
        )
        .await?;

        let mut entry = NewLogEntry::new(LogObjectType::Account);
        entry.debtor_id = Some(account.debtor_id);
        entry.object_update_id = Some(update_id);
        entry.data = Some(serde_json::json!({
            "debtor_id": account.debtor_id,
            "status": AccountStatus::Pending.as_str(),
        }));
        append_log_entry(&mut tx, account.creditor_id, entry, now).await?;

        tx.commit().await?;

        info!(
            creditor_id = account.creditor_id,
            debtor_id = account.debtor_id,
            "Purged account revived"
        );

        Ok(Account {
            status: AccountStatus::Pending,
            config_seqnum: seqnum.0,
            config_error: None,
            last_config_ts: now,
            last_change_ts: DateTime::UNIX_EPOCH,
            last_change_seqnum: 0,
            latest_update_id: update_id,
            latest_update_ts: now,
            ..account
        })
    }

    /// Change the account's configuration and queue the configure
    /// command carrying it.
    ///
    /// `update_id` must be the stored `latest_update_id + 1`; the same
    /// value again is treated as a replayed retry and returns the
    /// current record. Anything else is a lost update.
    pub async fn update_config(
        &self,
        creditor_id: i64,
        debtor_id: i64,
        update_id: i64,
        config_data: &str,
    ) -> Result<Account, AccountError> {
        let mut tx = self.pool.begin().await?;

        let Some(account) = db::lock_account(&mut tx, creditor_id, debtor_id).await? else {
            return Err(AccountError::AccountNotFound(debtor_id));
        };
        if account.status == AccountStatus::Purged {
            return Err(AccountError::AccountNotFound(debtor_id));
        }

        if update_id == account.latest_update_id {
            return Ok(account);
        }
        if update_id != account.latest_update_id + 1 {
            return Err(AccountError::UpdateConflict {
                expected: account.latest_update_id + 1,
                got: update_id,
            });
        }

        let now = Utc::now().trunc_subsecs(6);
        let seqnum = Seqnum(account.config_seqnum).next();

        sqlx::query(
            r#"
            UPDATE accounts_tb
            SET config_data = $1, config_seqnum = $2, config_error = NULL,
                last_config_ts = $3, latest_update_id = $4, latest_update_ts = $3
            WHERE creditor_id = $5 AND debtor_id = $6
            "#,
        )
        .bind(config_data)
        .bind(seqnum.0)
        .bind(now)
        .bind(update_id)
        .bind(creditor_id)
        .bind(debtor_id)
        .execute(&mut *tx)
        .await?;

        outbox::enqueue(
            &mut tx,
            creditor_id,
            debtor_id,
            None,
            &OutboundMessage::ConfigureAccount {
                creditor_id,
                debtor_id,
                ts: now,
                seqnum: seqnum.0,
                config_data: config_data.to_string(),
            },
        )
        .await?;

        let mut entry = NewLogEntry::new(LogObjectType::AccountConfig);
        entry.debtor_id = Some(debtor_id);
        entry.object_update_id = Some(update_id);
        entry.data = Some(serde_json::json!({
            "config_data": config_data,
        }));
        append_log_entry(&mut tx, creditor_id, entry, now).await?;

        tx.commit().await?;

        info!(creditor_id, debtor_id, update_id, "Account config updated");

        Ok(Account {
            config_data: config_data.to_string(),
            config_seqnum: seqnum.0,
            config_error: None,
            last_config_ts: now,
            latest_update_id: update_id,
            latest_update_ts: now,
            ..account
        })
    }

    /// Fetch an account record.
    pub async fn get(
        &self,
        creditor_id: i64,
        debtor_id: i64,
    ) -> Result<Option<Account>, AccountError> {
        let mut conn = self.pool.acquire().await?;
        Ok(db::fetch_account(&mut conn, creditor_id, debtor_id).await?)
    }
}
