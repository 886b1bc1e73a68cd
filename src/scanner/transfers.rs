//! Transfer deadline sweep
//!
//! Transfers must not stay open past their deadline. What happens at
//! the deadline depends on how far the transfer got:
//!
//! - `Initiated`/`Sent`: no funds are locked remotely, so the transfer
//!   is finalized locally as cancelled with error `TIMEOUT`, and any
//!   undelivered prepare command is dropped from the outbox.
//! - `Prepared`: funds ARE locked; only the debtor's node can release
//!   them. The sweep moves the transfer to `Finalizing` and enqueues a
//!   cancelling finalize command, then waits for the terminal event.
//!
//! The sweep also prunes finalized transfers once they outlive the
//! retention window, logging the deletion so client mirrors converge.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{error, info};

use crate::config::ScannerConfig;
use crate::ledger::{LogObjectType, NewLogEntry, append_log_entry};
use crate::messages::OutboundMessage;
use crate::outbox::{self, SignalKind, delete_transfer_signals};
use crate::transfer::db::lock_transfer;
use crate::transfer::{TransferError, TransferOutcome, TransferPhase};
use uuid::Uuid;

const TIMEOUT_ERROR: &str = "TIMEOUT";

pub struct TransferScanner {
    pool: PgPool,
    config: ScannerConfig,
}

impl TransferScanner {
    pub fn new(pool: PgPool, config: ScannerConfig) -> Self {
        Self { pool, config }
    }

    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.transfers_scan_secs,
            batch_size = self.config.batch_size,
            "Starting transfer scanner"
        );

        loop {
            if let Err(e) = self.scan_once().await {
                error!(error = %e, "Transfer scan failed");
            }

            tokio::time::sleep(Duration::from_secs(self.config.transfers_scan_secs)).await;
        }
    }

    /// Run one sweep; returns how many transfers were acted on.
    pub async fn scan_once(&self) -> Result<usize, TransferError> {
        let cancelled = self.cancel_overdue_unsent().await?;
        let finalizing = self.cancel_overdue_prepared().await?;
        let pruned = self.prune_finalized().await?;
        Ok(cancelled + finalizing + pruned)
    }

    async fn cancel_overdue_unsent(&self) -> Result<usize, TransferError> {
        let now = Utc::now();
        let keys = self
            .overdue_transfers(&[TransferPhase::Initiated, TransferPhase::Sent], now)
            .await?;

        let mut cancelled = 0;
        for (creditor_id, transfer_id) in keys {
            if self.cancel_unsent(creditor_id, transfer_id).await? {
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    async fn cancel_overdue_prepared(&self) -> Result<usize, TransferError> {
        let now = Utc::now();
        let keys = self
            .overdue_transfers(&[TransferPhase::Prepared], now)
            .await?;

        let mut finalizing = 0;
        for (creditor_id, transfer_id) in keys {
            if self.request_cancel(creditor_id, transfer_id).await? {
                finalizing += 1;
            }
        }
        Ok(finalizing)
    }

    async fn overdue_transfers(
        &self,
        phases: &[TransferPhase],
        now: DateTime<Utc>,
    ) -> Result<Vec<(i64, Uuid)>, TransferError> {
        let phase_ids: Vec<i16> = phases.iter().map(|p| p.id()).collect();
        let rows = sqlx::query(
            r#"
            SELECT creditor_id, transfer_id
            FROM transfers_tb
            WHERE phase = ANY($1) AND deadline < $2
            ORDER BY deadline
            LIMIT $3
            "#,
        )
        .bind(&phase_ids)
        .bind(now)
        .bind(self.config.batch_size)
        .fetch_all(&self.pool)
        .await?;

        let mut keys = Vec::with_capacity(rows.len());
        for row in &rows {
            keys.push((row.try_get("creditor_id")?, row.try_get("transfer_id")?));
        }
        Ok(keys)
    }

    /// Deadline passed before the prepare command was acknowledged: no
    /// funds are locked, finalize locally as cancelled.
    async fn cancel_unsent(
        &self,
        creditor_id: i64,
        transfer_id: Uuid,
    ) -> Result<bool, TransferError> {
        let mut tx = self.pool.begin().await?;

        let Some(transfer) = lock_transfer(&mut tx, creditor_id, transfer_id).await? else {
            return Ok(false);
        };
        let now = Utc::now();
        if !matches!(
            transfer.phase,
            TransferPhase::Initiated | TransferPhase::Sent
        ) || transfer.deadline >= now
        {
            return Ok(false);
        }

        let update_id = transfer.latest_update_id + 1;
        sqlx::query(
            r#"
            UPDATE transfers_tb
            SET phase = $1, outcome = $2, error_code = $3, finalized_at = $4,
                latest_update_id = $5, latest_update_ts = $4
            WHERE creditor_id = $6 AND transfer_id = $7
            "#,
        )
        .bind(TransferPhase::Finalized.id())
        .bind(TransferOutcome::Cancelled.id())
        .bind(TIMEOUT_ERROR)
        .bind(now)
        .bind(update_id)
        .bind(creditor_id)
        .bind(transfer_id)
        .execute(&mut *tx)
        .await?;

        // The prepare command is now a liability: delivered after this
        // point it would lock funds for a dead transfer.
        delete_transfer_signals(&mut tx, creditor_id, transfer_id, SignalKind::PrepareTransfer)
            .await?;

        let mut entry = NewLogEntry::new(LogObjectType::Transfer);
        entry.debtor_id = Some(transfer.debtor_id);
        entry.transfer_id = Some(transfer_id);
        entry.object_update_id = Some(update_id);
        entry.data = Some(serde_json::json!({
            "phase": TransferPhase::Finalized.as_str(),
            "outcome": TransferOutcome::Cancelled.as_str(),
            "error_code": TIMEOUT_ERROR,
        }));
        append_log_entry(&mut tx, creditor_id, entry, now).await?;

        tx.commit().await?;

        info!(creditor_id, transfer_id = %transfer_id, "Overdue transfer cancelled");
        Ok(true)
    }

    /// Deadline passed with funds locked: ask the debtor's node to
    /// release them and wait for the terminal event.
    async fn request_cancel(
        &self,
        creditor_id: i64,
        transfer_id: Uuid,
    ) -> Result<bool, TransferError> {
        let mut tx = self.pool.begin().await?;

        let Some(transfer) = lock_transfer(&mut tx, creditor_id, transfer_id).await? else {
            return Ok(false);
        };
        let now = Utc::now();
        if transfer.phase != TransferPhase::Prepared || transfer.deadline >= now {
            return Ok(false);
        }

        let update_id = transfer.latest_update_id + 1;
        sqlx::query(
            r#"
            UPDATE transfers_tb
            SET phase = $1, latest_update_id = $2, latest_update_ts = $3
            WHERE creditor_id = $4 AND transfer_id = $5
            "#,
        )
        .bind(TransferPhase::Finalizing.id())
        .bind(update_id)
        .bind(now)
        .bind(creditor_id)
        .bind(transfer_id)
        .execute(&mut *tx)
        .await?;

        outbox::enqueue(
            &mut tx,
            creditor_id,
            transfer.debtor_id,
            Some(transfer_id),
            &OutboundMessage::FinalizeTransfer {
                creditor_id,
                debtor_id: transfer.debtor_id,
                transfer_id,
                committed_amount: 0,
                ts: now,
            },
        )
        .await?;

        let mut entry = NewLogEntry::new(LogObjectType::Transfer);
        entry.debtor_id = Some(transfer.debtor_id);
        entry.transfer_id = Some(transfer_id);
        entry.object_update_id = Some(update_id);
        entry.data = Some(serde_json::json!({
            "phase": TransferPhase::Finalizing.as_str(),
        }));
        append_log_entry(&mut tx, creditor_id, entry, now).await?;

        tx.commit().await?;

        info!(creditor_id, transfer_id = %transfer_id, "Stuck prepared transfer; cancel requested");
        Ok(true)
    }

    async fn prune_finalized(&self) -> Result<usize, TransferError> {
        let cutoff = Utc::now() - chrono::Duration::days(self.config.transfer_retention_days);
        let rows = sqlx::query(
            r#"
            SELECT creditor_id, transfer_id
            FROM transfers_tb
            WHERE phase = $1 AND finalized_at < $2
            ORDER BY finalized_at
            LIMIT $3
            "#,
        )
        .bind(TransferPhase::Finalized.id())
        .bind(cutoff)
        .bind(self.config.batch_size)
        .fetch_all(&self.pool)
        .await?;

        let mut pruned = 0;
        for row in &rows {
            let creditor_id: i64 = row.try_get("creditor_id")?;
            let transfer_id: Uuid = row.try_get("transfer_id")?;
            if self.prune_one(creditor_id, transfer_id, cutoff).await? {
                pruned += 1;
            }
        }

        if pruned > 0 {
            info!(count = pruned, "Pruned old finalized transfers");
        }
        Ok(pruned)
    }

    async fn prune_one(
        &self,
        creditor_id: i64,
        transfer_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, TransferError> {
        let mut tx = self.pool.begin().await?;

        let Some(transfer) = lock_transfer(&mut tx, creditor_id, transfer_id).await? else {
            return Ok(false);
        };
        if transfer.phase != TransferPhase::Finalized
            || !transfer.finalized_at.is_some_and(|at| at < cutoff)
        {
            return Ok(false);
        }

        sqlx::query("DELETE FROM transfers_tb WHERE creditor_id = $1 AND transfer_id = $2")
            .bind(creditor_id)
            .bind(transfer_id)
            .execute(&mut *tx)
            .await?;

        let now = Utc::now();
        let mut entry = NewLogEntry::new(LogObjectType::Transfer);
        entry.debtor_id = Some(transfer.debtor_id);
        entry.transfer_id = Some(transfer_id);
        entry.object_update_id = Some(transfer.latest_update_id + 1);
        entry.is_deleted = true;
        append_log_entry(&mut tx, creditor_id, entry, now).await?;

        tx.commit().await?;
        Ok(true)
    }
}
