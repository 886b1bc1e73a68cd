//! Client-facing transfer operations
//!
//! Every mutation records its outbound command and its log entry in
//! the same transaction as the phase change; nothing reaches the wire
//! before commit.

use chrono::Utc;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use super::db;
use super::error::TransferError;
use super::state::{TransferOutcome, TransferPhase};
use super::types::{Transfer, TransferRequest};
use crate::account::AccountStatus;
use crate::creditor::flags_are_active;
use crate::ledger::{LogObjectType, NewLogEntry, append_log_entry};
use crate::messages::OutboundMessage;
use crate::outbox::{self, SignalKind};

pub struct TransferService {
    pool: PgPool,
}

impl TransferService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Start a direct transfer and queue the prepare command.
    ///
    /// Idempotent on `transfer_id`: resubmitting an identical request
    /// returns the existing record; a conflicting one is rejected.
    pub async fn initiate(&self, req: &TransferRequest) -> Result<Transfer, TransferError> {
        if req.amount <= 0 {
            return Err(TransferError::InvalidAmount);
        }

        let mut tx = self.pool.begin().await?;

        if let Some(existing) =
            db::fetch_transfer(&mut tx, req.creditor_id, req.transfer_id).await?
        {
            if existing.matches_request(req) {
                info!(
                    creditor_id = req.creditor_id,
                    transfer_id = %req.transfer_id,
                    "Transfer already exists; returning existing record"
                );
                return Ok(existing);
            }
            return Err(TransferError::TransferExists(req.transfer_id));
        }

        let flags = sqlx::query_scalar::<_, i16>(
            "SELECT status_flags FROM creditors_tb WHERE creditor_id = $1",
        )
        .bind(req.creditor_id)
        .fetch_optional(&mut *tx)
        .await?;
        if !flags.is_some_and(flags_are_active) {
            return Err(TransferError::CreditorNotFound(req.creditor_id));
        }

        let status = sqlx::query_scalar::<_, i16>(
            "SELECT status FROM accounts_tb WHERE creditor_id = $1 AND debtor_id = $2",
        )
        .bind(req.creditor_id)
        .bind(req.debtor_id)
        .fetch_optional(&mut *tx)
        .await?;
        match status {
            Some(s) if s != AccountStatus::Purged.id() => {}
            _ => return Err(TransferError::AccountNotFound(req.debtor_id)),
        }

        let now = Utc::now();
        db::insert_transfer(&mut tx, req, now).await?;

        outbox::enqueue(
            &mut tx,
            req.creditor_id,
            req.debtor_id,
            Some(req.transfer_id),
            &OutboundMessage::PrepareTransfer {
                creditor_id: req.creditor_id,
                debtor_id: req.debtor_id,
                transfer_id: req.transfer_id,
                amount: req.amount,
                recipient: req.recipient.clone(),
                deadline: req.deadline,
                ts: now,
            },
        )
        .await?;

        let mut entry = NewLogEntry::new(LogObjectType::Transfer);
        entry.debtor_id = Some(req.debtor_id);
        entry.transfer_id = Some(req.transfer_id);
        entry.object_update_id = Some(1);
        entry.data = Some(serde_json::json!({
            "debtor_id": req.debtor_id,
            "amount": req.amount,
            "recipient": req.recipient,
        }));
        append_log_entry(&mut tx, req.creditor_id, entry, now).await?;

        tx.commit().await?;

        info!(
            creditor_id = req.creditor_id,
            transfer_id = %req.transfer_id,
            debtor_id = req.debtor_id,
            amount = req.amount,
            "Transfer initiated"
        );

        Ok(Transfer {
            creditor_id: req.creditor_id,
            transfer_id: req.transfer_id,
            debtor_id: req.debtor_id,
            amount: req.amount,
            recipient: req.recipient.clone(),
            phase: TransferPhase::Initiated,
            outcome: TransferOutcome::Pending,
            prepared_amount: 0,
            deadline: req.deadline,
            initiated_at: now,
            finalized_at: None,
            error_code: None,
            latest_update_id: 1,
            latest_update_ts: now,
        })
    }

    /// Ask the debtor's node to resolve a prepared transfer.
    ///
    /// `commit = true` releases the locked amount to the recipient,
    /// `false` dismisses the transfer. Re-requesting while the
    /// finalize command is already in motion returns the current
    /// record instead of erroring.
    pub async fn finalize_request(
        &self,
        creditor_id: i64,
        transfer_id: Uuid,
        commit: bool,
    ) -> Result<Transfer, TransferError> {
        let mut tx = self.pool.begin().await?;

        let Some(transfer) = db::lock_transfer(&mut tx, creditor_id, transfer_id).await? else {
            return Err(TransferError::TransferNotFound(transfer_id));
        };

        match transfer.phase {
            TransferPhase::Prepared => {}
            TransferPhase::Finalizing | TransferPhase::Finalized => return Ok(transfer),
            _ => {
                return Err(TransferError::WrongPhase {
                    transfer_id,
                    phase: transfer.phase,
                    required: "PREPARED",
                });
            }
        }

        let now = Utc::now();
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

        let committed_amount = if commit { transfer.prepared_amount } else { 0 };
        outbox::enqueue(
            &mut tx,
            creditor_id,
            transfer.debtor_id,
            Some(transfer_id),
            &OutboundMessage::FinalizeTransfer {
                creditor_id,
                debtor_id: transfer.debtor_id,
                transfer_id,
                committed_amount,
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

        info!(
            creditor_id,
            transfer_id = %transfer_id,
            committed_amount,
            "Transfer finalize requested"
        );

        Ok(Transfer {
            phase: TransferPhase::Finalizing,
            latest_update_id: update_id,
            latest_update_ts: now,
            ..transfer
        })
    }

    /// Remove a finalized transfer record and announce the deletion.
    pub async fn delete(&self, creditor_id: i64, transfer_id: Uuid) -> Result<(), TransferError> {
        let mut tx = self.pool.begin().await?;

        let Some(transfer) = db::lock_transfer(&mut tx, creditor_id, transfer_id).await? else {
            return Err(TransferError::TransferNotFound(transfer_id));
        };
        if transfer.phase != TransferPhase::Finalized {
            return Err(TransferError::WrongPhase {
                transfer_id,
                phase: transfer.phase,
                required: "FINALIZED",
            });
        }

        sqlx::query("DELETE FROM transfers_tb WHERE creditor_id = $1 AND transfer_id = $2")
            .bind(creditor_id)
            .bind(transfer_id)
            .execute(&mut *tx)
            .await?;

        // Normally none remain once FINALIZED; clear any stragglers.
        outbox::delete_transfer_signals(
            &mut tx,
            creditor_id,
            transfer_id,
            SignalKind::PrepareTransfer,
        )
        .await?;
        outbox::delete_transfer_signals(
            &mut tx,
            creditor_id,
            transfer_id,
            SignalKind::FinalizeTransfer,
        )
        .await?;

        let now = Utc::now();
        let mut entry = NewLogEntry::new(LogObjectType::Transfer);
        entry.debtor_id = Some(transfer.debtor_id);
        entry.transfer_id = Some(transfer_id);
        entry.object_update_id = Some(transfer.latest_update_id + 1);
        entry.is_deleted = true;
        append_log_entry(&mut tx, creditor_id, entry, now).await?;

        tx.commit().await?;

        info!(creditor_id, transfer_id = %transfer_id, "Transfer deleted");
        Ok(())
    }

    /// Fetch a transfer record.
    pub async fn get(
        &self,
        creditor_id: i64,
        transfer_id: Uuid,
    ) -> Result<Option<Transfer>, TransferError> {
        let mut conn = self.pool.acquire().await?;
        Ok(db::fetch_transfer(&mut conn, creditor_id, transfer_id).await?)
    }
}
