//! Inbound Event Processing
//!
//! Events from the accounting server arrive over NATS at least once
//! and in no guaranteed order. Every applier is idempotent, so the
//! dispatcher can simply hand each event to the matching applier and
//! let duplicates and stale deliveries fall out as quiet drops.
//!
//! ```text
//!   NATS ──► EventConsumer ──► dispatch ──► account/transfer appliers
//!                │                │
//!                │ malformed      │ outside creditor id range
//!                ▼                ▼
//!              log + drop       log + drop
//! ```
//!
//! An applier returning `Ok(false)` means the event changed nothing
//! (duplicate, stale token, unknown entity). Database errors bubble up
//! to the consumer, which logs them and moves on; periodic account
//! snapshots and the reconciliation sweeps re-converge whatever a lost
//! event would have changed.

use sqlx::PgPool;
use thiserror::Error;
use tracing::warn;

use crate::account;
use crate::account::AccountError;
use crate::config::AgentConfig;
use crate::messages::InboundEvent;
use crate::transfer;
use crate::transfer::TransferError;

pub mod consumer;

pub use consumer::EventConsumer;

#[derive(Error, Debug)]
pub enum InboundError {
    #[error("Account event failed: {0}")]
    Account(#[from] AccountError),

    #[error("Transfer event failed: {0}")]
    Transfer(#[from] TransferError),
}

/// Apply one inbound event. Returns whether anything changed.
///
/// Events addressed to creditor ids outside this agent's configured
/// range are dropped; they belong to another instance and applying
/// them here would split entity state across shards.
pub async fn dispatch(
    pool: &PgPool,
    agent: &AgentConfig,
    event: InboundEvent,
) -> Result<bool, InboundError> {
    if !agent.owns(event.creditor_id()) {
        warn!(
            creditor_id = event.creditor_id(),
            event = event.type_name(),
            "Event for a creditor outside this agent's range; dropped"
        );
        return Ok(false);
    }

    match event {
        InboundEvent::AccountUpdate {
            creditor_id,
            debtor_id,
            ts,
            seqnum,
            balance,
        } => Ok(account::apply_account_update(pool, creditor_id, debtor_id, ts, seqnum, balance)
            .await?),
        InboundEvent::AccountConfigFailed {
            creditor_id,
            debtor_id,
            config_ts,
            config_seqnum,
            rejection_code,
            ..
        } => Ok(account::apply_config_rejected(
            pool,
            creditor_id,
            debtor_id,
            config_ts,
            config_seqnum,
            &rejection_code,
        )
        .await?),
        InboundEvent::AccountPurged {
            creditor_id,
            debtor_id,
            ..
        } => Ok(account::apply_account_purged(pool, creditor_id, debtor_id).await?),
        InboundEvent::TransferPrepared {
            creditor_id,
            debtor_id,
            transfer_id,
            locked_amount,
            ..
        } => Ok(transfer::apply_transfer_prepared(
            pool,
            creditor_id,
            debtor_id,
            transfer_id,
            locked_amount,
        )
        .await?),
        InboundEvent::TransferPrepFailed {
            creditor_id,
            debtor_id,
            transfer_id,
            status_code,
            ..
        } => Ok(transfer::apply_prep_failed(
            pool,
            creditor_id,
            debtor_id,
            transfer_id,
            &status_code,
        )
        .await?),
        InboundEvent::TransferFinalized {
            creditor_id,
            debtor_id,
            transfer_id,
            outcome,
            error_code,
            ..
        } => Ok(transfer::apply_transfer_finalized(
            pool,
            creditor_id,
            debtor_id,
            transfer_id,
            outcome,
            error_code.as_deref(),
        )
        .await?),
    }
}
