//! Messages - wire schema for broker traffic
//!
//! Everything crossing the broker is JSON, tagged with a `type` field.
//!
//! # Message Flow
//!
//! ```text
//! procedures → pending_signals_tb → Flusher → OutboundMessage → broker
//! broker → EventConsumer → InboundEvent → dispatch → appliers
//! ```
//!
//! Outbound commands carry the identifying data the remote accounting
//! node needs for ITS dedup: configure commands a `(ts, seqnum)` token,
//! transfer commands the creditor-chosen transfer id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================
// OUTBOUND COMMANDS (agent → accounting node)
// ============================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    /// Declare or update the configuration of an account.
    ConfigureAccount {
        creditor_id: i64,
        debtor_id: i64,
        /// Token the remote node orders configure commands by.
        ts: DateTime<Utc>,
        seqnum: i32,
        config_data: String,
    },
    /// Ask the debtor's node to lock funds for an outgoing transfer.
    PrepareTransfer {
        creditor_id: i64,
        debtor_id: i64,
        transfer_id: Uuid,
        amount: i64,
        recipient: String,
        /// The remote node cancels the lock itself past this instant.
        deadline: DateTime<Utc>,
        ts: DateTime<Utc>,
    },
    /// Resolve a prepared transfer: the full amount commits it,
    /// zero dismisses it.
    FinalizeTransfer {
        creditor_id: i64,
        debtor_id: i64,
        transfer_id: Uuid,
        committed_amount: i64,
        ts: DateTime<Utc>,
    },
}

impl OutboundMessage {
    /// Kind name used as the subject suffix on the broker.
    pub fn kind_name(&self) -> &'static str {
        match self {
            OutboundMessage::ConfigureAccount { .. } => "configure_account",
            OutboundMessage::PrepareTransfer { .. } => "prepare_transfer",
            OutboundMessage::FinalizeTransfer { .. } => "finalize_transfer",
        }
    }
}

// ============================================================
// INBOUND EVENTS (accounting node → agent)
// ============================================================

/// Finalization outcome reported by the accounting node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalizationOutcome {
    Committed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundEvent {
    /// Periodic/state-change snapshot of the server-side account.
    /// `(ts, seqnum)` is the ordering token; stale tokens are dropped.
    AccountUpdate {
        creditor_id: i64,
        debtor_id: i64,
        ts: DateTime<Utc>,
        seqnum: i32,
        balance: i64,
    },
    /// A configure command was rejected; echoes the command's token.
    AccountConfigFailed {
        creditor_id: i64,
        debtor_id: i64,
        config_ts: DateTime<Utc>,
        config_seqnum: i32,
        rejection_code: String,
        ts: DateTime<Utc>,
    },
    /// The server-side account was deleted.
    AccountPurged {
        creditor_id: i64,
        debtor_id: i64,
        ts: DateTime<Utc>,
    },
    /// Funds are locked for the transfer.
    TransferPrepared {
        creditor_id: i64,
        debtor_id: i64,
        transfer_id: Uuid,
        locked_amount: i64,
        ts: DateTime<Utc>,
    },
    /// The prepare request was refused; no funds are locked.
    TransferPrepFailed {
        creditor_id: i64,
        debtor_id: i64,
        transfer_id: Uuid,
        status_code: String,
        ts: DateTime<Utc>,
    },
    /// Terminal word on a transfer.
    TransferFinalized {
        creditor_id: i64,
        debtor_id: i64,
        transfer_id: Uuid,
        outcome: FinalizationOutcome,
        error_code: Option<String>,
        ts: DateTime<Utc>,
    },
}

impl InboundEvent {
    /// Creditor the event is addressed to, for shard-range filtering.
    pub fn creditor_id(&self) -> i64 {
        match self {
            InboundEvent::AccountUpdate { creditor_id, .. }
            | InboundEvent::AccountConfigFailed { creditor_id, .. }
            | InboundEvent::AccountPurged { creditor_id, .. }
            | InboundEvent::TransferPrepared { creditor_id, .. }
            | InboundEvent::TransferPrepFailed { creditor_id, .. }
            | InboundEvent::TransferFinalized { creditor_id, .. } => *creditor_id,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            InboundEvent::AccountUpdate { .. } => "AccountUpdate",
            InboundEvent::AccountConfigFailed { .. } => "AccountConfigFailed",
            InboundEvent::AccountPurged { .. } => "AccountPurged",
            InboundEvent::TransferPrepared { .. } => "TransferPrepared",
            InboundEvent::TransferPrepFailed { .. } => "TransferPrepFailed",
            InboundEvent::TransferFinalized { .. } => "TransferFinalized",
        }
    }
}
