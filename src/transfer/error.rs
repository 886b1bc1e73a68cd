//! Transfer Error Types

use thiserror::Error;
use uuid::Uuid;

use super::state::TransferPhase;
use crate::outbox::OutboxError;

/// Transfer error types
///
/// Raised for client requests only; inbound events never produce
/// phase errors (stale events are discarded quietly).
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    #[error("Creditor {0} does not exist or is not activated")]
    CreditorNotFound(i64),

    #[error("No usable account with debtor {0}")]
    AccountNotFound(i64),

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Transfer {0} already exists with different attributes")]
    TransferExists(Uuid),

    #[error("Transfer {0} not found")]
    TransferNotFound(Uuid),

    #[error("Transfer {transfer_id} is {phase}; operation requires {required}")]
    WrongPhase {
        transfer_id: Uuid,
        phase: TransferPhase,
        required: &'static str,
    },
}
