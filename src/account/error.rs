//! Account Error Types

use thiserror::Error;

use crate::outbox::OutboxError;

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    #[error("Creditor {0} does not exist or is not activated")]
    CreditorNotFound(i64),

    #[error("An account with debtor {0} already exists")]
    AccountExists(i64),

    #[error("No usable account with debtor {0}")]
    AccountNotFound(i64),

    #[error("Stale update id: expected {expected}, got {got}")]
    UpdateConflict { expected: i64, got: i64 },
}
