//! Creditor Registry Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CreditorError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Creditor {0} already exists")]
    CreditorExists(i64),

    #[error("Creditor {0} not found")]
    CreditorNotFound(i64),

    #[error("Creditor {0} still has accounts")]
    AccountsStillExist(i64),

    #[error("Stale update id: expected {expected}, got {got}")]
    UpdateConflict { expected: i64, got: i64 },
}
