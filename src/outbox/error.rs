use thiserror::Error;

use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum OutboxError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Payload encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Corrupt signal row {signal_id}: {reason}")]
    CorruptRow { signal_id: i64, reason: String },
}
