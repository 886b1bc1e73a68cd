//! Creditor-side account state
//!
//! An account mirrors one `(creditor, debtor)` relationship as the
//! debtor's accounting node reports it. The client declares the
//! account and its configuration; the remote node confirms, rejects
//! or purges it through inbound events.
//!
//! # State Machine
//!
//! ```text
//! PENDING → ACTIVE → PURGED
//!     \________________↗
//! ```
//!
//! `PENDING` means the configure command is queued or on the wire and
//! no snapshot has come back yet. A purged account keeps its row (the
//! retention scanner removes it later) but rejects every write; only
//! re-creating the account revives it.

pub(crate) mod db;
pub mod error;
pub mod events;
pub mod service;
pub mod types;

pub use error::AccountError;
pub use events::{apply_account_purged, apply_account_update, apply_config_rejected};
pub use service::AccountService;
pub use types::{Account, AccountStatus};
