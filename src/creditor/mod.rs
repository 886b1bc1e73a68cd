//! Creditor Registry
//!
//! A creditor goes through a two step signup: `register` reserves the
//! id, `activate` turns it into a live creditor that may hold accounts
//! and issue transfers. Deactivation is one way; the row lingers until
//! the retention sweep removes it, and the id cannot be reused before
//! that.
//!
//! ```text
//!   register ──► (reserved) ──► activate ──► ACTIVE ──► deactivate ──► DEACTIVATED
//!                    │                                                     │
//!                    └──────────── retention sweep deletes ◄───────────────┘
//! ```
//!
//! Every creditor row also owns the cursor for its log stream
//! (`last_log_entry_id`), so any transaction appending a log entry
//! takes the creditor row lock last.

pub mod error;
pub mod service;
pub mod types;

pub use error::CreditorError;
pub use service::CreditorService;
pub use types::{
    Creditor, STATUS_IS_ACTIVATED_FLAG, STATUS_IS_DEACTIVATED_FLAG, flags_are_active,
};
