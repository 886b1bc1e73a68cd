//! Outgoing Transfer FSM
//!
//! Tracks direct transfers from a creditor's account through the
//! two-phase protocol spoken with the debtor's accounting node.
//!
//! # State Machine
//!
//! ```text
//! INITIATED → SENT → PREPARED → FINALIZING → FINALIZED
//!     |         |        |                       ↑
//!     +---------+--------+-----------------------+
//! ```
//!
//! `SENT` is a local bookkeeping mark (the prepare command left the
//! outbox). The remote node's events may outrun it, so `PREPARED` is
//! reachable from `INITIATED` too, and every non-terminal phase can
//! jump straight to `FINALIZED` when the remote node refuses the
//! prepare or reports the final outcome.
//!
//! # Safety Invariants
//!
//! 1. **Outbox-Before-Wire**: commands are recorded in `pending_signals_tb`
//!    in the same transaction as the phase change; the flusher delivers them.
//! 2. **Events Advance, Never Error**: stale or duplicate inbound events are
//!    discarded quietly; only client requests get phase errors.
//! 3. **Ledger on Commit**: a committed transfer debits the account ledger
//!    exactly once, in the same transaction as the phase change.

pub(crate) mod db;
pub mod error;
pub mod events;
pub mod service;
pub mod state;
pub mod types;

pub use error::TransferError;
pub use events::{apply_prep_failed, apply_transfer_finalized, apply_transfer_prepared};
pub use service::TransferService;
pub use state::{TransferOutcome, TransferPhase};
pub use types::{Transfer, TransferRequest};
