//! creditors-agent - Creditor-facing node of a distributed accounting network
//!
//! The agent keeps the authoritative client-side record of creditors,
//! their accounts with debtors, and their outgoing transfers, and talks
//! to the debtors' accounting nodes exclusively through asynchronous
//! messages.
//!
//! # Modules
//!
//! - [`core_types`] - Serial-number arithmetic for wire sequence numbers
//! - [`messages`] - Outbound command and inbound event payloads
//! - [`creditor`] - Creditor registry and per-creditor log stream
//! - [`account`] - Account lifecycle, configuration, balance snapshots
//! - [`transfer`] - Outgoing transfer state machine
//! - [`ledger`] - Gap-free ledger/log entry materialization
//! - [`outbox`] - Transactional outbox and the signal flusher
//! - [`inbound`] - Event consumer and idempotent dispatch
//! - [`scanner`] - Periodic reconciliation sweeps
//! - [`transport`] - Broker abstraction (NATS)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   commands   ┌──────────┐   publish   ┌──────────┐
//! │ services │─────────────▶│  outbox  │────────────▶│  broker  │
//! │ (HTTP-   │  (same tx as │ (flusher)│             │  (NATS)  │
//! │  facing) │   the state) └──────────┘             └────┬─────┘
//! └──────────┘                                            │ events
//!      ▲                                                  ▼
//!      │ log/ledger                ┌──────────┐   ┌──────────────┐
//!      └───────────────────────────│materialize│◀──│   inbound    │
//!                                  └──────────┘   │  dispatcher  │
//!                                       ▲         └──────────────┘
//!                                       │
//!                                 ┌──────────┐
//!                                 │ scanners │  (deadlines, retries,
//!                                 └──────────┘   retention)
//! ```

// Core wire arithmetic - must be first!
pub mod core_types;

// Ambient stack
pub mod config;
pub mod db;
pub mod logging;

// Domain
pub mod account;
pub mod creditor;
pub mod ledger;
pub mod messages;
pub mod transfer;

// Plumbing
pub mod inbound;
pub mod outbox;
pub mod scanner;
pub mod transport;

// Convenient re-exports at crate root
pub use account::{Account, AccountError, AccountService, AccountStatus};
pub use core_types::Seqnum;
pub use creditor::{Creditor, CreditorError, CreditorService};
pub use ledger::{LedgerEntry, LogEntry, LogObjectType};
pub use messages::{FinalizationOutcome, InboundEvent, OutboundMessage};
pub use outbox::{OutboxError, PendingSignal, SignalFlusher, SignalKind};
pub use transfer::{Transfer, TransferError, TransferOutcome, TransferPhase, TransferService};
pub use transport::{MessageTransport, NatsTransport, TransportError};
