//! Reconciliation Scanners
//!
//! Four independent periodic sweeps keep the store converging when
//! messages get lost or peers go quiet. Each sweep is idempotent and
//! safe to run concurrently with the event consumer and with replicas
//! of itself: candidates are picked by staleness, then re-verified
//! under the row lock before anything changes.
//!
//! | sweep     | acts on                                              |
//! |-----------|------------------------------------------------------|
//! | accounts  | PENDING accounts with an unacknowledged configuration|
//! | transfers | transfers stuck past their deadline; old finalized   |
//! | retention | log/ledger entries past retention; purged accounts   |
//! | creditors | deactivated or never-activated creditors past grace  |
//!
//! Every sweep runs over a bounded page of rows per cycle, so one tick
//! never does unbounded work.

pub mod accounts;
pub mod creditors;
pub mod retention;
pub mod transfers;

pub use accounts::AccountScanner;
pub use creditors::CreditorScanner;
pub use retention::RetentionScanner;
pub use transfers::TransferScanner;
