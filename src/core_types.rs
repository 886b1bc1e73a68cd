//! Core types used throughout the system
//!
//! These are fundamental type aliases used by all modules.
//! They provide semantic meaning and enable future type evolution.

/// Creditor ID - globally unique identifier for a creditor.
///
/// # Constraints:
/// - **Immutable**: Once assigned, NEVER changes
/// - **Sharded**: Each agent instance owns a contiguous
///   `[min_creditor_id, max_creditor_id]` range; events outside the
///   range are dropped at the door
pub type CreditorId = i64;

/// Debtor ID - identifies the currency/issuer an account is held in.
///
/// # Usage:
/// - `(CreditorId, DebtorId)` is the primary key of an account
pub type DebtorId = i64;

/// Ledger entry sequence number, strictly increasing per account,
/// gap-free, starting at 1. Doubles as the pagination cursor.
pub type EntryId = i64;

/// Optimistic-concurrency token carried by externally updatable objects.
/// A client update must present `latest_update_id + 1` to be applied.
pub type UpdateId = i64;

/// 32-bit sequence number with serial-number (wraparound) ordering.
///
/// Remote accounting nodes may run for years and wrap their change
/// counters; `0x7fffffff` is followed by `-0x80000000`. Comparison
/// therefore uses wrapping distance: `a` is newer than `b` iff the
/// wrapped difference `a - b` lies in `(0, 2^31)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seqnum(pub i32);

impl Seqnum {
    /// The seqnum that directly follows this one.
    #[inline]
    pub fn next(self) -> Seqnum {
        Seqnum(self.0.wrapping_add(1))
    }

    /// Serial-number "strictly greater" check.
    ///
    /// Exactly-opposite values (distance 2^31) are NOT newer, so two
    /// nodes disagreeing by half the space never both win.
    #[inline]
    pub fn is_newer_than(self, other: Seqnum) -> bool {
        self.0.wrapping_sub(other.0) > 0
    }
}

impl std::fmt::Display for Seqnum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
