//! Transfer FSM State Definitions
//!
//! Phase and outcome IDs are stored in PostgreSQL as SMALLINT.

use std::fmt;

/// Transfer FSM phases
///
/// IDs are spaced so intermediate phases can be added without
/// renumbering. Terminal phase: FINALIZED (40).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum TransferPhase {
    /// Initial phase - request validated, prepare command queued
    Initiated = 0,

    /// The prepare command was handed to the broker
    Sent = 10,

    /// The debtor's node has locked funds for this transfer
    Prepared = 20,

    /// The finalize command is queued or on the wire
    Finalizing = 30,

    /// Terminal: the debtor's node reported the outcome
    Finalized = 40,
}

impl TransferPhase {
    /// Check if this is a terminal phase (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferPhase::Finalized)
    }

    /// Get the numeric phase ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from PostgreSQL phase ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransferPhase::Initiated),
            10 => Some(TransferPhase::Sent),
            20 => Some(TransferPhase::Prepared),
            30 => Some(TransferPhase::Finalizing),
            40 => Some(TransferPhase::Finalized),
            _ => None,
        }
    }

    /// Get human-readable phase name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferPhase::Initiated => "INITIATED",
            TransferPhase::Sent => "SENT",
            TransferPhase::Prepared => "PREPARED",
            TransferPhase::Finalizing => "FINALIZING",
            TransferPhase::Finalized => "FINALIZED",
        }
    }

    /// Check whether `self → to` is a legal phase transition.
    ///
    /// `Initiated → Prepared` is legal because the remote node's
    /// prepared event can outrun the local sent-mark. `Finalized` is
    /// reachable from every non-terminal phase: a prepare can be
    /// refused before it was marked sent, and a deadline can cancel
    /// a transfer at any point.
    pub fn can_advance_to(&self, to: TransferPhase) -> bool {
        use TransferPhase::*;

        match to {
            Initiated => false,
            Sent => matches!(self, Initiated),
            Prepared => matches!(self, Initiated | Sent),
            Finalizing => matches!(self, Prepared),
            Finalized => !self.is_terminal(),
        }
    }
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TransferPhase {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TransferPhase::from_id(value).ok_or(())
    }
}

/// Outcome of a finalized transfer
///
/// Stays PENDING until the debtor's node reports the terminal word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum TransferOutcome {
    /// Not yet decided
    Pending = 0,

    /// The full amount was committed to the recipient
    Committed = 1,

    /// The transfer was dismissed; no funds moved
    Cancelled = 2,
}

impl TransferOutcome {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransferOutcome::Pending),
            1 => Some(TransferOutcome::Committed),
            2 => Some(TransferOutcome::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferOutcome::Pending => "PENDING",
            TransferOutcome::Committed => "COMMITTED",
            TransferOutcome::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_phases() {
        assert!(TransferPhase::Finalized.is_terminal());

        assert!(!TransferPhase::Initiated.is_terminal());
        assert!(!TransferPhase::Sent.is_terminal());
        assert!(!TransferPhase::Prepared.is_terminal());
        assert!(!TransferPhase::Finalizing.is_terminal());
    }

    #[test]
    fn test_phase_id_roundtrip() {
        let phases = [
            TransferPhase::Initiated,
            TransferPhase::Sent,
            TransferPhase::Prepared,
            TransferPhase::Finalizing,
            TransferPhase::Finalized,
        ];

        for phase in phases {
            let id = phase.id();
            let recovered = TransferPhase::from_id(id).unwrap();
            assert_eq!(phase, recovered);
        }
    }

    #[test]
    fn test_invalid_phase_id() {
        assert!(TransferPhase::from_id(999).is_none());
        assert!(TransferPhase::from_id(-1).is_none());
    }

    #[test]
    fn test_transition_table() {
        use TransferPhase::*;

        assert!(Initiated.can_advance_to(Sent));
        assert!(Initiated.can_advance_to(Prepared));
        assert!(Sent.can_advance_to(Prepared));
        assert!(Prepared.can_advance_to(Finalizing));

        assert!(Initiated.can_advance_to(Finalized));
        assert!(Sent.can_advance_to(Finalized));
        assert!(Prepared.can_advance_to(Finalized));
        assert!(Finalizing.can_advance_to(Finalized));

        assert!(!Sent.can_advance_to(Sent));
        assert!(!Prepared.can_advance_to(Sent));
        assert!(!Initiated.can_advance_to(Finalizing));
        assert!(!Sent.can_advance_to(Finalizing));
        assert!(!Finalized.can_advance_to(Finalized));
        assert!(!Finalized.can_advance_to(Prepared));
        assert!(!Prepared.can_advance_to(Initiated));
    }

    #[test]
    fn test_outcome_id_roundtrip() {
        for outcome in [
            TransferOutcome::Pending,
            TransferOutcome::Committed,
            TransferOutcome::Cancelled,
        ] {
            assert_eq!(TransferOutcome::from_id(outcome.id()), Some(outcome));
        }
        assert!(TransferOutcome::from_id(3).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(TransferPhase::Initiated.to_string(), "INITIATED");
        assert_eq!(TransferPhase::Finalized.to_string(), "FINALIZED");
        assert_eq!(TransferOutcome::Committed.to_string(), "COMMITTED");
    }
}
