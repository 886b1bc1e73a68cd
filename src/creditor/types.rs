//! Creditor record and status flags

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::Row;

/// Set once the creditor is activated; never cleared afterwards.
pub const STATUS_IS_ACTIVATED_FLAG: i16 = 1;

/// Set when the creditor is deactivated. The activated bit stays set,
/// so a deactivated creditor has both bits.
pub const STATUS_IS_DEACTIVATED_FLAG: i16 = 2;

/// True for a creditor that accepts operations: activated and not
/// deactivated.
#[inline]
pub fn flags_are_active(status_flags: i16) -> bool {
    status_flags & STATUS_IS_ACTIVATED_FLAG != 0 && status_flags & STATUS_IS_DEACTIVATED_FLAG == 0
}

/// One row of `creditors_tb`.
#[derive(Debug, Clone, PartialEq)]
pub struct Creditor {
    pub creditor_id: i64,
    pub created_at: DateTime<Utc>,
    pub status_flags: i16,
    /// Day of deactivation; the row survives it by the configured
    /// grace period.
    pub deactivated_at: Option<NaiveDate>,
    /// Cursor for the creditor's log stream. Gap free: the next log
    /// entry gets `last_log_entry_id + 1`.
    pub last_log_entry_id: i64,
    /// Highest log entry id ever served to a client. Retention prunes
    /// only at or below it.
    pub log_read_cursor: i64,
    pub latest_update_id: i64,
    pub latest_update_ts: DateTime<Utc>,
}

impl Creditor {
    #[inline]
    pub fn is_activated(&self) -> bool {
        self.status_flags & STATUS_IS_ACTIVATED_FLAG != 0
    }

    #[inline]
    pub fn is_deactivated(&self) -> bool {
        self.status_flags & STATUS_IS_DEACTIVATED_FLAG != 0
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        flags_are_active(self.status_flags)
    }
}

pub(crate) fn row_to_creditor(row: &sqlx::postgres::PgRow) -> Result<Creditor, sqlx::Error> {
    Ok(Creditor {
        creditor_id: row.try_get("creditor_id")?,
        created_at: row.try_get("created_at")?,
        status_flags: row.try_get("status_flags")?,
        deactivated_at: row.try_get("deactivated_at")?,
        last_log_entry_id: row.try_get("last_log_entry_id")?,
        log_read_cursor: row.try_get("log_read_cursor")?,
        latest_update_id: row.try_get("latest_update_id")?,
        latest_update_ts: row.try_get("latest_update_ts")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_are_active() {
        assert!(!flags_are_active(0));
        assert!(flags_are_active(STATUS_IS_ACTIVATED_FLAG));
        assert!(!flags_are_active(
            STATUS_IS_ACTIVATED_FLAG | STATUS_IS_DEACTIVATED_FLAG
        ));
        // Deactivated without activated never occurs, but must still
        // read as inactive.
        assert!(!flags_are_active(STATUS_IS_DEACTIVATED_FLAG));
    }

    #[test]
    fn test_status_predicates() {
        let mut creditor = Creditor {
            creditor_id: 1,
            created_at: chrono::Utc::now(),
            status_flags: 0,
            deactivated_at: None,
            last_log_entry_id: 0,
            log_read_cursor: 0,
            latest_update_id: 1,
            latest_update_ts: chrono::Utc::now(),
        };
        assert!(!creditor.is_activated());
        assert!(!creditor.is_active());

        creditor.status_flags = STATUS_IS_ACTIVATED_FLAG;
        assert!(creditor.is_activated());
        assert!(!creditor.is_deactivated());
        assert!(creditor.is_active());

        creditor.status_flags |= STATUS_IS_DEACTIVATED_FLAG;
        assert!(creditor.is_activated());
        assert!(creditor.is_deactivated());
        assert!(!creditor.is_active());
    }
}
