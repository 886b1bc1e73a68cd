//! Account record types and row mapping

use chrono::{DateTime, Utc};
use sqlx::Row;
use std::fmt;

/// Account lifecycle states
///
/// IDs are stored in PostgreSQL as SMALLINT and spaced so
/// intermediate states can be added without renumbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum AccountStatus {
    /// Declared locally; no snapshot from the debtor's node yet
    Pending = 0,

    /// Confirmed by the debtor's node
    Active = 10,

    /// Deleted on the debtor's node; local row awaits cleanup
    Purged = 20,
}

impl AccountStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(AccountStatus::Pending),
            10 => Some(AccountStatus::Active),
            20 => Some(AccountStatus::Purged),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Pending => "PENDING",
            AccountStatus::Active => "ACTIVE",
            AccountStatus::Purged => "PURGED",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for AccountStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        AccountStatus::from_id(value).ok_or(())
    }
}

/// An account row as stored in `accounts_tb`.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub creditor_id: i64,
    pub debtor_id: i64,
    pub created_at: DateTime<Utc>,
    pub status: AccountStatus,
    /// Running balance; kept equal to the newest ledger entry's principal.
    pub current_balance: i64,
    /// Ordering token of the newest applied account snapshot.
    pub last_change_ts: DateTime<Utc>,
    pub last_change_seqnum: i32,
    /// Token of the newest configure command sent for this account.
    pub config_seqnum: i32,
    pub config_data: String,
    /// Rejection code reported by the debtor's node, if any.
    pub config_error: Option<String>,
    pub last_config_ts: DateTime<Utc>,
    /// Ledger entry id cursor; gap-free per account.
    pub last_entry_id: i64,
    /// Highest ledger entry id a client has paged past.
    pub ledger_read_cursor: i64,
    pub latest_update_id: i64,
    pub latest_update_ts: DateTime<Utc>,
}

pub(crate) fn row_to_account(row: &sqlx::postgres::PgRow) -> Result<Account, sqlx::Error> {
    let status_id: i16 = row.try_get("status")?;
    let status = AccountStatus::from_id(status_id).ok_or_else(|| sqlx::Error::ColumnDecode {
        index: "status".into(),
        source: format!("invalid account status id: {}", status_id).into(),
    })?;

    Ok(Account {
        creditor_id: row.try_get("creditor_id")?,
        debtor_id: row.try_get("debtor_id")?,
        created_at: row.try_get("created_at")?,
        status,
        current_balance: row.try_get("current_balance")?,
        last_change_ts: row.try_get("last_change_ts")?,
        last_change_seqnum: row.try_get("last_change_seqnum")?,
        config_seqnum: row.try_get("config_seqnum")?,
        config_data: row.try_get("config_data")?,
        config_error: row.try_get("config_error")?,
        last_config_ts: row.try_get("last_config_ts")?,
        last_entry_id: row.try_get("last_entry_id")?,
        ledger_read_cursor: row.try_get("ledger_read_cursor")?,
        latest_update_id: row.try_get("latest_update_id")?,
        latest_update_ts: row.try_get("latest_update_ts")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_id_roundtrip() {
        for status in [
            AccountStatus::Pending,
            AccountStatus::Active,
            AccountStatus::Purged,
        ] {
            assert_eq!(AccountStatus::from_id(status.id()), Some(status));
        }
        assert!(AccountStatus::from_id(5).is_none());
        assert!(AccountStatus::from_id(-1).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(AccountStatus::Pending.to_string(), "PENDING");
        assert_eq!(AccountStatus::Purged.to_string(), "PURGED");
    }
}
