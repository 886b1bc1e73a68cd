//! Account persistence helpers

use sqlx::PgConnection;

use super::types::{Account, row_to_account};

const ACCOUNT_SELECT: &str = r#"
    SELECT creditor_id, debtor_id, created_at, status, current_balance,
           last_change_ts, last_change_seqnum, config_seqnum, config_data,
           config_error, last_config_ts, last_entry_id, ledger_read_cursor,
           latest_update_id, latest_update_ts
    FROM accounts_tb
    WHERE creditor_id = $1 AND debtor_id = $2
"#;

pub(crate) async fn fetch_account(
    conn: &mut PgConnection,
    creditor_id: i64,
    debtor_id: i64,
) -> Result<Option<Account>, sqlx::Error> {
    let row = sqlx::query(ACCOUNT_SELECT)
        .bind(creditor_id)
        .bind(debtor_id)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => Ok(Some(row_to_account(&row)?)),
        None => Ok(None),
    }
}

/// Fetch an account and hold its row lock for the transaction.
pub(crate) async fn lock_account(
    conn: &mut PgConnection,
    creditor_id: i64,
    debtor_id: i64,
) -> Result<Option<Account>, sqlx::Error> {
    let sql = format!("{ACCOUNT_SELECT} FOR UPDATE");
    let row = sqlx::query(&sql)
        .bind(creditor_id)
        .bind(debtor_id)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => Ok(Some(row_to_account(&row)?)),
        None => Ok(None),
    }
}
