use rusqlite::{params, OptionalExtension, Row};
use tracing::info;

use super::db::unix_now;
use super::{Database, WriteOutcome};
use crate::error::Result;
use crate::models::Account;

const ACCOUNT_COLUMNS: &str = "id, pubkey, is_active, created_at";

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        pubkey: row.get(1)?,
        is_active: row.get::<_, i64>(2)? != 0,
        created_at: row.get::<_, i64>(3)? as u64,
        contacts: Vec::new(),
    })
}

impl Database {
    /// Make `pubkey` the single active account, creating it if needed.
    ///
    /// Runs in one transaction, so no reader sees zero or two active rows.
    pub fn activate_account(&self, pubkey: &str) -> Result<(Account, WriteOutcome)> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE accounts SET is_active = 0 WHERE is_active != 0 AND pubkey != ?1",
            params![pubkey],
        )?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO accounts (pubkey, is_active, created_at) VALUES (?1, 1, ?2)",
            params![pubkey, unix_now() as i64],
        )?;
        let outcome = if inserted > 0 {
            WriteOutcome::Inserted
        } else {
            tx.execute(
                "UPDATE accounts SET is_active = 1 WHERE pubkey = ?1",
                params![pubkey],
            )?;
            WriteOutcome::Updated
        };
        let account = tx.query_row(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE pubkey = ?1"),
            params![pubkey],
            account_from_row,
        )?;
        tx.commit()?;

        info!(target: "ark::store", account = account.id, ?outcome, "account activated");
        Ok((account, outcome))
    }

    pub fn active_account(&self) -> Result<Option<Account>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE is_active = 1 \
                     ORDER BY id DESC LIMIT 1"
                ),
                [],
                account_from_row,
            )
            .optional()?)
    }

    pub fn account_by_pubkey(&self, pubkey: &str) -> Result<Option<Account>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE pubkey = ?1"),
                params![pubkey],
                account_from_row,
            )
            .optional()?)
    }

    pub fn accounts(&self) -> Result<Vec<Account>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY id"
        ))?;
        let accounts = stmt
            .query_map([], account_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(accounts)
    }

    /// Flip the active flag off. The row stays.
    pub fn deactivate_account(&self, id: i64) -> Result<usize> {
        let conn = self.conn()?;
        Ok(conn.execute(
            "UPDATE accounts SET is_active = 0 WHERE id = ?1 AND is_active != 0",
            params![id],
        )?)
    }
}
