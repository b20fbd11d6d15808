use rusqlite::{params, OptionalExtension, Row};

use super::db::unix_now;
use super::Database;
use crate::error::Result;
use crate::models::{Column, ColumnKind, NewColumn};

const COLUMN_COLUMNS: &str = "id, account_id, kind, title, content, created_at";

fn column_from_row(row: &Row<'_>) -> rusqlite::Result<Column> {
    Ok(Column {
        id: row.get(0)?,
        account_id: row.get(1)?,
        kind: ColumnKind::from(row.get::<_, i64>(2)?),
        title: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get::<_, i64>(5)? as u64,
    })
}

impl Database {
    /// Fails with `ReferentialIntegrity` for an unknown account.
    pub fn create_column(&self, account_id: i64, column: &NewColumn) -> Result<Column> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO columns (account_id, kind, title, content, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                account_id,
                column.kind.code(),
                column.title,
                column.content,
                unix_now() as i64
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(conn.query_row(
            &format!("SELECT {COLUMN_COLUMNS} FROM columns WHERE id = ?1"),
            params![id],
            column_from_row,
        )?)
    }

    pub fn column(&self, id: i64) -> Result<Option<Column>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("SELECT {COLUMN_COLUMNS} FROM columns WHERE id = ?1"),
                params![id],
                column_from_row,
            )
            .optional()?)
    }

    /// An account's columns, newest first.
    pub fn columns(&self, account_id: i64) -> Result<Vec<Column>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMN_COLUMNS} FROM columns WHERE account_id = ?1 \
             ORDER BY created_at DESC, id DESC"
        ))?;
        let columns = stmt
            .query_map(params![account_id], column_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(columns)
    }

    pub fn update_column(&self, id: i64, title: &str, content: &str) -> Result<usize> {
        let conn = self.conn()?;
        Ok(conn.execute(
            "UPDATE columns SET title = ?1, content = ?2 WHERE id = ?3",
            params![title, content, id],
        )?)
    }

    pub fn remove_column(&self, id: i64) -> Result<usize> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM columns WHERE id = ?1", params![id])?)
    }
}
