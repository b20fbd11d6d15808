use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::info;

use crate::error::{Error, Result};

const DB_FILE_NAME: &str = "ark.db";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pubkey TEXT NOT NULL UNIQUE,
    is_active INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS columns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL REFERENCES accounts (id) ON DELETE CASCADE,
    kind INTEGER NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS settings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL UNIQUE,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ndk_events (
    id TEXT PRIMARY KEY,
    pubkey TEXT NOT NULL,
    content TEXT NOT NULL,
    kind INTEGER NOT NULL,
    createdAt INTEGER NOT NULL,
    relay TEXT,
    event TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS ndk_events_pubkey ON ndk_events (pubkey);
CREATE INDEX IF NOT EXISTS ndk_events_kind ON ndk_events (kind, pubkey);

CREATE TABLE IF NOT EXISTS ndk_eventtags (
    id TEXT PRIMARY KEY,
    eventId TEXT NOT NULL,
    tag TEXT NOT NULL,
    value TEXT NOT NULL,
    tagValue TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS ndk_eventtags_tag_value ON ndk_eventtags (tagValue);

CREATE TABLE IF NOT EXISTS ndk_users (
    pubkey TEXT PRIMARY KEY,
    profile TEXT NOT NULL,
    createdAt INTEGER NOT NULL
);
"#;

/// The local cache: one SQLite connection shared behind a mutex.
///
/// Typed accessors live next to the tables they touch (`events.rs`,
/// `profiles.rs`, `accounts.rs`, `columns.rs`, `settings.rs`).
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the cache inside `db_dir`.
    pub fn open<P: AsRef<Path>>(db_dir: P) -> Result<Self> {
        let db_dir = db_dir.as_ref();
        std::fs::create_dir_all(db_dir)
            .map_err(|e| Error::storage(format!("creating {}: {e}", db_dir.display())))?;

        let path = db_dir.join(DB_FILE_NAME);
        let conn = Connection::open(&path)?;
        info!(target: "ark::store", "opened cache at {}", path.display());
        Self::with_connection(conn)
    }

    /// A throwaway cache, used in tests.
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::storage("cache connection lock poisoned"))
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
