//! Shared SQLite connection and schema management.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::Connection;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::Result;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS contacts (
    identifier     TEXT PRIMARY KEY,
    name           TEXT,
    addr           TEXT NOT NULL,
    kem_public_key BLOB NOT NULL,
    sig_public_key BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS inbox (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    sender_id    TEXT NOT NULL,
    recipient_id TEXT,
    content      BLOB NOT NULL,
    ts           INTEGER NOT NULL,
    received_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS forward_queue (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    recipient_identifier TEXT NOT NULL,
    message              TEXT NOT NULL,
    signature            BLOB NOT NULL UNIQUE,
    created_at           INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_forward_recipient
    ON forward_queue (recipient_identifier);

CREATE TABLE IF NOT EXISTS seen_history (
    signature BLOB PRIMARY KEY,
    seen_at   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_seen_at ON seen_history (seen_at);
";

/// Handle to the node's message-plane database.
///
/// Cheap to clone; all clones share one connection behind an async
/// mutex.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database at `path` and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (tests and ephemeral nodes).
    ///
    /// # Errors
    ///
    /// Returns an error if the schema fails to apply.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // journal_mode returns a row, so it cannot go through execute_batch.
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute_batch(SCHEMA)?;
        debug!("message database schema ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Lock the underlying connection for one logical operation.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

/// Current unix time in seconds.
pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before unix epoch")
        .as_secs() as i64
}
