//! The seen set: signature bytes of every message this node has
//! handled, used to drop duplicates.
//!
//! Entries persist across restarts and expire after 24 hours via a
//! background sweep, after which a genuinely re-received message is
//! processed again.

use std::time::Duration;

use rusqlite::params;
use tracing::debug;

use crate::db::{now_unix, Database};
use crate::Result;

/// How long a signature stays in the seen set.
pub const SEEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Persistent duplicate-suppression set keyed by signature bytes.
#[derive(Clone)]
pub struct SeenStore {
    db: Database,
}

impl SeenStore {
    /// Create a store over the shared database.
    pub fn new(db: &Database) -> Self {
        Self { db: db.clone() }
    }

    /// Record a signature if it is new.
    ///
    /// Returns `true` when the signature was not present (the caller
    /// should process the message) and `false` for duplicates. The
    /// insert commits before the caller schedules any fanout, so a
    /// forwarded copy looping straight back is already filtered.
    ///
    /// # Errors
    ///
    /// Returns a database error on failure.
    pub async fn insert_if_new(&self, signature: &[u8]) -> Result<bool> {
        let conn = self.db.lock().await;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO seen_history (signature, seen_at) VALUES (?1, ?2)",
            params![signature, now_unix()],
        )?;
        Ok(inserted > 0)
    }

    /// Whether a signature is currently in the set.
    ///
    /// # Errors
    ///
    /// Returns a database error on failure.
    pub async fn contains(&self, signature: &[u8]) -> Result<bool> {
        let conn = self.db.lock().await;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM seen_history WHERE signature = ?1",
            params![signature],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    /// Delete entries older than [`SEEN_TTL`]. Returns how many expired.
    ///
    /// # Errors
    ///
    /// Returns a database error on failure.
    pub async fn sweep(&self) -> Result<usize> {
        self.sweep_older_than(SEEN_TTL).await
    }

    /// Delete entries older than `ttl` (test hook for expiry behavior).
    ///
    /// # Errors
    ///
    /// Returns a database error on failure.
    pub async fn sweep_older_than(&self, ttl: Duration) -> Result<usize> {
        let cutoff = now_unix() - ttl.as_secs() as i64;
        let conn = self.db.lock().await;
        let removed = conn.execute(
            "DELETE FROM seen_history WHERE seen_at < ?1",
            params![cutoff],
        )?;
        if removed > 0 {
            debug!(removed, "expired seen-set entries");
        }
        Ok(removed)
    }

    /// Number of live entries.
    ///
    /// # Errors
    ///
    /// Returns a database error on failure.
    pub async fn len(&self) -> Result<usize> {
        let conn = self.db.lock().await;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM seen_history", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    /// Whether the set is empty.
    ///
    /// # Errors
    ///
    /// Returns a database error on failure.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Backdate an entry's timestamp (test hook for expiry behavior).
    #[doc(hidden)]
    pub async fn backdate(&self, signature: &[u8], seconds: i64) -> Result<()> {
        let conn = self.db.lock().await;
        conn.execute(
            "UPDATE seen_history SET seen_at = seen_at - ?2 WHERE signature = ?1",
            params![signature, seconds],
        )?;
        Ok(())
    }
}
