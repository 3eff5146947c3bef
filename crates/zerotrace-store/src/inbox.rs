//! The inbox: decrypted messages delivered to this node.
//!
//! Rows are appended in receive order by the single inbound handler, so
//! per-recipient ordering follows receive time.

use rusqlite::params;

use zerotrace_identity::Identifier;

use crate::db::{now_unix, Database};
use crate::Result;

/// A delivered plaintext message.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    /// Row id (receive order).
    pub id: i64,
    /// Verified sender identifier.
    pub sender_id: String,
    /// Recipient identifier (set for self-addressed copies).
    pub recipient_id: Option<String>,
    /// The message body.
    pub content: Vec<u8>,
    /// Sender-claimed creation time, unix seconds.
    pub ts: i64,
    /// Local receive time, unix seconds.
    pub received_at: i64,
}

/// Store of delivered messages.
#[derive(Clone)]
pub struct InboxStore {
    db: Database,
}

impl InboxStore {
    /// Create a store over the shared database.
    pub fn new(db: &Database) -> Self {
        Self { db: db.clone() }
    }

    /// Append a delivered message.
    ///
    /// # Errors
    ///
    /// Returns a database error on failure.
    pub async fn add(
        &self,
        sender_id: &Identifier,
        recipient_id: Option<&Identifier>,
        content: &[u8],
        ts: u64,
    ) -> Result<i64> {
        let conn = self.db.lock().await;
        conn.execute(
            "INSERT INTO inbox (sender_id, recipient_id, content, ts, received_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                sender_id.as_str(),
                recipient_id.map(|r| r.as_str()),
                content,
                ts as i64,
                now_unix(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// The most recent `limit` messages, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a database error on failure.
    pub async fn recent(&self, limit: usize) -> Result<Vec<StoredMessage>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, sender_id, recipient_id, content, ts, received_at
             FROM (SELECT * FROM inbox ORDER BY id DESC LIMIT ?1)
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(StoredMessage {
                id: row.get(0)?,
                sender_id: row.get(1)?,
                recipient_id: row.get(2)?,
                content: row.get(3)?,
                ts: row.get(4)?,
                received_at: row.get(5)?,
            })
        })?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Number of stored messages.
    ///
    /// # Errors
    ///
    /// Returns a database error on failure.
    pub async fn count(&self) -> Result<usize> {
        let conn = self.db.lock().await;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM inbox", [], |r| r.get(0))?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(tag: &[u8]) -> Identifier {
        Identifier::from_public_keys(tag, tag)
    }

    #[tokio::test]
    async fn test_add_and_recent_preserve_order() {
        let db = Database::open_in_memory().unwrap();
        let inbox = InboxStore::new(&db);
        let alice = id(b"alice");

        for n in 0..5u8 {
            inbox.add(&alice, None, &[n], 100 + n as u64).await.unwrap();
        }

        let messages = inbox.recent(3).await.unwrap();
        assert_eq!(messages.len(), 3);
        // Oldest-first within the most recent three.
        assert_eq!(messages[0].content, vec![2]);
        assert_eq!(messages[2].content, vec![4]);
        assert!(messages[0].id < messages[2].id);
    }

    #[tokio::test]
    async fn test_count() {
        let db = Database::open_in_memory().unwrap();
        let inbox = InboxStore::new(&db);
        assert_eq!(inbox.count().await.unwrap(), 0);
        inbox.add(&id(b"a"), None, b"x", 1).await.unwrap();
        assert_eq!(inbox.count().await.unwrap(), 1);
    }
}
