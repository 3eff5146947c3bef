//! The forward queue: wire messages held for recipients we know.
//!
//! Rows are unique per signature, so re-received copies of a message
//! never queue twice. Recipients drain their backlog through the pull
//! endpoint; the drain deletes and returns in one transaction.

use rusqlite::params;
use tracing::debug;

use zerotrace_proto::WireMessage;

use crate::db::{now_unix, Database};
use crate::{Result, StoreError};

/// Store-and-forward queue of undelivered wire messages.
#[derive(Clone)]
pub struct ForwardQueue {
    db: Database,
}

impl ForwardQueue {
    /// Create a store over the shared database.
    pub fn new(db: &Database) -> Self {
        Self { db: db.clone() }
    }

    /// Queue a wire message for its recipient.
    ///
    /// Returns `false` if a message with the same signature is already
    /// queued.
    ///
    /// # Errors
    ///
    /// Returns a database or serialization error on failure.
    pub async fn push(&self, wire: &WireMessage) -> Result<bool> {
        let body = serde_json::to_string(wire)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let conn = self.db.lock().await;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO forward_queue
                 (recipient_identifier, message, signature, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                wire.recipient_identifier,
                body,
                wire.signature,
                now_unix(),
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Atomically remove and return up to `limit` queued messages for
    /// `recipient`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a database error on failure; the transaction rolls back
    /// and the rows stay queued.
    pub async fn drain_for(&self, recipient: &str, limit: usize) -> Result<Vec<WireMessage>> {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;

        let mut drained = Vec::new();
        {
            let mut stmt = tx.prepare(
                "SELECT id, message FROM forward_queue
                 WHERE recipient_identifier = ?1
                 ORDER BY id ASC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![recipient, limit as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut ids = Vec::new();
            for row in rows {
                let (id, body) = row?;
                let wire: WireMessage = serde_json::from_str(&body)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                ids.push(id);
                drained.push(wire);
            }

            let mut delete = tx.prepare("DELETE FROM forward_queue WHERE id = ?1")?;
            for id in ids {
                delete.execute(params![id])?;
            }
        }
        tx.commit()?;

        if !drained.is_empty() {
            debug!(recipient, count = drained.len(), "drained forward queue");
        }
        Ok(drained)
    }

    /// Number of queued messages for a recipient.
    ///
    /// # Errors
    ///
    /// Returns a database error on failure.
    pub async fn count_for(&self, recipient: &str) -> Result<usize> {
        let conn = self.db.lock().await;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM forward_queue WHERE recipient_identifier = ?1",
            params![recipient],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }

    /// Total queued messages across recipients.
    ///
    /// # Errors
    ///
    /// Returns a database error on failure.
    pub async fn len(&self) -> Result<usize> {
        let conn = self.db.lock().await;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM forward_queue", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    /// Whether the queue is empty.
    ///
    /// # Errors
    ///
    /// Returns a database error on failure.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerotrace_crypto::{mldsa, mlkem, symmetric};

    fn wire(recipient: &str, sig_seed: u8) -> WireMessage {
        WireMessage {
            current_node_identifier: "node".into(),
            recipient_identifier: recipient.into(),
            shared_secret_ciphertext: vec![0u8; mlkem::CIPHERTEXT_SIZE],
            message_ciphertext: vec![1u8; 48],
            nonce: vec![0u8; symmetric::NONCE_SIZE],
            signature: vec![sig_seed; mldsa::SIGNATURE_SIZE],
            ttl: 9,
            max_recursive_contact: 4,
        }
    }

    #[tokio::test]
    async fn test_push_and_drain() {
        let db = Database::open_in_memory().unwrap();
        let queue = ForwardQueue::new(&db);

        assert!(queue.push(&wire("bob", 1)).await.unwrap());
        assert!(queue.push(&wire("bob", 2)).await.unwrap());
        assert!(queue.push(&wire("carol", 3)).await.unwrap());

        let drained = queue.drain_for("bob", 10).await.unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].signature[0], 1);
        assert_eq!(drained[1].signature[0], 2);

        // The drain removed bob's rows but left carol's.
        assert_eq!(queue.count_for("bob").await.unwrap(), 0);
        assert_eq!(queue.count_for("carol").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_signature_ignored() {
        let db = Database::open_in_memory().unwrap();
        let queue = ForwardQueue::new(&db);

        assert!(queue.push(&wire("bob", 1)).await.unwrap());
        assert!(!queue.push(&wire("bob", 1)).await.unwrap());
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_drain_respects_limit() {
        let db = Database::open_in_memory().unwrap();
        let queue = ForwardQueue::new(&db);

        for n in 0..5 {
            queue.push(&wire("bob", n)).await.unwrap();
        }
        let first = queue.drain_for("bob", 3).await.unwrap();
        assert_eq!(first.len(), 3);
        let rest = queue.drain_for("bob", 10).await.unwrap();
        assert_eq!(rest.len(), 2);
        // Oldest-first across both drains.
        assert_eq!(first[0].signature[0], 0);
        assert_eq!(rest[1].signature[0], 4);
    }

    #[tokio::test]
    async fn test_drain_empty_is_empty() {
        let db = Database::open_in_memory().unwrap();
        let queue = ForwardQueue::new(&db);
        assert!(queue.drain_for("nobody", 10).await.unwrap().is_empty());
        assert!(queue.is_empty().await.unwrap());
    }
}
