//! SQLite persistence for the DHT: the local node id, known peers,
//! and stored values.
//!
//! Persisting peers lets a restarted node rejoin the network without a
//! fresh bootstrap; persisting values keeps this node a useful replica
//! across restarts.

use std::path::Path;
use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::debug;

use crate::id::NodeId;
use crate::record::now_unix;
use crate::routing::{NodeAddr, Peer};
use crate::Result;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS known_nodes (
    id        BLOB PRIMARY KEY,
    host      TEXT NOT NULL,
    port      INTEGER NOT NULL,
    last_seen INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS dht_values (
    key       BLOB PRIMARY KEY,
    value     BLOB NOT NULL,
    stored_at INTEGER NOT NULL,
    is_origin INTEGER NOT NULL DEFAULT 0
);
";

const NODE_ID_KEY: &str = "node_id";

/// A value row with its metadata.
#[derive(Debug, Clone)]
pub struct StoredValue {
    /// The DHT key.
    pub key: NodeId,
    /// The serialized record.
    pub value: Vec<u8>,
    /// When this node stored it, unix seconds.
    pub stored_at: u64,
    /// Whether this node is the record's originator.
    pub is_origin: bool,
}

/// Handle to the DHT database.
#[derive(Clone)]
pub struct DhtDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl DhtDatabase {
    /// Open (or create) the database at `path` and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
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
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute_batch(SCHEMA)?;
        debug!("dht database schema ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Load the persisted node id, creating and storing a random one on
    /// first start.
    ///
    /// # Errors
    ///
    /// Returns a storage error on failure.
    pub async fn load_or_create_node_id(&self) -> Result<NodeId> {
        let conn = self.conn.lock().await;
        let existing: Option<Vec<u8>> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![NODE_ID_KEY],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(bytes) = existing {
            return NodeId::from_slice(&bytes);
        }
        let id = NodeId::random();
        conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)",
            params![NODE_ID_KEY, id.as_bytes().as_slice()],
        )?;
        debug!(node_id = %id, "created persistent dht node id");
        Ok(id)
    }

    /// Insert or refresh a known peer.
    ///
    /// # Errors
    ///
    /// Returns a storage error on failure.
    pub async fn upsert_node(&self, id: &NodeId, addr: &NodeAddr, last_seen: u64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO known_nodes (id, host, port, last_seen)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                 host = excluded.host,
                 port = excluded.port,
                 last_seen = excluded.last_seen",
            params![id.as_bytes().as_slice(), addr.host, addr.port, last_seen as i64],
        )?;
        Ok(())
    }

    /// Delete a peer.
    ///
    /// # Errors
    ///
    /// Returns a storage error on failure.
    pub async fn remove_node(&self, id: &NodeId) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM known_nodes WHERE id = ?1",
            params![id.as_bytes().as_slice()],
        )?;
        Ok(())
    }

    /// Load peers heard from within `max_age` seconds.
    ///
    /// # Errors
    ///
    /// Returns a storage error on failure.
    pub async fn load_nodes(&self, max_age: u64) -> Result<Vec<Peer>> {
        let cutoff = now_unix().saturating_sub(max_age) as i64;
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, host, port, last_seen FROM known_nodes WHERE last_seen >= ?1",
        )?;
        let rows = stmt.query_map(params![cutoff], |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u16>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;
        let mut peers = Vec::new();
        for row in rows {
            let (id, host, port, last_seen) = row?;
            peers.push(Peer {
                id: NodeId::from_slice(&id)?,
                addr: NodeAddr::new(host, port),
                last_seen: last_seen as u64,
            });
        }
        Ok(peers)
    }

    /// Store (or refresh) a value.
    ///
    /// An origin flag, once set, survives refreshes by third parties.
    ///
    /// # Errors
    ///
    /// Returns a storage error on failure.
    pub async fn put_value(&self, key: &NodeId, value: &[u8], is_origin: bool) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO dht_values (key, value, stored_at, is_origin)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                 value = excluded.value,
                 stored_at = excluded.stored_at,
                 is_origin = MAX(dht_values.is_origin, excluded.is_origin)",
            params![
                key.as_bytes().as_slice(),
                value,
                now_unix() as i64,
                is_origin as i64
            ],
        )?;
        Ok(())
    }

    /// Fetch a value by key.
    ///
    /// # Errors
    ///
    /// Returns a storage error on failure.
    pub async fn get_value(&self, key: &NodeId) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT value FROM dht_values WHERE key = ?1",
            params![key.as_bytes().as_slice()],
            |r| r.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    /// All stored values.
    ///
    /// # Errors
    ///
    /// Returns a storage error on failure.
    pub async fn all_values(&self) -> Result<Vec<StoredValue>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT key, value, stored_at, is_origin FROM dht_values")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;
        let mut values = Vec::new();
        for row in rows {
            let (key, value, stored_at, is_origin) = row?;
            values.push(StoredValue {
                key: NodeId::from_slice(&key)?,
                value,
                stored_at: stored_at as u64,
                is_origin: is_origin != 0,
            });
        }
        Ok(values)
    }

    /// Values whose `stored_at` is older than `cutoff` (unix seconds).
    ///
    /// # Errors
    ///
    /// Returns a storage error on failure.
    pub async fn values_older_than(&self, cutoff: u64) -> Result<Vec<StoredValue>> {
        Ok(self
            .all_values()
            .await?
            .into_iter()
            .filter(|v| v.stored_at < cutoff)
            .collect())
    }

    /// Delete a value.
    ///
    /// # Errors
    ///
    /// Returns a storage error on failure.
    pub async fn delete_value(&self, key: &NodeId) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM dht_values WHERE key = ?1",
            params![key.as_bytes().as_slice()],
        )?;
        Ok(())
    }

    /// Backdate a value's `stored_at` (test hook for expiry behavior).
    #[doc(hidden)]
    pub async fn backdate_value(&self, key: &NodeId, seconds: u64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE dht_values SET stored_at = stored_at - ?2 WHERE key = ?1",
            params![key.as_bytes().as_slice(), seconds as i64],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_node_id_is_persistent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dht.db");

        let first = {
            let db = DhtDatabase::open(&path).unwrap();
            db.load_or_create_node_id().await.unwrap()
        };
        let second = {
            let db = DhtDatabase::open(&path).unwrap();
            db.load_or_create_node_id().await.unwrap()
        };
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_node_upsert_and_load() {
        let db = DhtDatabase::open_in_memory().unwrap();
        let id = NodeId::random();

        db.upsert_node(&id, &NodeAddr::new("127.0.0.1", 9001), 100)
            .await
            .unwrap();
        db.upsert_node(&id, &NodeAddr::new("127.0.0.1", 9002), now_unix())
            .await
            .unwrap();

        let nodes = db.load_nodes(60).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].addr.port, 9002);
    }

    #[tokio::test]
    async fn test_load_nodes_filters_by_age() {
        let db = DhtDatabase::open_in_memory().unwrap();
        db.upsert_node(&NodeId::random(), &NodeAddr::new("a", 1), 10)
            .await
            .unwrap();
        assert!(db.load_nodes(60).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_value_roundtrip_and_origin_sticky() {
        let db = DhtDatabase::open_in_memory().unwrap();
        let key = NodeId::random();

        db.put_value(&key, b"record-v1", true).await.unwrap();
        db.put_value(&key, b"record-v2", false).await.unwrap();

        assert_eq!(db.get_value(&key).await.unwrap().unwrap(), b"record-v2");
        let values = db.all_values().await.unwrap();
        assert_eq!(values.len(), 1);
        assert!(values[0].is_origin, "origin flag must survive refresh");
    }

    #[tokio::test]
    async fn test_values_older_than() {
        let db = DhtDatabase::open_in_memory().unwrap();
        let old = NodeId::random();
        let fresh = NodeId::random();
        db.put_value(&old, b"old", false).await.unwrap();
        db.put_value(&fresh, b"fresh", false).await.unwrap();
        db.backdate_value(&old, 100_000).await.unwrap();

        let expired = db.values_older_than(now_unix() - 50_000).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].key, old);
    }

    #[tokio::test]
    async fn test_delete_value() {
        let db = DhtDatabase::open_in_memory().unwrap();
        let key = NodeId::random();
        db.put_value(&key, b"v", false).await.unwrap();
        db.delete_value(&key).await.unwrap();
        assert!(db.get_value(&key).await.unwrap().is_none());
    }
}
