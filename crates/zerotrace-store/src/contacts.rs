//! The contact table: peers known by identifier.
//!
//! Inserting a contact whose identifier does not hash from its public
//! keys is an invariant violation and fails loudly; contacts enter the
//! table either by explicit user action or automatically when a validly
//! signed message arrives.

use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

use zerotrace_identity::Identifier;

use crate::db::Database;
use crate::{Result, StoreError};

/// A known peer.
#[derive(Debug, Clone)]
pub struct Contact {
    /// Self-certifying identifier (primary key).
    pub identifier: Identifier,
    /// Optional display name.
    pub name: Option<String>,
    /// Reachable anonymous address.
    pub addr: String,
    /// ML-KEM-512 public key.
    pub kem_public_key: Vec<u8>,
    /// ML-DSA-44 public key.
    pub sig_public_key: Vec<u8>,
}

/// Store of known contacts.
#[derive(Clone)]
pub struct ContactStore {
    db: Database,
}

impl ContactStore {
    /// Create a store over the shared database.
    pub fn new(db: &Database) -> Self {
        Self { db: db.clone() }
    }

    /// Insert a contact, verifying the identifier binding first.
    ///
    /// Re-inserting an existing identifier refreshes its address (and
    /// name, when provided) but never its keys: the keys are what the
    /// identifier certifies.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::IdentifierMismatch` if
    /// `SHA-256(kem_pk || sig_pk)` does not equal the identifier.
    pub async fn add(&self, contact: &Contact) -> Result<()> {
        if !contact
            .identifier
            .matches(&contact.kem_public_key, &contact.sig_public_key)
        {
            return Err(StoreError::IdentifierMismatch);
        }

        let conn = self.db.lock().await;
        let inserted = conn.execute(
            "INSERT INTO contacts (identifier, name, addr, kem_public_key, sig_public_key)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(identifier) DO UPDATE SET
                 addr = excluded.addr,
                 name = COALESCE(excluded.name, contacts.name)",
            params![
                contact.identifier.as_str(),
                contact.name,
                contact.addr,
                contact.kem_public_key,
                contact.sig_public_key,
            ],
        )?;
        debug!(contact = contact.identifier.short(), rows = inserted, "contact upserted");
        Ok(())
    }

    /// Fetch a contact by identifier.
    ///
    /// # Errors
    ///
    /// Returns a database error on query failure.
    pub async fn get(&self, identifier: &Identifier) -> Result<Option<Contact>> {
        let conn = self.db.lock().await;
        conn.query_row(
            "SELECT identifier, name, addr, kem_public_key, sig_public_key
             FROM contacts WHERE identifier = ?1",
            params![identifier.as_str()],
            row_to_contact,
        )
        .optional()
        .map_err(Into::into)
    }

    /// List all contacts.
    ///
    /// # Errors
    ///
    /// Returns a database error on query failure.
    pub async fn list(&self) -> Result<Vec<Contact>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(
            "SELECT identifier, name, addr, kem_public_key, sig_public_key
             FROM contacts ORDER BY identifier",
        )?;
        let rows = stmt.query_map([], row_to_contact)?;
        let mut contacts = Vec::new();
        for row in rows {
            contacts.push(row?);
        }
        Ok(contacts)
    }

    /// Remove a contact. Returns whether a row was deleted.
    ///
    /// # Errors
    ///
    /// Returns a database error on failure.
    pub async fn remove(&self, identifier: &Identifier) -> Result<bool> {
        let conn = self.db.lock().await;
        let deleted = conn.execute(
            "DELETE FROM contacts WHERE identifier = ?1",
            params![identifier.as_str()],
        )?;
        Ok(deleted > 0)
    }

    /// Number of stored contacts.
    ///
    /// # Errors
    ///
    /// Returns a database error on failure.
    pub async fn count(&self) -> Result<usize> {
        let conn = self.db.lock().await;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM contacts", [], |r| r.get(0))?;
        Ok(n as usize)
    }
}

fn row_to_contact(row: &Row<'_>) -> rusqlite::Result<Contact> {
    let identifier: String = row.get(0)?;
    let identifier = Identifier::parse(&identifier).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Contact {
        identifier,
        name: row.get(1)?,
        addr: row.get(2)?,
        kem_public_key: row.get(3)?,
        sig_public_key: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(kem: &[u8], sig: &[u8], addr: &str) -> Contact {
        Contact {
            identifier: Identifier::from_public_keys(kem, sig),
            name: None,
            addr: addr.to_string(),
            kem_public_key: kem.to_vec(),
            sig_public_key: sig.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let db = Database::open_in_memory().unwrap();
        let store = ContactStore::new(&db);

        let c = contact(&[1u8; 16], &[2u8; 16], "peer.b32.i2p");
        store.add(&c).await.unwrap();

        let got = store.get(&c.identifier).await.unwrap().unwrap();
        assert_eq!(got.addr, "peer.b32.i2p");
        assert_eq!(got.kem_public_key, c.kem_public_key);
    }

    #[tokio::test]
    async fn test_identifier_binding_enforced() {
        let db = Database::open_in_memory().unwrap();
        let store = ContactStore::new(&db);

        let mut c = contact(&[1u8; 16], &[2u8; 16], "peer.b32.i2p");
        c.identifier = Identifier::from_public_keys(&[9u8; 16], &[9u8; 16]);

        assert!(matches!(
            store.add(&c).await,
            Err(StoreError::IdentifierMismatch)
        ));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upsert_refreshes_addr_not_keys() {
        let db = Database::open_in_memory().unwrap();
        let store = ContactStore::new(&db);

        let c = contact(&[1u8; 16], &[2u8; 16], "old.b32.i2p");
        store.add(&c).await.unwrap();

        let mut updated = c.clone();
        updated.addr = "new.b32.i2p".into();
        store.add(&updated).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let got = store.get(&c.identifier).await.unwrap().unwrap();
        assert_eq!(got.addr, "new.b32.i2p");
    }

    #[tokio::test]
    async fn test_list_and_remove() {
        let db = Database::open_in_memory().unwrap();
        let store = ContactStore::new(&db);

        let a = contact(&[1u8; 16], &[2u8; 16], "a");
        let b = contact(&[3u8; 16], &[4u8; 16], "b");
        store.add(&a).await.unwrap();
        store.add(&b).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 2);

        assert!(store.remove(&a.identifier).await.unwrap());
        assert!(!store.remove(&a.identifier).await.unwrap());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let db = Database::open_in_memory().unwrap();
        let store = ContactStore::new(&db);
        let id = Identifier::from_public_keys(b"nobody", b"here");
        assert!(store.get(&id).await.unwrap().is_none());
    }
}
