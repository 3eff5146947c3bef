//! # zerotrace-store
//!
//! Embedded relational storage for a ZeroTrace node.
//!
//! This crate provides the four message-plane stores, all backed by a
//! single SQLite database:
//! - **ContactStore**: known peers, keyed by self-certifying identifier
//! - **InboxStore**: delivered plaintext messages
//! - **ForwardQueue**: undelivered wire messages awaiting pull
//! - **SeenStore**: signature set for duplicate suppression
//!
//! Each logical operation runs as a single transaction; the connection
//! is shared behind an async mutex so stores can be cloned freely into
//! handler tasks.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod contacts;
pub mod db;
pub mod error;
pub mod forward;
pub mod inbox;
pub mod seen;

pub use contacts::{Contact, ContactStore};
pub use db::Database;
pub use error::{Result, StoreError};
pub use forward::ForwardQueue;
pub use inbox::{InboxStore, StoredMessage};
pub use seen::SeenStore;
