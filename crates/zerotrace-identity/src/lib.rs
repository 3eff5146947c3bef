//! # zerotrace-identity
//!
//! Self-certifying identities for the ZeroTrace protocol.
//!
//! This crate provides:
//! - **Identifier**: the 44-character base64url hash binding a user to
//!   their public key material
//! - **Identity**: the in-memory pair of post-quantum key pairs
//! - **Keystore**: the password-sealed at-rest form of an identity
//!
//! ## Security
//!
//! - The identifier equation `SHA-256(kem_pk || sig_pk)` is verified at
//!   every trust boundary
//! - Secret keys and passwords are zeroized after use
//! - Wrong passwords are detected by an HMAC tag before any AEAD
//!   decryption is attempted

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod identifier;
pub mod keypair;
pub mod keystore;

pub use error::{IdentityError, Result};
pub use identifier::Identifier;
pub use keypair::Identity;
pub use keystore::{Keystore, SealedKeystore, DEFAULT_KEYSTORE_FILE};
