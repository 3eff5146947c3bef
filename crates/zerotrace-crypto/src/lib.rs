//! # zerotrace-crypto
//!
//! Cryptographic primitives for the ZeroTrace protocol.
//!
//! This crate provides:
//! - **ML-KEM-512**: post-quantum key encapsulation (FIPS 203)
//! - **ML-DSA-44**: post-quantum digital signatures (FIPS 204)
//! - **AES-256-GCM**: authenticated symmetric encryption
//! - **KDFs**: HKDF-SHA256 for message keys, scrypt for the keystore
//!
//! ## Security
//!
//! - Secret key material is zeroized on drop
//! - Password-derived keys never leave this crate unwrapped
//! - Constant-time comparison for all authenticator checks

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod kdf;
pub mod mldsa;
pub mod mlkem;
pub mod symmetric;

pub use error::{CryptoError, Result};
pub use kdf::{derive_message_key, derive_storage_key, keycheck_tag, KEYCHECK_LABEL};
pub use mldsa::{SigKeyPair, SigPrivateKey, SigPublicKey, Signature};
pub use mlkem::{decapsulate, encapsulate, KemCiphertext, KemKeyPair, KemPrivateKey, KemPublicKey, SharedSecret};
pub use symmetric::{decrypt, encrypt, MessageNonce, SymmetricKey};
