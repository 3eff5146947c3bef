//! # zerotrace-proto
//!
//! The ZeroTrace wire envelope.
//!
//! This crate defines:
//! - **WireMessage**: the outer JSON record relayed between nodes
//! - **InnerPayload**: the signed, AEAD-encrypted content with its
//!   canonical field order
//! - **seal / open**: the hybrid encryption pipeline
//!   (ML-KEM-512 encapsulation, HKDF-SHA256, AES-256-GCM, ML-DSA-44)
//!
//! Relays see only the outer envelope; everything identifying the
//! sender lives inside the ciphertext.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod b64;
pub mod envelope;
pub mod error;
pub mod payload;
pub mod wire;

pub use envelope::{open, seal, OpenedMessage};
pub use error::{ProtoError, Result};
pub use payload::InnerPayload;
pub use wire::WireMessage;
