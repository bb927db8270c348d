//! Cryptographic primitives for the vault layer: key derivation, secret
//! containers, and authenticated-encryption envelopes.
//!
//! Everything here is pure computation - no I/O, no shared state. The
//! stateful pieces (directory, gate, session) live in their own modules and
//! call down into this one.

pub mod envelope;
pub mod kdf;
pub mod keys;

use thiserror::Error;

/// Errors from key derivation.
///
/// Envelope (AEAD) failures have their own type, [`envelope::EnvelopeError`],
/// because the distinction between "corrupt data" and "wrong credential"
/// matters to callers; derivation errors are all programming or system
/// errors - user secrets cannot make Argon2 itself fail.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The stored password salt is not valid base64.
    #[error("Invalid password salt: {0}")]
    InvalidSalt(String),

    /// The Argon2 cost parameters were rejected by the implementation.
    #[error("Invalid KDF parameters: {0}")]
    InvalidKdfParams(String),

    /// Argon2 derivation failed.
    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),
}

// Re-export commonly used types
pub use envelope::EnvelopeError;
pub use kdf::{KdfParams, RecoverySecret};
pub use keys::{FieldKey, VaultKey};
