//! Secret key containers for the vault layer.
//!
//! Two independent 256-bit secrets exist per user:
//!
//! - [`VaultKey`] - gates access to the user's encrypted vault file. It is
//!   re-derivable from (password, salt) or recoverable by unwrapping the
//!   stored envelope with the recovery secret.
//! - [`FieldKey`] - stored (wrapped) inside the vault itself and used for
//!   value-level encryption of individual sensitive fields.
//!
//! Both are held in [`secrecy::SecretBox`] so the raw bytes are zeroed on
//! drop and never appear in `Debug` output. Access is scoped: callers pass a
//! closure to `with_bytes` rather than taking references that could outlive
//! the intended use.

use rand::RngCore;
use secrecy::{ExposeSecret, SecretBox};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Length of both vault and field keys in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Per-user master secret gating the encrypted vault file.
///
/// Never persisted in plaintext; lives in process memory for the session's
/// lifetime. Two derivations of the same (password, salt) pair are
/// byte-identical, which is what makes password login possible without
/// storing the key itself.
pub struct VaultKey(SecretBox<[u8; KEY_LEN]>);

impl VaultKey {
    /// Wrap raw key material. The caller is responsible for zeroing its own
    /// copy if it came from sensitive context.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(SecretBox::new(Box::new(bytes)))
    }

    /// Generate a fresh random key using a cryptographically secure RNG.
    pub fn random() -> Self {
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        rand::rng().fill_bytes(&mut bytes[..]);
        Self::from_bytes(*bytes)
    }

    /// Execute a function with scoped access to the raw key bytes.
    pub fn with_bytes<T>(&self, f: impl FnOnce(&[u8; KEY_LEN]) -> T) -> T {
        f(self.0.expose_secret())
    }

    /// Render the key in SQLCipher's raw-key form: `x'<64 hex digits>'`.
    ///
    /// Passing a raw key skips SQLCipher's internal PBKDF2 - the memory-hard
    /// derivation already happened in [`crate::crypto::kdf`].
    pub(crate) fn to_sqlcipher_key(&self) -> Zeroizing<String> {
        self.with_bytes(|bytes| Zeroizing::new(format!("x'{}'", hex::encode(bytes))))
    }
}

impl Clone for VaultKey {
    fn clone(&self) -> Self {
        self.with_bytes(|bytes| Self::from_bytes(*bytes))
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VaultKey([REDACTED])")
    }
}

impl PartialEq for VaultKey {
    fn eq(&self, other: &Self) -> bool {
        self.with_bytes(|a| other.with_bytes(|b| a.ct_eq(b).into()))
    }
}

impl Eq for VaultKey {}

/// Secondary secret for value-level encryption of sensitive fields.
///
/// Created once at vault provisioning, stored inside the vault wrapped under
/// the vault key, decrypted once per session. Compromising the vault key
/// alone is necessary but not sufficient to read field-encrypted values
/// exfiltrated out of the vault file.
pub struct FieldKey(SecretBox<[u8; KEY_LEN]>);

impl FieldKey {
    /// Wrap raw key material.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(SecretBox::new(Box::new(bytes)))
    }

    /// Generate a fresh random key using a cryptographically secure RNG.
    pub fn random() -> Self {
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        rand::rng().fill_bytes(&mut bytes[..]);
        Self::from_bytes(*bytes)
    }

    /// Execute a function with scoped access to the raw key bytes.
    pub fn with_bytes<T>(&self, f: impl FnOnce(&[u8; KEY_LEN]) -> T) -> T {
        f(self.0.expose_secret())
    }
}

impl Clone for FieldKey {
    fn clone(&self) -> Self {
        self.with_bytes(|bytes| Self::from_bytes(*bytes))
    }
}

impl std::fmt::Debug for FieldKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FieldKey([REDACTED])")
    }
}

impl PartialEq for FieldKey {
    fn eq(&self, other: &Self) -> bool {
        self.with_bytes(|a| other.with_bytes(|b| a.ct_eq(b).into()))
    }
}

impl Eq for FieldKey {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_is_redacted() {
        let key = VaultKey::from_bytes([0xAB; KEY_LEN]);
        let rendered = format!("{key:?}");
        assert!(!rendered.contains("ab"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn equality_is_by_key_material() {
        let a = VaultKey::from_bytes([1; KEY_LEN]);
        let b = VaultKey::from_bytes([1; KEY_LEN]);
        let c = VaultKey::from_bytes([2; KEY_LEN]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn random_keys_differ() {
        assert_ne!(VaultKey::random(), VaultKey::random());
        assert_ne!(FieldKey::random(), FieldKey::random());
    }

    #[test]
    fn sqlcipher_key_is_raw_hex_form() {
        let key = VaultKey::from_bytes([0x0F; KEY_LEN]);
        let rendered = key.to_sqlcipher_key();
        assert!(rendered.starts_with("x'"));
        assert!(rendered.ends_with('\''));
        assert_eq!(rendered.len(), 2 + KEY_LEN * 2 + 1);
    }
}
