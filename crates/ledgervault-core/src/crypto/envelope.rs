//! Authenticated-encryption envelopes.
//!
//! An envelope is `base64(nonce || ciphertext || tag)` under AES-256-GCM with
//! a fresh random 96-bit nonce per call. Tag verification is the *only*
//! mechanism that rejects a wrong password or recovery secret: a wrong
//! wrapping key produces [`EnvelopeError::Authentication`], never silently
//! accepted garbage plaintext.
//!
//! A corrupt stored envelope (bad base64, or too short to contain nonce and
//! tag) is a distinct condition - [`EnvelopeError::Malformed`] - so callers
//! can tell "corrupt data" apart from "wrong credential".

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

use super::kdf;
use super::keys::{FieldKey, KEY_LEN, VaultKey};

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes.
const TAG_LEN: usize = 16;

/// Errors from envelope encryption and decryption.
#[derive(Error, Debug)]
pub enum EnvelopeError {
    /// The stored envelope is structurally invalid: not base64, or too short
    /// to contain a nonce and tag. Indicates corrupt data, not a credential
    /// mismatch.
    #[error("Malformed envelope - stored ciphertext is corrupt")]
    Malformed,

    /// Tag verification failed. With intact storage this means the wrapping
    /// key was wrong, i.e. a wrong password or recovery secret.
    #[error("Envelope authentication failed - wrong key or tampered data")]
    Authentication,

    /// AEAD encryption failed (plaintext beyond the cipher's length bound).
    #[error("Envelope encryption failed")]
    Encryption,
}

/// Encrypt `plaintext` under `key`, producing a base64 envelope.
///
/// A fresh random nonce is drawn on every call, so sealing the same
/// plaintext twice under the same key yields different ciphertext.
pub fn seal(plaintext: &[u8], key: &[u8; KEY_LEN]) -> Result<String, EnvelopeError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut nonce = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| EnvelopeError::Encryption)?;

    let mut envelope = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    envelope.extend_from_slice(&nonce);
    envelope.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(envelope))
}

/// Decrypt and verify a base64 envelope produced by [`seal`].
pub fn open(envelope_b64: &str, key: &[u8; KEY_LEN]) -> Result<Zeroizing<Vec<u8>>, EnvelopeError> {
    let envelope = STANDARD
        .decode(envelope_b64)
        .map_err(|_| EnvelopeError::Malformed)?;

    if envelope.len() < NONCE_LEN + TAG_LEN {
        return Err(EnvelopeError::Malformed);
    }

    let (nonce, ciphertext) = envelope.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| EnvelopeError::Authentication)
}

/// Wrap the vault key under a key derived from the recovery secret.
///
/// The result is what the identity directory stores as `wrapped_vault_key`;
/// it enables password-independent recovery login.
pub fn wrap_vault_key(
    vault_key: &VaultKey,
    recovery_secret: &str,
) -> Result<String, EnvelopeError> {
    let wrapping_key = kdf::wrapping_key_from_secret(recovery_secret);
    vault_key.with_bytes(|bytes| seal(bytes, &wrapping_key))
}

/// Unwrap a stored vault key with the recovery secret.
pub fn unwrap_vault_key(envelope: &str, recovery_secret: &str) -> Result<VaultKey, EnvelopeError> {
    let wrapping_key = kdf::wrapping_key_from_secret(recovery_secret);
    let plaintext = open(envelope, &wrapping_key)?;
    let bytes: [u8; KEY_LEN] = plaintext
        .as_slice()
        .try_into()
        .map_err(|_| EnvelopeError::Malformed)?;
    Ok(VaultKey::from_bytes(bytes))
}

/// Wrap the field key under the vault key for storage inside the vault.
pub fn wrap_field_key(field_key: &FieldKey, vault_key: &VaultKey) -> Result<String, EnvelopeError> {
    let wrapping_key = kdf::wrapping_key_from_vault_key(vault_key);
    field_key.with_bytes(|bytes| seal(bytes, &wrapping_key))
}

/// Unwrap the stored field key with the session's vault key.
pub fn unwrap_field_key(envelope: &str, vault_key: &VaultKey) -> Result<FieldKey, EnvelopeError> {
    let wrapping_key = kdf::wrapping_key_from_vault_key(vault_key);
    let plaintext = open(envelope, &wrapping_key)?;
    let bytes: [u8; KEY_LEN] = plaintext
        .as_slice()
        .try_into()
        .map_err(|_| EnvelopeError::Malformed)?;
    Ok(FieldKey::from_bytes(bytes))
}

/// Encrypt a sensitive field value under the field key.
pub fn seal_value(plaintext: &str, field_key: &FieldKey) -> Result<String, EnvelopeError> {
    field_key.with_bytes(|key| seal(plaintext.as_bytes(), key))
}

/// Decrypt a field value sealed with [`seal_value`].
pub fn open_value(envelope: &str, field_key: &FieldKey) -> Result<String, EnvelopeError> {
    let plaintext = field_key.with_bytes(|key| open(envelope, key))?;
    String::from_utf8(plaintext.to_vec()).map_err(|_| EnvelopeError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn random_key() -> [u8; KEY_LEN] {
        let mut key = [0u8; KEY_LEN];
        rand::rng().fill_bytes(&mut key);
        key
    }

    proptest! {
        #[test]
        fn roundtrip(plaintext in prop::collection::vec(any::<u8>(), 0..512)) {
            let key = random_key();
            let envelope = seal(&plaintext, &key).unwrap();
            let opened = open(&envelope, &key).unwrap();
            prop_assert_eq!(plaintext, opened.to_vec());
        }

        #[test]
        fn wrong_key_fails_authentication(plaintext in prop::collection::vec(any::<u8>(), 0..512)) {
            let key = random_key();
            let other = random_key();
            let envelope = seal(&plaintext, &key).unwrap();
            let result = open(&envelope, &other);
            prop_assert!(matches!(result, Err(EnvelopeError::Authentication)));
        }

        #[test]
        fn tampering_fails_authentication(plaintext in prop::collection::vec(any::<u8>(), 1..512)) {
            let key = random_key();
            let envelope = seal(&plaintext, &key).unwrap();
            let mut raw = STANDARD.decode(&envelope).unwrap();
            let mid = raw.len() / 2;
            raw[mid] ^= 0xFF;
            let result = open(&STANDARD.encode(raw), &key);
            prop_assert!(matches!(result, Err(EnvelopeError::Authentication)));
        }
    }

    #[test]
    fn nonce_uniqueness() {
        // Same plaintext, same key, repeated calls: ciphertext must differ.
        let key = random_key();
        let first = seal(b"identical plaintext", &key).unwrap();
        let second = seal(b"identical plaintext", &key).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn malformed_is_not_authentication_failure() {
        let key = random_key();
        assert!(matches!(
            open("@@not-base64@@", &key),
            Err(EnvelopeError::Malformed)
        ));
        // Valid base64 but shorter than nonce + tag.
        let short = STANDARD.encode([0u8; NONCE_LEN + TAG_LEN - 1]);
        assert!(matches!(open(&short, &key), Err(EnvelopeError::Malformed)));
    }

    #[test]
    fn vault_key_wrap_roundtrip() {
        let vault_key = VaultKey::random();
        let wrapped = wrap_vault_key(&vault_key, "recovery-secret").unwrap();
        let unwrapped = unwrap_vault_key(&wrapped, "recovery-secret").unwrap();
        assert_eq!(vault_key, unwrapped);

        assert!(matches!(
            unwrap_vault_key(&wrapped, "wrong-secret"),
            Err(EnvelopeError::Authentication)
        ));
    }

    #[test]
    fn field_key_wrap_roundtrip() {
        let vault_key = VaultKey::random();
        let field_key = FieldKey::random();
        let wrapped = wrap_field_key(&field_key, &vault_key).unwrap();
        let unwrapped = unwrap_field_key(&wrapped, &vault_key).unwrap();
        assert_eq!(field_key, unwrapped);

        assert!(matches!(
            unwrap_field_key(&wrapped, &VaultKey::random()),
            Err(EnvelopeError::Authentication)
        ));
    }

    #[test]
    fn field_value_roundtrip() {
        let field_key = FieldKey::random();
        let sealed = seal_value("4532 0151 1283 0366", &field_key).unwrap();
        assert_eq!(
            open_value(&sealed, &field_key).unwrap(),
            "4532 0151 1283 0366"
        );
    }

    #[test]
    fn truncated_key_envelope_is_malformed() {
        // An envelope that authenticates but holds the wrong plaintext
        // length is classified as corrupt, not as a credential mismatch.
        let wrapping = "recovery-secret";
        let short = kdf::wrapping_key_from_secret(wrapping);
        let envelope = seal(b"too short", &short).unwrap();
        assert!(matches!(
            unwrap_vault_key(&envelope, wrapping),
            Err(EnvelopeError::Malformed)
        ));
    }
}
