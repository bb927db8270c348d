//! Key derivation: salts, recovery secrets, identity hashing, and the
//! memory-hard password derivation that produces the vault key.
//!
//! The derivation contract is strict determinism: identical
//! (password, salt, params) always yields identical key bytes, which is what
//! lets the login path re-derive the vault key instead of storing it.

use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use rand::distr::Alphanumeric;
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::CryptoError;
use super::keys::{KEY_LEN, VaultKey};

/// Length of the per-user password salt in bytes.
pub const SALT_LEN: usize = 16;

/// Length of the recovery secret in characters (alphanumeric alphabet).
pub const RECOVERY_SECRET_LEN: usize = 32;

/// Length of a generated vault filename stem in random bytes (hex-encoded).
const VAULT_FILENAME_LEN: usize = 12;

/// Default Argon2id memory cost: 64 MiB.
const DEFAULT_MEMORY_KIB: u32 = 64 * 1024;

/// Default Argon2id iteration count.
const DEFAULT_ITERATIONS: u32 = 4;

/// Argon2id cost parameters for vault key derivation.
///
/// The defaults are fixed and documented: 64 MiB of memory, 4 iterations,
/// and one lane per available core. Lane count feeds the derivation, so a
/// vault keyed on an 8-core machine only opens on machines reporting 8
/// cores - acceptable for a single-machine desktop vault, where the
/// alternative (pinning lanes to 1) would leave most of the hardware idle
/// against a GPU attacker.
#[derive(Debug, Clone)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Iteration count (time cost).
    pub iterations: u32,
    /// Degree of parallelism (lanes).
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: DEFAULT_MEMORY_KIB,
            iterations: DEFAULT_ITERATIONS,
            parallelism: std::thread::available_parallelism()
                .map_or(1, |n| u32::try_from(n.get()).unwrap_or(1)),
        }
    }
}

impl KdfParams {
    /// Weak parameters for tests only: ~1000x cheaper than the defaults.
    ///
    /// Never use outside test code - these offer no meaningful resistance
    /// to offline guessing.
    pub fn fast() -> Self {
        Self {
            memory_kib: 8 * 1024,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// A high-entropy recovery secret, displayed to the user exactly once at
/// registration and never stored in recoverable form.
///
/// Loss is unrecoverable by design: the secret exists only to wrap the vault
/// key at creation and to unwrap it during recovery login.
pub struct RecoverySecret(Zeroizing<String>);

impl RecoverySecret {
    /// Access the secret string for one-time display or key derivation.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for RecoverySecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RecoverySecret([REDACTED])")
    }
}

/// Generate a random per-user password salt, base64-encoded for storage.
///
/// Fixed at identity creation and never rotated.
pub fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

/// Generate a recovery secret: 32 characters sampled uniformly from
/// `[A-Za-z0-9]` (~190 bits of entropy).
pub fn generate_recovery_secret() -> RecoverySecret {
    let secret: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(RECOVERY_SECRET_LEN)
        .map(char::from)
        .collect();
    RecoverySecret(Zeroizing::new(secret))
}

/// Hash a username into its directory lookup key.
///
/// The username is normalized (trimmed, Unicode-lowercased) and digested
/// with SHA-256; the digest is rendered base64 URL-safe without padding so
/// it is storage- and filename-friendly. The plaintext username is never
/// persisted.
pub fn hash_username(username: &str) -> String {
    let normalized = Zeroizing::new(username.trim().to_lowercase());
    let digest = Sha256::digest(normalized.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Generate an opaque vault filename, not guessable from the username.
pub fn generate_vault_filename() -> String {
    let mut bytes = [0u8; VAULT_FILENAME_LEN];
    rand::rng().fill_bytes(&mut bytes);
    format!("{}.db", hex::encode(bytes))
}

/// Derive the 256-bit vault key from a password and its stored salt.
///
/// Argon2id v1.3 with the supplied cost parameters. This is the expensive
/// step of both registration and password login (~100ms-1s with the default
/// parameters, by design); callers on an interactive thread should dispatch
/// it to a worker.
pub fn derive_vault_key(
    password: &str,
    salt_b64: &str,
    params: &KdfParams,
) -> Result<VaultKey, CryptoError> {
    let salt = STANDARD
        .decode(salt_b64)
        .map_err(|e| CryptoError::InvalidSalt(e.to_string()))?;

    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| CryptoError::InvalidKdfParams(e.to_string()))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(password.as_bytes(), &salt, &mut key[..])
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;

    Ok(VaultKey::from_bytes(*key))
}

/// Derive a 256-bit wrapping key from a textual secret by SHA-256 digest.
///
/// Used for the recovery secret, which is already high-entropy - a
/// memory-hard KDF would add cost without adding security there.
pub fn wrapping_key_from_secret(secret: &str) -> Zeroizing<[u8; KEY_LEN]> {
    let digest = Sha256::digest(secret.as_bytes());
    Zeroizing::new(digest.into())
}

/// Derive the field-key wrapping key from the vault key bytes.
///
/// One-way, so the wrapping key cannot be turned back into the vault key if
/// it leaks through the wrapped-field-key code path.
pub fn wrapping_key_from_vault_key(vault_key: &VaultKey) -> Zeroizing<[u8; KEY_LEN]> {
    vault_key.with_bytes(|bytes| {
        let digest = Sha256::digest(bytes);
        Zeroizing::new(digest.into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let salt = generate_salt();
        let params = KdfParams::fast();
        let a = derive_vault_key("correct horse", &salt, &params).unwrap();
        let b = derive_vault_key("correct horse", &salt, &params).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_password_different_key() {
        let salt = generate_salt();
        let params = KdfParams::fast();
        let a = derive_vault_key("password-one", &salt, &params).unwrap();
        let b = derive_vault_key("password-two", &salt, &params).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn different_salt_different_key() {
        let params = KdfParams::fast();
        let a = derive_vault_key("same password", &generate_salt(), &params).unwrap();
        let b = derive_vault_key("same password", &generate_salt(), &params).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn invalid_salt_is_rejected() {
        let result = derive_vault_key("pw", "not base64!!!", &KdfParams::fast());
        assert!(matches!(result, Err(CryptoError::InvalidSalt(_))));
    }

    #[test]
    fn salts_are_unique() {
        assert_ne!(generate_salt(), generate_salt());
    }

    #[test]
    fn recovery_secret_shape() {
        let secret = generate_recovery_secret();
        assert_eq!(secret.expose().len(), RECOVERY_SECRET_LEN);
        assert!(secret.expose().chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(
            generate_recovery_secret().expose(),
            generate_recovery_secret().expose()
        );
    }

    #[test]
    fn username_hash_normalizes() {
        assert_eq!(hash_username("Alice"), hash_username("  alice  "));
        assert_ne!(hash_username("alice"), hash_username("bob"));
    }

    #[test]
    fn username_hash_is_url_safe() {
        // Enough inputs to exercise all base64 output characters.
        for i in 0..64 {
            let hash = hash_username(&format!("user-{i}"));
            assert!(!hash.contains(['+', '/', '=']));
        }
    }

    #[test]
    fn vault_filenames_are_opaque_and_unique() {
        let a = generate_vault_filename();
        let b = generate_vault_filename();
        assert!(a.ends_with(".db"));
        assert_eq!(a.len(), VAULT_FILENAME_LEN * 2 + 3);
        assert_ne!(a, b);
    }
}
