//! Credential login flow and the crate-level error taxonomy.
//!
//! Login authenticates a user by password or by recovery secret and
//! produces a [`Session`] holding the unlocked vault key (inside the gate)
//! and the decrypted field key. Both paths yield identical sessions.
//!
//! This module is also the translation boundary to user-facing messages:
//! [`AuthError::user_message`] renders `UserNotFound` and
//! `AuthenticationFailed` identically, so a UI built on it cannot become an
//! oracle for which usernames exist.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::crypto::envelope::{self, EnvelopeError};
use crate::crypto::kdf::{self, KdfParams};
use crate::directory::{DirectoryError, DirectoryStore, IdentityColumn};
use crate::vault::gate::{GateError, VaultGate};
use crate::vault::session::Session;

/// Which credential a login attempt presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    /// The user's password; the vault key is re-derived from it.
    Password,
    /// The one-time-displayed recovery secret; the vault key is unwrapped
    /// from the directory's stored envelope.
    Recovery,
}

/// Errors surfaced by registration, login, and gated vault access.
#[derive(Error, Debug)]
pub enum AuthError {
    /// No identity is registered for the supplied username.
    #[error("No such user")]
    UserNotFound,

    /// Registration was attempted for a username hash that already exists.
    #[error("Username already taken")]
    UsernameTaken,

    /// Wrong password or recovery secret. Deliberately not distinguished
    /// further.
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Stored ciphertext is corrupt - distinct from a credential mismatch.
    #[error("Stored key envelope is malformed")]
    MalformedEnvelope,

    /// Vault creation target already exists on disk.
    #[error("Vault file already exists: {0}")]
    VaultFileConflict(PathBuf),

    /// A vault query was attempted while the gate is locked. Indicates a
    /// programming error, not a user-facing condition.
    #[error("Vault access denied - gate is locked")]
    AccessDenied,

    /// A vault or field key was requested before any login.
    #[error("No active session")]
    NoActiveSession,

    /// A second login was attempted in the same process. Sessions last for
    /// the process lifetime; re-authentication requires a restart.
    #[error("A session is already active")]
    SessionAlreadyActive,

    /// Identity directory failure.
    #[error(transparent)]
    Directory(DirectoryError),

    /// Gated vault store failure that is not a key or access problem.
    #[error(transparent)]
    Gate(GateError),

    /// Key derivation failure.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Filesystem failure during provisioning.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AuthError {
    /// The generic, user-facing rendering of this error.
    ///
    /// `UserNotFound` and `AuthenticationFailed` produce the same message so
    /// that login UIs cannot leak which of the two checks failed.
    pub fn user_message(&self) -> String {
        match self {
            Self::UserNotFound | Self::AuthenticationFailed => {
                "Could not log in: the username or credential is incorrect.".to_string()
            }
            Self::UsernameTaken => "That username is already taken.".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<DirectoryError> for AuthError {
    fn from(e: DirectoryError) -> Self {
        match e {
            // A duplicate surfacing from the UNIQUE constraint (rather than
            // the provisioner's pre-check) is still a taken username.
            DirectoryError::IdentityExists => Self::UsernameTaken,
            other => Self::Directory(other),
        }
    }
}

impl From<GateError> for AuthError {
    fn from(e: GateError) -> Self {
        match e {
            // A key rejected by the vault file is indistinguishable from a
            // wrong credential, by design.
            GateError::InvalidKey => Self::AuthenticationFailed,
            GateError::AccessDenied => Self::AccessDenied,
            other => Self::Gate(other),
        }
    }
}

impl From<EnvelopeError> for AuthError {
    fn from(e: EnvelopeError) -> Self {
        match e {
            EnvelopeError::Authentication => Self::AuthenticationFailed,
            EnvelopeError::Malformed | EnvelopeError::Encryption => Self::MalformedEnvelope,
        }
    }
}

/// Authenticate a user and unlock their vault.
///
/// 1. Resolve the identity: existence check, then only the columns this
///    credential kind needs.
/// 2. Obtain the candidate vault key: re-derived for password login,
///    unwrapped for recovery login.
/// 3. Open the gate against the vault file; the first query verifies the
///    key against the encrypted file.
/// 4. Read and unwrap the stored field key.
pub(crate) fn login(
    directory: &DirectoryStore,
    data_dir: &Path,
    kdf_params: &KdfParams,
    username: &str,
    secret: &str,
    kind: CredentialKind,
) -> Result<Session, AuthError> {
    let username_hash = kdf::hash_username(username);
    if !directory.exists(&username_hash)? {
        return Err(AuthError::UserNotFound);
    }
    let vault_filename = directory.get_column(&username_hash, IdentityColumn::VaultFilename)?;

    let vault_key = match kind {
        CredentialKind::Password => {
            let salt = directory.get_column(&username_hash, IdentityColumn::PasswordSalt)?;
            kdf::derive_vault_key(secret, &salt, kdf_params)?
        }
        CredentialKind::Recovery => {
            let wrapped =
                directory.get_column(&username_hash, IdentityColumn::WrappedVaultKey)?;
            envelope::unwrap_vault_key(&wrapped, secret)?
        }
    };

    let vault_path = data_dir.join(&vault_filename);
    let gate = Arc::new(VaultGate::open_existing(vault_path, vault_key.clone()));

    // The first gated query doubles as key verification: a wrong key fails
    // the unlock and surfaces as AuthenticationFailed.
    let wrapped_field_key: String = gate.run(|conn| {
        conn.query_row(
            "SELECT wrapped_field_key FROM vault_security LIMIT 1",
            [],
            |row| row.get(0),
        )
    })?;

    let field_key = envelope::unwrap_field_key(&wrapped_field_key, &vault_key)?;

    tracing::info!(credential = ?kind, "login succeeded");
    Ok(Session::new(gate, field_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_does_not_distinguish_unknown_user_from_bad_credential() {
        assert_eq!(
            AuthError::UserNotFound.user_message(),
            AuthError::AuthenticationFailed.user_message()
        );
    }

    #[test]
    fn invalid_gate_key_maps_to_authentication_failure() {
        assert!(matches!(
            AuthError::from(GateError::InvalidKey),
            AuthError::AuthenticationFailed
        ));
        assert!(matches!(
            AuthError::from(GateError::AccessDenied),
            AuthError::AccessDenied
        ));
    }

    #[test]
    fn envelope_errors_keep_their_classification() {
        assert!(matches!(
            AuthError::from(EnvelopeError::Authentication),
            AuthError::AuthenticationFailed
        ));
        assert!(matches!(
            AuthError::from(EnvelopeError::Malformed),
            AuthError::MalformedEnvelope
        ));
    }
}
