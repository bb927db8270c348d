//! Session state: the process-lifetime holder of the unlocked vault.
//!
//! A [`Session`] is created by a successful login or registration and lives
//! for the rest of the process - there is no logout path; re-authentication
//! requires a restart. Once constructed it is read-only, so it can be shared
//! freely across threads without additional locking.

use std::sync::Arc;

use crate::crypto::envelope::{self, EnvelopeError};
use crate::crypto::keys::FieldKey;

use super::gate::VaultGate;

/// The unlocked vault plus the decrypted field key.
///
/// Both credential paths (password and recovery) produce identical sessions;
/// downstream code never needs to know which was used.
pub struct Session {
    gate: Arc<VaultGate>,
    field_key: FieldKey,
}

impl Session {
    pub(crate) fn new(gate: Arc<VaultGate>, field_key: FieldKey) -> Self {
        Self { gate, field_key }
    }

    /// The access gate for this session's vault file.
    pub fn gate(&self) -> &Arc<VaultGate> {
        &self.gate
    }

    /// Encrypt a sensitive field value under the session's field key.
    ///
    /// Value-level defense in depth on top of the whole-file encryption:
    /// rows exported or leaked out of the vault file still require the field
    /// key, which is stored only in wrapped form.
    pub fn encrypt_field(&self, plaintext: &str) -> Result<String, EnvelopeError> {
        envelope::seal_value(plaintext, &self.field_key)
    }

    /// Decrypt a field value produced by [`encrypt_field`](Self::encrypt_field).
    pub fn decrypt_field(&self, sealed: &str) -> Result<String, EnvelopeError> {
        envelope::open_value(sealed, &self.field_key)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("vault", &self.gate.path())
            .finish_non_exhaustive()
    }
}
