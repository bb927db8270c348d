//! Vault provisioning: the one-shot workflow that creates a new per-user
//! encrypted vault and registers its identity.
//!
//! Ordering is the load-bearing part. The vault file is created and keyed
//! before any schema is written, so it never exists in a
//! readable-without-key state. The identity record is inserted only after
//! the file is fully initialized: a half-created vault with no directory
//! entry is recoverable (delete the orphan file), whereas a directory entry
//! pointing at a missing or broken file is not. Any failure between file
//! creation and the directory insert deletes the file and its WAL/SHM
//! sidecars.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::auth::AuthError;
use crate::crypto::envelope;
use crate::crypto::kdf::{self, KdfParams, RecoverySecret};
use crate::crypto::keys::{FieldKey, VaultKey};
use crate::directory::{DirectoryStore, IdentityRecord, ScriptKind};

use super::gate::VaultGate;
use super::session::Session;

/// DDL for the vault's own security table. Part of the vault layer, not the
/// application schema, so it is created here rather than via template
/// scripts.
const SECURITY_SCHEMA: &str = "
CREATE TABLE vault_security (
    wrapped_field_key TEXT NOT NULL
);
";

/// Result of a successful provisioning run.
pub(crate) struct Provisioned {
    /// The recovery secret, for one-time display. Never persisted.
    pub recovery_secret: RecoverySecret,
    /// A ready session - registration logs the user in.
    pub session: Session,
}

/// One-shot creator for a new user's vault.
pub(crate) struct VaultProvisioner<'a> {
    directory: &'a DirectoryStore,
    data_dir: &'a Path,
    kdf: &'a KdfParams,
}

impl<'a> VaultProvisioner<'a> {
    pub fn new(directory: &'a DirectoryStore, data_dir: &'a Path, kdf: &'a KdfParams) -> Self {
        Self {
            directory,
            data_dir,
            kdf,
        }
    }

    /// Create a vault for `username`, keyed from `password`.
    ///
    /// Fails with [`AuthError::UsernameTaken`] if the identity hash already
    /// exists, and with [`AuthError::VaultFileConflict`] if the generated
    /// filename collides with an existing file (never overwrites).
    pub fn provision(&self, username: &str, password: &str) -> Result<Provisioned, AuthError> {
        let username_hash = kdf::hash_username(username);
        if self.directory.exists(&username_hash)? {
            return Err(AuthError::UsernameTaken);
        }

        let password_salt = kdf::generate_salt();
        let recovery_secret = kdf::generate_recovery_secret();
        let vault_key = kdf::derive_vault_key(password, &password_salt, self.kdf)?;
        let wrapped_vault_key = envelope::wrap_vault_key(&vault_key, recovery_secret.expose())?;

        let vault_filename = kdf::generate_vault_filename();
        let vault_path = self.data_dir.join(&vault_filename);
        if vault_path.exists() {
            return Err(AuthError::VaultFileConflict(vault_path));
        }
        fs::create_dir_all(self.data_dir)?;

        tracing::info!(vault = %vault_path.display(), "provisioning new vault");

        let gate = Arc::new(VaultGate::create_new(&vault_path, vault_key.clone()));
        let field_key = match self.initialize_vault(&gate, &vault_key) {
            Ok(field_key) => field_key,
            Err(e) => {
                remove_vault_files(&vault_path);
                tracing::warn!(vault = %vault_path.display(), "provisioning failed, removed partial vault");
                return Err(e);
            }
        };

        // Deferred to last on purpose; see the module docs.
        let record = IdentityRecord {
            username_hash,
            vault_filename,
            password_salt,
            wrapped_vault_key,
        };
        if let Err(e) = self.directory.insert(&record) {
            remove_vault_files(&vault_path);
            return Err(e.into());
        }

        tracing::info!(vault = %vault_path.display(), "vault provisioned");
        Ok(Provisioned {
            recovery_secret,
            session: Session::new(gate, field_key),
        })
    }

    /// Steps 4–6: keyed file creation, template schema, default data, and
    /// the wrapped field key. Runs entirely inside the gate.
    fn initialize_vault(
        &self,
        gate: &Arc<VaultGate>,
        vault_key: &VaultKey,
    ) -> Result<FieldKey, AuthError> {
        let create_scripts = self.directory.schema_scripts(ScriptKind::CreateTable)?;
        let default_scripts = self.directory.schema_scripts(ScriptKind::InsertDefaults)?;

        gate.run(|conn| {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            conn.execute_batch(SECURITY_SCHEMA)?;
            for script in &create_scripts {
                conn.execute_batch(script)?;
            }
            Ok(())
        })?;

        // Bulk default data is one transaction: all rows or none.
        gate.run_transaction(|tx| {
            for script in &default_scripts {
                tx.execute_batch(script)?;
            }
            Ok(())
        })?;

        let field_key = FieldKey::random();
        let wrapped_field_key = envelope::wrap_field_key(&field_key, vault_key)?;
        gate.run(|conn| {
            conn.execute(
                "INSERT INTO vault_security (wrapped_field_key) VALUES (?1)",
                [&wrapped_field_key],
            )
            .map(|_| ())
        })?;

        Ok(field_key)
    }
}

/// Delete a partially created vault file and its SQLite sidecars. Failures
/// are ignored - the orphan file is harmless without a directory entry.
fn remove_vault_files(vault_path: &Path) {
    let _ = fs::remove_file(vault_path);
    for suffix in ["-wal", "-shm"] {
        let mut sidecar = vault_path.as_os_str().to_owned();
        sidecar.push(suffix);
        let _ = fs::remove_file(PathBuf::from(sidecar));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_vault_files_cleans_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.db");
        fs::write(&path, b"x").unwrap();
        fs::write(dir.path().join("vault.db-wal"), b"x").unwrap();
        fs::write(dir.path().join("vault.db-shm"), b"x").unwrap();

        remove_vault_files(&path);
        assert!(!path.exists());
        assert!(!dir.path().join("vault.db-wal").exists());
        assert!(!dir.path().join("vault.db-shm").exists());
    }
}
