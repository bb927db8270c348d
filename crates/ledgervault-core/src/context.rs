//! The application context: one explicitly constructed instance per process
//! wiring together the identity directory, vault gate, and session state.
//!
//! This replaces the global-singleton services of a typical desktop shell
//! with a dependency-injected root object. "One instance per process" is a
//! convention the caller upholds by constructing it once at startup; nothing
//! here is process-global except the session slot's lifetime semantics.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use rusqlite::Connection;

use crate::auth::{self, AuthError, CredentialKind};
use crate::crypto::kdf::{KdfParams, RecoverySecret};
use crate::directory::DirectoryStore;
use crate::vault::gate::GuardedConnection;
use crate::vault::provision::VaultProvisioner;
use crate::vault::session::Session;

/// Filename of the shared identity directory inside the data dir.
const DIRECTORY_FILENAME: &str = "directory.db";

/// Process-wide root for the vault subsystem.
///
/// Holds the shared directory store, the data directory where per-user
/// vault files live, and the session slot. The slot is a [`OnceLock`]:
/// set by the first successful login or registration, never cleared -
/// re-authentication requires a process restart.
pub struct AppContext {
    directory: DirectoryStore,
    data_dir: PathBuf,
    kdf_params: KdfParams,
    session: OnceLock<Arc<Session>>,
}

impl AppContext {
    /// Open the context rooted at `data_dir`, creating the directory store
    /// (`directory.db`) if missing. Uses the production KDF parameters.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, AuthError> {
        Self::with_kdf_params(data_dir, KdfParams::default())
    }

    /// Open the context with explicit KDF cost parameters.
    ///
    /// Production code should prefer [`open`](Self::open); this exists so
    /// tests can substitute [`KdfParams::fast`].
    pub fn with_kdf_params(
        data_dir: impl Into<PathBuf>,
        kdf_params: KdfParams,
    ) -> Result<Self, AuthError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        let directory = DirectoryStore::open(data_dir.join(DIRECTORY_FILENAME))?;
        Ok(Self {
            directory,
            data_dir,
            kdf_params,
            session: OnceLock::new(),
        })
    }

    /// Register a new user: provision their vault and log them in.
    ///
    /// Returns the recovery secret for one-time display. It is not stored
    /// anywhere in recoverable form; losing it forfeits the recovery path.
    pub fn register(&self, username: &str, password: &str) -> Result<RecoverySecret, AuthError> {
        if self.session.get().is_some() {
            return Err(AuthError::SessionAlreadyActive);
        }
        let provisioner = VaultProvisioner::new(&self.directory, &self.data_dir, &self.kdf_params);
        let provisioned = provisioner.provision(username, password)?;
        self.session
            .set(Arc::new(provisioned.session))
            .map_err(|_| AuthError::SessionAlreadyActive)?;
        Ok(provisioned.recovery_secret)
    }

    /// Authenticate with a password or recovery secret and store the
    /// resulting session for the remainder of the process.
    pub fn login(
        &self,
        username: &str,
        secret: &str,
        kind: CredentialKind,
    ) -> Result<Arc<Session>, AuthError> {
        if self.session.get().is_some() {
            return Err(AuthError::SessionAlreadyActive);
        }
        let session = auth::login(
            &self.directory,
            &self.data_dir,
            &self.kdf_params,
            username,
            secret,
            kind,
        )?;
        let session = Arc::new(session);
        self.session
            .set(Arc::clone(&session))
            .map_err(|_| AuthError::SessionAlreadyActive)?;
        Ok(session)
    }

    /// The active session, or [`AuthError::NoActiveSession`] before login.
    pub fn session(&self) -> Result<&Arc<Session>, AuthError> {
        self.session.get().ok_or(AuthError::NoActiveSession)
    }

    /// Run a unit of work against the unlocked vault.
    ///
    /// The only sanctioned way application code reaches vault data: the
    /// closure receives a gated, keyed connection and the session counter
    /// brackets the call.
    pub fn with_vault<T>(
        &self,
        f: impl FnOnce(&mut GuardedConnection) -> rusqlite::Result<T>,
    ) -> Result<T, AuthError> {
        let session = self.session()?;
        session.gate().run(f).map_err(Into::into)
    }

    /// Like [`with_vault`](Self::with_vault), inside a single transaction
    /// with rollback-on-error.
    pub fn with_vault_transaction<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> rusqlite::Result<T>,
    ) -> Result<T, AuthError> {
        let session = self.session()?;
        session.gate().run_transaction(f).map_err(Into::into)
    }

    /// Read access to the shared, non-per-user reference data in the
    /// identity directory.
    pub fn with_directory<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, AuthError> {
        self.directory.with_connection(f).map_err(Into::into)
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("data_dir", &self.data_dir)
            .field("logged_in", &self.session.get().is_some())
            .finish_non_exhaustive()
    }
}
