//! The vault access gate: a session-reference-counted guard around a
//! per-user SQLCipher database.
//!
//! The gate has three observable states:
//!
//! - **Locked** - no queries permitted; the candidate key has not been
//!   verified (or the last holder exited).
//! - **Unlocking** - transient, first-caller-only: the 0→1 edge opens a
//!   connection, presents the key, and runs a cheap verification query.
//! - **Unlocked** - at least one active session holder; queries permitted.
//!
//! The invariant: **verify exactly once per 0→1 edge**. Callers inside a
//! burst share the cost of the initial decryption check; each still opens
//! its own connection (connections are not pooled). A failed unlock leaves
//! the counter at its pre-call value and the gate Locked.
//!
//! [`GuardedConnection`] is the second line of defense: it refuses to
//! construct a raw connection at all unless the gate has flagged access
//! allowed, catching code paths that bypass [`VaultGate::run`].

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use rusqlite::{Connection, ErrorCode, OpenFlags, Transaction};
use thiserror::Error;

use crate::crypto::keys::VaultKey;

/// Errors from gated vault access.
#[derive(Error, Debug)]
pub enum GateError {
    /// The vault key failed verification against the file. With an intact
    /// file this means a wrong password or recovery secret.
    #[error("Vault key rejected - wrong key or corrupted vault file")]
    InvalidKey,

    /// A connection was requested while the gate is locked. This is a
    /// programming error (a code path bypassed `run`), not a user-facing
    /// condition.
    #[error("Vault access denied - the gate is locked")]
    AccessDenied,

    /// Underlying SQLite failure.
    #[error("Vault store error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A thread panicked while holding the gate lock.
    #[error("Vault gate lock was poisoned")]
    LockPoisoned,
}

/// Counters exposed for observability and tests.
#[derive(Debug, Default)]
pub struct GateMetrics {
    unlocks: AtomicU64,
    denied: AtomicU64,
}

impl GateMetrics {
    /// Number of completed unlock/verify sequences (0→1 edges).
    pub fn unlock_count(&self) -> u64 {
        self.unlocks.load(Ordering::Relaxed)
    }

    /// Number of connection attempts refused while locked.
    pub fn denied_count(&self) -> u64 {
        self.denied.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct GateState {
    active_sessions: usize,
}

/// How the gate opens the underlying database file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenMode {
    /// Open an existing vault; a missing file is an error, never silently
    /// created (a directory entry pointing at a nonexistent vault must not
    /// materialize an empty one).
    Existing,
    /// Create the file if absent. Used only by provisioning.
    CreateIfMissing,
}

impl OpenMode {
    fn flags(self) -> OpenFlags {
        match self {
            Self::Existing => OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            Self::CreateIfMissing => {
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX
            }
        }
    }
}

/// Reference-counted access gate for one user's vault file.
pub struct VaultGate {
    path: PathBuf,
    key: VaultKey,
    mode: OpenMode,
    state: Mutex<GateState>,
    /// Readable without the gate lock (connection construction checks it on
    /// its own), but only ever mutated while the lock is held.
    access_allowed: AtomicBool,
    metrics: GateMetrics,
}

impl VaultGate {
    /// Gate an existing vault file with a candidate key.
    ///
    /// The key is not verified here - verification happens on the first
    /// `run` call (the 0→1 edge).
    pub fn open_existing(path: impl Into<PathBuf>, key: VaultKey) -> Self {
        Self::new(path.into(), key, OpenMode::Existing)
    }

    /// Gate a vault file that provisioning is about to create.
    ///
    /// The file is keyed before any schema is written, so it never exists in
    /// a readable-without-key state, even transiently.
    pub(crate) fn create_new(path: impl Into<PathBuf>, key: VaultKey) -> Self {
        Self::new(path.into(), key, OpenMode::CreateIfMissing)
    }

    fn new(path: PathBuf, key: VaultKey, mode: OpenMode) -> Self {
        Self {
            path,
            key,
            mode,
            state: Mutex::new(GateState::default()),
            access_allowed: AtomicBool::new(false),
            metrics: GateMetrics::default(),
        }
    }

    /// Path of the gated vault file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Observability counters.
    pub fn metrics(&self) -> &GateMetrics {
        &self.metrics
    }

    /// Run a unit of work with an open, verified connection.
    ///
    /// Acquires a session handle (unlocking the vault if this is the first
    /// concurrent caller), executes `f` with a fresh [`GuardedConnection`],
    /// and releases the handle on every exit path. The gate lock is held
    /// only for the counter transitions and the verify-on-first-entry step,
    /// never for the duration of `f`.
    pub fn run<T>(
        &self,
        f: impl FnOnce(&mut GuardedConnection) -> rusqlite::Result<T>,
    ) -> Result<T, GateError> {
        let _ticket = self.start_session()?;
        let mut conn = GuardedConnection::open(self)?;
        f(&mut conn).map_err(GateError::from)
    }

    /// Like [`run`](Self::run), but wraps `f` in a single transaction:
    /// commit on success, rollback on error (including panics, via drop).
    pub fn run_transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> rusqlite::Result<T>,
    ) -> Result<T, GateError> {
        let _ticket = self.start_session()?;
        let mut conn = GuardedConnection::open(self)?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Acquire a session handle, performing the unlock/verify sequence if
    /// the counter is at zero.
    fn start_session(&self) -> Result<SessionTicket<'_>, GateError> {
        let mut state = self.state.lock().map_err(|_| GateError::LockPoisoned)?;

        if state.active_sessions == 0 {
            // Verify before incrementing: an aborted unlock must leave the
            // counter at its pre-call value and the gate locked.
            self.verify_key()?;
            self.access_allowed.store(true, Ordering::Release);
            self.metrics.unlocks.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(vault = %self.path.display(), "vault gate unlocked");
        }

        state.active_sessions += 1;
        Ok(SessionTicket { gate: self })
    }

    /// The Unlocking step: open a connection, present the key, and read a
    /// schema marker. SQLCipher reports a wrong key as NOTADB ("file is not
    /// a database") on the first real page read.
    fn verify_key(&self) -> Result<(), GateError> {
        let conn = self.open_raw()?;
        conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(|e| {
            if e.sqlite_error_code() == Some(ErrorCode::NotADatabase) {
                GateError::InvalidKey
            } else {
                GateError::Sqlite(e)
            }
        })?;
        Ok(())
    }

    /// Open and key a raw connection. Callers outside the unlock path must
    /// go through [`GuardedConnection`].
    fn open_raw(&self) -> Result<Connection, GateError> {
        let conn = Connection::open_with_flags(&self.path, self.mode.flags())?;
        let key_pragma = self.key.to_sqlcipher_key();
        conn.pragma_update(None, "key", key_pragma.as_str())?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    fn end_session(&self) {
        // Never panic out of a drop path: on poison, take the inner state.
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.active_sessions -= 1;
        if state.active_sessions == 0 {
            self.access_allowed.store(false, Ordering::Release);
            tracing::debug!(vault = %self.path.display(), "vault gate locked");
        }
    }
}

impl std::fmt::Debug for VaultGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultGate")
            .field("path", &self.path)
            .field("access_allowed", &self.access_allowed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Scoped session handle; releasing happens in `Drop` so the counter is
/// decremented on every exit path, including early returns and panics.
struct SessionTicket<'a> {
    gate: &'a VaultGate,
}

impl Drop for SessionTicket<'_> {
    fn drop(&mut self) {
        self.gate.end_session();
    }
}

/// A keyed connection to the vault that can only be constructed while the
/// gate is unlocked.
///
/// Dereferences to [`rusqlite::Connection`], so the full query API is
/// available inside [`VaultGate::run`] closures.
pub struct GuardedConnection {
    inner: Connection,
}

impl GuardedConnection {
    /// Open a connection to the gated vault.
    ///
    /// Fails with [`GateError::AccessDenied`] unless the gate has flagged
    /// access allowed - independent of whether the file itself would be
    /// readable.
    pub fn open(gate: &VaultGate) -> Result<Self, GateError> {
        if !gate.access_allowed.load(Ordering::Acquire) {
            gate.metrics.denied.fetch_add(1, Ordering::Relaxed);
            return Err(GateError::AccessDenied);
        }
        let inner = gate.open_raw()?;
        Ok(Self { inner })
    }

    /// Begin a transaction on this connection.
    pub fn transaction(&mut self) -> rusqlite::Result<Transaction<'_>> {
        self.inner.transaction()
    }
}

impl std::ops::Deref for GuardedConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl std::ops::DerefMut for GuardedConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Barrier;
    use std::time::Duration;

    fn new_vault(dir: &Path) -> (PathBuf, VaultKey) {
        let path = dir.join("vault.db");
        let key = VaultKey::random();
        let gate = VaultGate::create_new(&path, key.clone());
        gate.run(|conn| {
            conn.execute_batch("CREATE TABLE marker (value TEXT NOT NULL);")?;
            conn.execute("INSERT INTO marker (value) VALUES ('ok')", [])?;
            Ok(())
        })
        .unwrap();
        (path, key)
    }

    #[test]
    fn unlock_verify_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let (path, key) = new_vault(dir.path());

        let gate = VaultGate::open_existing(&path, key);
        let value: String = gate
            .run(|conn| conn.query_row("SELECT value FROM marker", [], |row| row.get(0)))
            .unwrap();
        assert_eq!(value, "ok");
        assert_eq!(gate.metrics().unlock_count(), 1);
    }

    #[test]
    fn wrong_key_is_rejected_and_gate_stays_locked() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _key) = new_vault(dir.path());

        let gate = VaultGate::open_existing(&path, VaultKey::random());
        let result = gate.run(|conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)));
        assert!(matches!(result, Err(GateError::InvalidKey)));
        assert_eq!(gate.metrics().unlock_count(), 0);
        assert!(matches!(
            GuardedConnection::open(&gate),
            Err(GateError::AccessDenied)
        ));
    }

    #[test]
    fn missing_vault_file_is_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.db");

        let gate = VaultGate::open_existing(&path, VaultKey::random());
        let result = gate.run(|conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)));
        assert!(matches!(result, Err(GateError::Sqlite(_))));
        assert!(!path.exists());
    }

    #[test]
    fn concurrent_runs_unlock_once_then_relock() {
        let dir = tempfile::tempdir().unwrap();
        let (path, key) = new_vault(dir.path());

        let gate = Arc::new(VaultGate::open_existing(&path, key));
        let unlocks_before = gate.metrics().unlock_count();

        const WORKERS: usize = 8;
        let barrier = Arc::new(Barrier::new(WORKERS));
        let handles: Vec<_> = (0..WORKERS)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    gate.run(|conn| {
                        let value: String =
                            conn.query_row("SELECT value FROM marker", [], |row| row.get(0))?;
                        // Keep the session open long enough for the other
                        // workers to arrive while the gate is unlocked.
                        std::thread::sleep(Duration::from_millis(50));
                        Ok(value)
                    })
                    .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), "ok");
        }

        // One unlock for the whole burst, then back to Locked.
        assert_eq!(gate.metrics().unlock_count(), unlocks_before + 1);
        assert!(matches!(
            GuardedConnection::open(&gate),
            Err(GateError::AccessDenied)
        ));
    }

    #[test]
    fn failed_operation_still_releases_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let (path, key) = new_vault(dir.path());

        let gate = VaultGate::open_existing(&path, key);
        let result = gate.run(|conn| {
            conn.query_row("SELECT value FROM no_such_table", [], |row| {
                row.get::<_, String>(0)
            })
        });
        assert!(matches!(result, Err(GateError::Sqlite(_))));
        // The ticket released on the error path; the gate must be locked.
        assert!(matches!(
            GuardedConnection::open(&gate),
            Err(GateError::AccessDenied)
        ));
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let (path, key) = new_vault(dir.path());

        let gate = VaultGate::open_existing(&path, key);
        let result = gate.run_transaction(|tx| {
            tx.execute("INSERT INTO marker (value) VALUES ('partial')", [])?;
            tx.query_row("SELECT * FROM no_such_table", [], |_| Ok(()))
        });
        assert!(result.is_err());

        let count: i64 = gate
            .run(|conn| {
                conn.query_row(
                    "SELECT count(*) FROM marker WHERE value = 'partial'",
                    [],
                    |row| row.get(0),
                )
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
