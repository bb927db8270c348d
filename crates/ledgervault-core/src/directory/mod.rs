//! The identity directory: a shared, multi-tenant SQLite store mapping
//! hashed usernames to vault locations and wrapped keys.
//!
//! The directory is plaintext at rest - nothing in it is secret-bearing
//! except per-user salts and vault keys wrapped under recovery secrets. It
//! also carries the template scripts from which every per-user vault schema
//! is created, so provisioning is data-driven rather than hardcoded per
//! release.
//!
//! Writes (registration) are rare; reads are frequent but single-row. A
//! plain `Mutex<Connection>` is sufficient - this store never coordinates
//! with the vault access gate, which guards a different database.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use thiserror::Error;

/// Errors from identity directory operations.
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// An identity with the same username hash already exists.
    #[error("Identity already registered")]
    IdentityExists,

    /// No identity row matched the requested username hash.
    #[error("No identity for the requested username hash")]
    NoSuchIdentity,

    /// Underlying SQLite failure.
    #[error("Directory store error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A thread panicked while holding the directory connection.
    #[error("Directory store lock was poisoned")]
    LockPoisoned,
}

/// One registered user, as stored in the directory.
///
/// The plaintext username never appears here - `username_hash` is the only
/// identity-derived value the directory ever sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    /// One-way hash of the normalized username; primary lookup key.
    pub username_hash: String,
    /// Opaque, randomly-derived filename of the user's vault.
    pub vault_filename: String,
    /// Random per-user salt, base64; fixed at creation, never rotated.
    pub password_salt: String,
    /// The vault key wrapped under a key derived from the recovery secret.
    pub wrapped_vault_key: String,
}

/// Columns of an identity row that can be fetched individually.
///
/// A typed enum rather than a column-name string: lookups stay
/// injection-proof and exhaustive at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityColumn {
    /// The user's vault filename.
    VaultFilename,
    /// The user's password salt.
    PasswordSalt,
    /// The wrapped vault key for recovery login.
    WrappedVaultKey,
}

impl IdentityColumn {
    fn as_sql(self) -> &'static str {
        match self {
            Self::VaultFilename => "vault_filename",
            Self::PasswordSalt => "password_salt",
            Self::WrappedVaultKey => "wrapped_vault_key",
        }
    }
}

/// Kinds of vault template scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    /// Schema-creation DDL, run first.
    CreateTable,
    /// Default reference data, run inside one transaction.
    InsertDefaults,
}

impl ScriptKind {
    fn as_sql(self) -> &'static str {
        match self {
            Self::CreateTable => "create_table",
            Self::InsertDefaults => "insert_defaults",
        }
    }
}

const DIRECTORY_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    username_hash     TEXT PRIMARY KEY,
    vault_filename    TEXT NOT NULL,
    password_salt     TEXT NOT NULL,
    wrapped_vault_key TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS vault_scripts (
    script_id  INTEGER PRIMARY KEY,
    kind       TEXT NOT NULL CHECK (kind IN ('create_table', 'insert_defaults')),
    script_sql TEXT NOT NULL
);
";

/// Template scripts seeded on first open. Every new vault's schema and
/// default reference data comes from these rows, in `script_id` order.
const VAULT_TEMPLATE_SCRIPTS: &[(ScriptKind, &str)] = &[
    (
        ScriptKind::CreateTable,
        "CREATE TABLE currencies (
            currency_code   TEXT PRIMARY KEY,
            currency_symbol TEXT NOT NULL,
            currency_name   TEXT NOT NULL
        ) WITHOUT ROWID;",
    ),
    (
        ScriptKind::CreateTable,
        "CREATE TABLE categories (
            category_id        INTEGER PRIMARY KEY,
            category_name      TEXT NOT NULL,
            category_type      TEXT NOT NULL CHECK (category_type IN ('income', 'expense')),
            parent_category_id INTEGER REFERENCES categories (category_id)
        );",
    ),
    (
        ScriptKind::CreateTable,
        "CREATE TABLE accounts (
            account_id    INTEGER PRIMARY KEY,
            account_name  TEXT NOT NULL,
            currency_code TEXT NOT NULL REFERENCES currencies (currency_code),
            balance       REAL NOT NULL DEFAULT 0
        );",
    ),
    (
        ScriptKind::CreateTable,
        "CREATE TABLE transactions (
            transaction_id INTEGER PRIMARY KEY,
            account_id     INTEGER NOT NULL REFERENCES accounts (account_id),
            category_id    INTEGER REFERENCES categories (category_id),
            amount         REAL NOT NULL,
            description    TEXT,
            occurred_on    TEXT NOT NULL
        );",
    ),
    (
        ScriptKind::InsertDefaults,
        "INSERT INTO currencies (currency_code, currency_symbol, currency_name) VALUES
            ('USD', '$', 'US Dollar'),
            ('EUR', '€', 'Euro'),
            ('GBP', '£', 'Pound Sterling'),
            ('JPY', '¥', 'Japanese Yen');",
    ),
    (
        ScriptKind::InsertDefaults,
        "INSERT INTO categories (category_name, category_type, parent_category_id) VALUES
            ('Salary', 'income', NULL),
            ('Groceries', 'expense', NULL),
            ('Housing', 'expense', NULL),
            ('Transport', 'expense', NULL),
            ('Entertainment', 'expense', NULL);",
    ),
    (
        ScriptKind::InsertDefaults,
        "INSERT INTO accounts (account_name, currency_code, balance) VALUES
            ('Main', 'USD', 0);",
    ),
];

/// Handle to the shared directory database.
///
/// One instance per process, constructed explicitly and passed to the login
/// and provisioning flows (no hidden global state).
pub struct DirectoryStore {
    conn: Mutex<Connection>,
}

impl DirectoryStore {
    /// Open (or create) the directory database at `path`, applying the
    /// schema and seeding template scripts if the store is new.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DirectoryError> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        conn.execute_batch(DIRECTORY_SCHEMA)?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.seed_scripts()?;
        tracing::debug!(path = %path.as_ref().display(), "identity directory opened");
        Ok(store)
    }

    /// Open an in-memory directory. Test support.
    #[cfg(test)]
    pub(crate) fn open_in_memory() -> Result<Self, DirectoryError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(DIRECTORY_SCHEMA)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.seed_scripts()?;
        Ok(store)
    }

    fn seed_scripts(&self) -> Result<(), DirectoryError> {
        let conn = self.lock()?;
        let existing: i64 =
            conn.query_row("SELECT count(*) FROM vault_scripts", [], |row| row.get(0))?;
        if existing > 0 {
            return Ok(());
        }
        for (kind, sql) in VAULT_TEMPLATE_SCRIPTS {
            conn.execute(
                "INSERT INTO vault_scripts (kind, script_sql) VALUES (?1, ?2)",
                params![kind.as_sql(), sql],
            )?;
        }
        tracing::info!(
            scripts = VAULT_TEMPLATE_SCRIPTS.len(),
            "seeded vault template scripts"
        );
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, DirectoryError> {
        self.conn.lock().map_err(|_| DirectoryError::LockPoisoned)
    }

    /// Fetch the full identity record for a username hash.
    pub fn lookup(&self, username_hash: &str) -> Result<Option<IdentityRecord>, DirectoryError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT username_hash, vault_filename, password_salt, wrapped_vault_key
             FROM identities WHERE username_hash = ?1",
            params![username_hash],
            |row| {
                Ok(IdentityRecord {
                    username_hash: row.get(0)?,
                    vault_filename: row.get(1)?,
                    password_salt: row.get(2)?,
                    wrapped_vault_key: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    /// Check whether an identity exists for a username hash.
    pub fn exists(&self, username_hash: &str) -> Result<bool, DirectoryError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT 1 FROM identities WHERE username_hash = ?1 LIMIT 1",
            params![username_hash],
            |_| Ok(()),
        )
        .optional()
        .map(|row| row.is_some())
        .map_err(Into::into)
    }

    /// Insert a new identity record.
    ///
    /// Fails with [`DirectoryError::IdentityExists`] if the username hash is
    /// already registered - the idempotent registration guard.
    pub fn insert(&self, record: &IdentityRecord) -> Result<(), DirectoryError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO identities (username_hash, vault_filename, password_salt, wrapped_vault_key)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.username_hash,
                record.vault_filename,
                record.password_salt,
                record.wrapped_vault_key,
            ],
        )
        .map(|_| ())
        .map_err(|e| {
            if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) {
                DirectoryError::IdentityExists
            } else {
                DirectoryError::Sqlite(e)
            }
        })
    }

    /// Fetch a single column of an identity row.
    ///
    /// The login path uses this to read only the field it needs (salt for
    /// password login, wrapped key for recovery login).
    pub fn get_column(
        &self,
        username_hash: &str,
        column: IdentityColumn,
    ) -> Result<String, DirectoryError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM identities WHERE username_hash = ?1",
            column.as_sql()
        );
        conn.query_row(&sql, params![username_hash], |row| row.get(0))
            .optional()?
            .ok_or(DirectoryError::NoSuchIdentity)
    }

    /// Fetch the vault template scripts of one kind, in execution order.
    pub fn schema_scripts(&self, kind: ScriptKind) -> Result<Vec<String>, DirectoryError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT script_sql FROM vault_scripts WHERE kind = ?1 ORDER BY script_id ASC",
        )?;
        let scripts = stmt
            .query_map(params![kind.as_sql()], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(scripts)
    }

    /// Run a closure against the directory connection.
    ///
    /// This backs the application-facing `with_directory` entry point for
    /// shared reference data; the identity operations above should be used
    /// for identity rows.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, DirectoryError> {
        let conn = self.lock()?;
        f(&conn).map_err(Into::into)
    }
}

impl std::fmt::Debug for DirectoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(hash: &str) -> IdentityRecord {
        IdentityRecord {
            username_hash: hash.to_string(),
            vault_filename: "0011223344556677889900aa.db".to_string(),
            password_salt: "c2FsdHNhbHRzYWx0c2FsdA==".to_string(),
            wrapped_vault_key: "bm90IGEgcmVhbCBlbnZlbG9wZQ==".to_string(),
        }
    }

    #[test]
    fn insert_then_lookup() {
        let store = DirectoryStore::open_in_memory().unwrap();
        let record = sample_record("hash-a");
        store.insert(&record).unwrap();

        assert!(store.exists("hash-a").unwrap());
        assert!(!store.exists("hash-b").unwrap());
        assert_eq!(store.lookup("hash-a").unwrap(), Some(record));
        assert_eq!(store.lookup("hash-b").unwrap(), None);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let store = DirectoryStore::open_in_memory().unwrap();
        store.insert(&sample_record("hash-a")).unwrap();
        let result = store.insert(&sample_record("hash-a"));
        assert!(matches!(result, Err(DirectoryError::IdentityExists)));
    }

    #[test]
    fn single_column_lookup() {
        let store = DirectoryStore::open_in_memory().unwrap();
        let record = sample_record("hash-a");
        store.insert(&record).unwrap();

        assert_eq!(
            store
                .get_column("hash-a", IdentityColumn::PasswordSalt)
                .unwrap(),
            record.password_salt
        );
        assert_eq!(
            store
                .get_column("hash-a", IdentityColumn::VaultFilename)
                .unwrap(),
            record.vault_filename
        );
        assert!(matches!(
            store.get_column("hash-b", IdentityColumn::WrappedVaultKey),
            Err(DirectoryError::NoSuchIdentity)
        ));
    }

    #[test]
    fn template_scripts_are_seeded_in_order() {
        let store = DirectoryStore::open_in_memory().unwrap();
        let ddl = store.schema_scripts(ScriptKind::CreateTable).unwrap();
        let defaults = store.schema_scripts(ScriptKind::InsertDefaults).unwrap();

        assert!(!ddl.is_empty());
        assert!(!defaults.is_empty());
        // currencies must be created before accounts references it
        let currencies = ddl.iter().position(|s| s.contains("CREATE TABLE currencies"));
        let accounts = ddl.iter().position(|s| s.contains("CREATE TABLE accounts"));
        assert!(currencies.unwrap() < accounts.unwrap());
    }

    #[test]
    fn reopening_does_not_duplicate_seeds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("directory.db");

        let first = DirectoryStore::open(&path).unwrap();
        let count = first.schema_scripts(ScriptKind::CreateTable).unwrap().len();
        drop(first);

        let second = DirectoryStore::open(&path).unwrap();
        assert_eq!(
            second.schema_scripts(ScriptKind::CreateTable).unwrap().len(),
            count
        );
    }
}
