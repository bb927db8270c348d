//! Authentication and per-user encrypted vault layer for LedgerVault.
//!
//! The subsystem derives a durable secret from a low-entropy credential,
//! gates access to a per-user SQLCipher-encrypted data file through a
//! session-reference-counted unlock, and supports a secondary recovery-key
//! unlock path via key wrapping.
//!
//! # Overview
//!
//! - [`crypto`] - pure key derivation and AEAD envelope primitives.
//! - [`directory`] - the shared identity directory (hashed username →
//!   vault location, salt, wrapped key).
//! - [`vault`] - the access gate, provisioning workflow, and session state.
//! - [`auth`] - credential login flows and the error taxonomy.
//! - [`AppContext`] - the dependency-injected root tying it together.
//!
//! # Example
//!
//! ```no_run
//! use ledgervault_core::{AppContext, CredentialKind};
//!
//! let ctx = AppContext::open("/path/to/data")?;
//! let recovery = ctx.register("alice", "Secret123")?;
//! println!("store this somewhere safe: {}", recovery.expose());
//!
//! let balance: f64 = ctx.with_vault(|conn| {
//!     conn.query_row("SELECT balance FROM accounts WHERE account_id = 1", [], |row| {
//!         row.get(0)
//!     })
//! })?;
//! # Ok::<(), ledgervault_core::AuthError>(())
//! ```

#![forbid(unsafe_code)]

pub mod auth;
pub mod context;
pub mod crypto;
pub mod directory;
pub mod vault;

pub use auth::{AuthError, CredentialKind};
pub use context::AppContext;
pub use crypto::kdf::{KdfParams, RecoverySecret};
pub use directory::{DirectoryStore, IdentityColumn, IdentityRecord, ScriptKind};
pub use vault::{GateError, GuardedConnection, Session, VaultGate};

// Re-exported so consumers share the crate's SQLite types in closures.
pub use rusqlite;
