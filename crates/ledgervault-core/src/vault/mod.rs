//! Vault-level abstractions: the access gate, provisioning, and session
//! state.

pub mod gate;
pub(crate) mod provision;
pub mod session;

// Re-export commonly used types
pub use gate::{GateError, GateMetrics, GuardedConnection, VaultGate};
pub use session::Session;
