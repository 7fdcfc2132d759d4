//! Credential persistence.
//!
//! This module provides:
//! - `SessionStore`: the load/save/clear contract for the single token pair
//! - `FileStore`: JSON file with atomic replace, the default backend
//! - `KeyringStore`: OS-level credential storage via keyring
//! - `MemoryStore`: process-local, for tests and throwaway sessions
//!
//! No expiry is tracked here. A pair is valid until the server says otherwise.

pub mod credentials;
pub mod session;
pub mod store;

pub use credentials::KeyringStore;
pub use session::FileStore;
pub use store::{MemoryStore, SessionStore, StoreError, STORAGE_KEY};
