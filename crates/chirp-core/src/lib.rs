//! chirp-core: authenticated access layer for the chirp social API.
//!
//! Three layers, bottom to top:
//!
//! - [`auth`]: `SessionStore` backends that persist the single token pair
//! - [`api`]: `ApiClient`, which signs requests and refreshes expired tokens
//! - [`controller`]: `SessionController`, the session state machine that
//!   front ends observe

pub mod api;
pub mod auth;
pub mod config;
pub mod controller;
pub mod models;

pub use api::{ApiClient, ApiError, ApiResponse, ClientEvent, RequestBody};
pub use auth::{FileStore, KeyringStore, MemoryStore, SessionStore, StoreError};
pub use config::{Config, StoreKind};
pub use controller::{AuthError, SessionController};
pub use models::{CredentialPair, NewAccount, SessionState, UserProfile};
