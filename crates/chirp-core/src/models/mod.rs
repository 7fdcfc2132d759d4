//! Data models shared by the API client and the session controller.
//!
//! - `CredentialPair`: access/refresh token pair, the unit of persistence
//! - `UserProfile`, `NewAccount`: identity record and sign-up payload
//! - `SessionState`: the four-state session machine observed by front ends

pub mod credentials;
pub mod session;
pub mod user;

pub use credentials::CredentialPair;
pub(crate) use credentials::RefreshRequest;
pub use session::SessionState;
pub use user::{NewAccount, UserProfile};
