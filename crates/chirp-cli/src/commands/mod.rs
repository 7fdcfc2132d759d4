//! Subcommand implementations.
//!
//! Each command drives the shared `SessionController`; none of them touch
//! the credential store directly.

pub mod auth;
pub mod request;
