//! Session state machine.
//!
//! `SessionController` drives `Unknown → Loading → Authenticated |
//! Unauthenticated` and publishes every transition on a `watch` channel.
//! Front ends hold a receiver and render from it; they change the session
//! only by calling the controller's operations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{extract_detail, ApiClient, ApiError, ClientEvent};
use crate::auth::SessionStore;
use crate::models::{NewAccount, SessionState};

/// Message shown when the server rejects a sign-in without saying why.
const DEFAULT_INVALID_CREDENTIALS: &str = "Invalid email or password";

/// Sign-in and sign-up failures, shaped for display.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("{detail}")]
    InvalidCredentials { detail: String },

    #[error("{detail}")]
    Rejected { status: StatusCode, detail: String },

    #[error("Could not reach the server: {0}")]
    Network(String),

    #[error("Server error ({status}): {detail}")]
    Server { status: StatusCode, detail: String },

    #[error("Session storage failed: {0}")]
    Storage(String),

    #[error("Signed in, but the account profile could not be loaded")]
    IdentityUnavailable,

    #[error("{0}")]
    Unexpected(String),
}

impl From<ApiError> for AuthError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::AuthRejected { body } => {
                let detail = extract_detail(&body);
                AuthError::InvalidCredentials {
                    detail: if detail.is_empty() {
                        DEFAULT_INVALID_CREDENTIALS.to_string()
                    } else {
                        detail
                    },
                }
            }
            ApiError::Validation { status, body } => AuthError::Rejected {
                status,
                detail: extract_detail(&body),
            },
            ApiError::Server { status, body } => AuthError::Server {
                status,
                detail: extract_detail(&body),
            },
            ApiError::Network(e) => AuthError::Network(e.to_string()),
            ApiError::Storage(e) => AuthError::Storage(e.to_string()),
            other => AuthError::Unexpected(other.to_string()),
        }
    }
}

/// Owner of the derived session value.
///
/// Create one per application with [`SessionController::init`] and pass it
/// to whatever needs to observe or change the session.
pub struct SessionController {
    client: Arc<ApiClient>,
    state: Arc<watch::Sender<SessionState>>,
    /// Bumped whenever the session ends; identity checks started under an
    /// older generation do not publish their result.
    generation: Arc<AtomicU64>,
    listener: JoinHandle<()>,
}

impl SessionController {
    /// Build the controller in the `Unknown` state.
    ///
    /// Spawns a task that moves the session to `Unauthenticated` when the
    /// client reports that a refresh failed, so must be called from within a
    /// tokio runtime.
    pub fn init(client: Arc<ApiClient>) -> Self {
        let state = Arc::new(watch::Sender::new(SessionState::Unknown));
        let generation = Arc::new(AtomicU64::new(0));
        let listener = tokio::spawn(watch_for_expiry(
            client.subscribe(),
            client.store().clone(),
            state.clone(),
            generation.clone(),
        ));

        Self {
            client,
            state,
            generation,
            listener,
        }
    }

    pub fn client(&self) -> &Arc<ApiClient> {
        &self.client
    }

    /// Snapshot of the current session.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receiver that sees every subsequent transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        let current = self.state.borrow();
        if previous.label() != current.label() {
            debug!(from = previous.label(), to = current.label(), "Session state changed");
        }
    }

    /// Publish `next` unless the session ended after `generation` was read.
    fn set_state_if_current(&self, generation: u64, next: SessionState) -> bool {
        let mut published = false;
        self.state.send_if_modified(|current| {
            if self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            if current.label() != next.label() {
                debug!(from = current.label(), to = next.label(), "Session state changed");
            }
            *current = next;
            published = true;
            true
        });
        published
    }

    /// Move to `Unauthenticated` and invalidate in-flight identity checks.
    fn end_session(&self) {
        self.state.send_modify(|current| {
            self.generation.fetch_add(1, Ordering::SeqCst);
            if *current != SessionState::Unauthenticated {
                debug!(from = current.label(), to = "unauthenticated", "Session state changed");
            }
            *current = SessionState::Unauthenticated;
        });
    }

    /// Initial session check at application startup.
    pub async fn start(&self) -> bool {
        info!("Starting session");
        self.set_state(SessionState::Loading);
        self.check_session().await
    }

    /// Validate the stored credentials against the identity endpoint.
    ///
    /// Returns whether the session is authenticated afterwards. An already
    /// authenticated session stays visible while it is re-validated.
    pub async fn check_session(&self) -> bool {
        let generation = self.generation.load(Ordering::SeqCst);
        if !self.is_authenticated() {
            self.set_state(SessionState::Loading);
        }

        match self.client.store().load() {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!("No stored credentials");
                self.set_state(SessionState::Unauthenticated);
                return false;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read stored credentials");
                self.set_state(SessionState::Unauthenticated);
                return false;
            }
        }

        match self.client.me().await {
            Ok(user) => {
                let username = user.username.clone();
                if self.set_state_if_current(generation, SessionState::Authenticated(user)) {
                    info!(%username, "Session is valid");
                    true
                } else {
                    debug!(%username, "Session ended during identity check, discarding result");
                    false
                }
            }
            Err(e) => {
                if e.is_auth_failure() {
                    info!(error = %e, "Session is no longer valid");
                } else {
                    warn!(error = %e, "Identity check failed");
                }
                self.set_state_if_current(generation, SessionState::Unauthenticated);
                false
            }
        }
    }

    /// Sign in, then load the profile from the identity endpoint.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), AuthError> {
        self.client.login(email, password).await.map_err(|e| {
            warn!(error = %e, "Sign-in failed");
            AuthError::from(e)
        })?;
        self.finish_sign_in().await
    }

    /// Create an account, then load its profile from the identity endpoint.
    pub async fn sign_up(&self, account: NewAccount) -> Result<(), AuthError> {
        self.client.register(&account).await.map_err(|e| {
            warn!(error = %e, "Sign-up failed");
            AuthError::from(e)
        })?;
        self.finish_sign_in().await
    }

    async fn finish_sign_in(&self) -> Result<(), AuthError> {
        if self.check_session().await {
            Ok(())
        } else {
            Err(AuthError::IdentityUnavailable)
        }
    }

    /// End the session. Local state is cleared even if the server call fails.
    pub async fn sign_out(&self) {
        if let Err(e) = self.client.logout().await {
            warn!(error = %e, "Remote sign-out failed, local session cleared anyway");
            // logout() clears before reporting the remote error; retry in
            // case the clear itself was what failed
            if let Err(e) = self.client.store().clear() {
                warn!(error = %e, "Failed to clear stored credentials");
            }
        }
        self.end_session();
        info!("Signed out");
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Move the session to `Unauthenticated` whenever a refresh fails.
///
/// An expiry event that arrives after the user has already signed in again
/// finds a pair in the store and is ignored.
async fn watch_for_expiry(
    mut events: broadcast::Receiver<ClientEvent>,
    store: Arc<dyn SessionStore>,
    state: Arc<watch::Sender<SessionState>>,
    generation: Arc<AtomicU64>,
) {
    loop {
        match events.recv().await {
            Ok(ClientEvent::SessionExpired) => expire_if_cleared(store.as_ref(), &state, &generation),
            Ok(ClientEvent::Refreshed) => debug!("Credentials refreshed"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Missed client events");
                expire_if_cleared(store.as_ref(), &state, &generation);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn expire_if_cleared(
    store: &dyn SessionStore,
    state: &watch::Sender<SessionState>,
    generation: &AtomicU64,
) {
    match store.load() {
        Ok(Some(_)) => debug!("Store holds credentials, ignoring expiry"),
        Ok(None) | Err(_) => {
            state.send_if_modified(|current| {
                generation.fetch_add(1, Ordering::SeqCst);
                if *current == SessionState::Unauthenticated {
                    return false;
                }
                info!("Session expired");
                *current = SessionState::Unauthenticated;
                true
            });
        }
    }
}
