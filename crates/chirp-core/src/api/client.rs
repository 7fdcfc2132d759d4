//! Authenticated client for the social API.
//!
//! Every request is signed with the stored access token. A 401 triggers a
//! single coordinated refresh of the token pair, after which the original
//! request is replayed exactly once.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client, Method, StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::auth::SessionStore;
use crate::models::{CredentialPair, NewAccount, RefreshRequest, UserProfile};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// API location used when nothing is configured.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// HTTP request timeout in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Buffered client events per subscriber before the oldest are dropped.
const EVENT_CHANNEL_CAPACITY: usize = 16;

const LOGIN_PATH: &str = "/auth/login";
const REGISTER_PATH: &str = "/auth/register";
const REFRESH_PATH: &str = "/auth/refresh-token";
const ME_PATH: &str = "/auth/me";
const LOGOUT_PATH: &str = "/auth/logout";

/// Session-level events emitted by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    /// A new token pair was obtained and stored.
    Refreshed,
    /// Refresh failed and the stored pair was cleared.
    SessionExpired,
}

/// Outbound request payload.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

/// Successful response, fully buffered so it outlives the connection.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    headers: header::HeaderMap,
    body: Vec<u8>,
}

impl ApiResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &header::HeaderMap {
        &self.headers
    }

    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ApiError::Decode(format!("unexpected response body: {}", e)))
    }
}

/// A request as issued by the caller, kept so it can be replayed after a
/// refresh.
struct PendingRequest {
    method: Method,
    url: Url,
    body: Option<RequestBody>,
    headers: header::HeaderMap,
}

/// API client shared by everything that talks to the server.
///
/// Share it behind an `Arc`; the refresh lock only coordinates requests that
/// go through the same instance.
pub struct ApiClient {
    client: Client,
    base_url: String,
    store: Arc<dyn SessionStore>,
    refresh_lock: Mutex<()>,
    events: broadcast::Sender<ClientEvent>,
}

impl ApiClient {
    /// Create a new API client against `base_url`.
    pub fn new(base_url: impl Into<String>, store: Arc<dyn SessionStore>) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, store, Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        store: Arc<dyn SessionStore>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Url::parse(&base_url)
            .map_err(|e| ApiError::InvalidRequest(format!("bad base URL {}: {}", base_url, e)))?;

        let client = Client::builder().timeout(timeout).build()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            client,
            base_url,
            store,
            refresh_lock: Mutex::new(()),
            events,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Receive [`ClientEvent`]s from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        let joined = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        Url::parse(&joined).map_err(|e| ApiError::InvalidRequest(format!("bad path {}: {}", path, e)))
    }

    fn auth_headers(credentials: Option<&CredentialPair>) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        if let Some(pair) = credentials {
            let mut value = header::HeaderValue::from_str(&pair.authorization_value())
                .map_err(|_| ApiError::InvalidRequest("access token is not a valid header value".to_string()))?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Buffer the response, returning an error with the body if it failed.
    async fn check_response(response: reqwest::Response) -> Result<ApiResponse, ApiError> {
        let status = response.status();
        let headers = response.headers().clone();

        if status.is_success() {
            let body = response.bytes().await?.to_vec();
            return Ok(ApiResponse { status, headers, body });
        }

        // The status already arrived; a body that fails to read is reported as empty
        let body = match response.bytes().await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!(%status, error = %e, "Failed to read error response body");
                String::new()
            }
        };
        Err(ApiError::from_status(status, body))
    }

    async fn dispatch(
        &self,
        pending: &PendingRequest,
        credentials: Option<&CredentialPair>,
    ) -> Result<reqwest::Response, ApiError> {
        let mut builder = self
            .client
            .request(pending.method.clone(), pending.url.clone())
            .headers(pending.headers.clone())
            .headers(Self::auth_headers(credentials)?);

        builder = match &pending.body {
            Some(RequestBody::Json(value)) => builder.json(value),
            Some(RequestBody::Form(fields)) => builder.form(fields),
            None => builder,
        };

        debug!(
            method = %pending.method,
            path = pending.url.path(),
            authenticated = credentials.is_some(),
            "Sending request"
        );
        Ok(builder.send().await?)
    }

    // ===== Authenticated Requests =====

    /// Send a request with the stored credentials attached.
    ///
    /// A 401 on a signed request refreshes the token pair (once, shared with
    /// any other request that hit a 401 at the same time) and replays the
    /// request with the new access token. A 401 on the replay is returned as
    /// [`ApiError::AuthRejected`]. A failed refresh clears the store and
    /// returns [`ApiError::AuthExpired`].
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<RequestBody>,
        headers: Option<header::HeaderMap>,
    ) -> Result<ApiResponse, ApiError> {
        let pending = PendingRequest {
            method,
            url: self.url(path)?,
            body,
            headers: headers.unwrap_or_default(),
        };

        let credentials = self.store.load()?;
        let response = self.dispatch(&pending, credentials.as_ref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::check_response(response).await;
        }

        let Some(rejected) = credentials else {
            debug!(path, "Unauthorized without stored credentials, nothing to refresh");
            return Self::check_response(response).await;
        };
        drop(response);

        let fresh = self.refresh_after_rejection(&rejected).await?;
        debug!(path, "Retrying request with refreshed credentials");
        let retried = self.dispatch(&pending, Some(&fresh)).await?;
        Self::check_response(retried).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::GET, path, None, None).await?.json()
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("unserializable body: {}", e)))?;
        self.request(Method::POST, path, Some(RequestBody::Json(value)), None)
            .await?
            .json()
    }

    // ===== Refresh Protocol =====

    /// Obtain credentials to replace `rejected`, refreshing at most once
    /// across all concurrent callers.
    async fn refresh_after_rejection(&self, rejected: &CredentialPair) -> Result<CredentialPair, ApiError> {
        let _guard = self.refresh_lock.lock().await;

        match self.store.load()? {
            Some(current) if current.access_token != rejected.access_token => {
                debug!("Credentials already refreshed by a concurrent request");
                Ok(current)
            }
            Some(current) => self.refresh(&current).await,
            None => Err(ApiError::AuthExpired {
                reason: "session ended while waiting for refresh".to_string(),
            }),
        }
    }

    /// Exchange the refresh token for a new pair. Must hold the refresh lock.
    async fn refresh(&self, current: &CredentialPair) -> Result<CredentialPair, ApiError> {
        info!("Access token rejected, refreshing credentials");

        match self.call_refresh_endpoint(&current.refresh_token).await {
            Ok(pair) => {
                self.store.save(&pair)?;
                let _ = self.events.send(ClientEvent::Refreshed);
                info!("Credentials refreshed");
                Ok(pair)
            }
            Err(e) => {
                warn!(error = %e, "Credential refresh failed, clearing session");
                if let Err(clear_err) = self.store.clear() {
                    warn!(error = %clear_err, "Failed to clear stored credentials");
                }
                let _ = self.events.send(ClientEvent::SessionExpired);
                Err(ApiError::AuthExpired { reason: e.to_string() })
            }
        }
    }

    async fn call_refresh_endpoint(&self, refresh_token: &str) -> Result<CredentialPair, ApiError> {
        let response = self
            .client
            .post(self.url(REFRESH_PATH)?)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        Self::parse_credentials(Self::check_response(response).await?)
    }

    fn parse_credentials(response: ApiResponse) -> Result<CredentialPair, ApiError> {
        let pair: CredentialPair = response.json()?;
        if !pair.is_well_formed() {
            return Err(ApiError::Decode("token response is missing a token".to_string()));
        }
        Ok(pair)
    }

    // ===== Authentication Service =====
    //
    // Sign-in and sign-up establish a session, so a 401 from them means bad
    // credentials and never goes through the refresh protocol.

    /// Sign in with email and password, persisting the issued pair.
    pub async fn login(&self, email: &str, password: &str) -> Result<CredentialPair, ApiError> {
        let response = self
            .client
            .post(self.url(LOGIN_PATH)?)
            .form(&[("username", email), ("password", password)])
            .send()
            .await?;

        let pair = Self::parse_credentials(Self::check_response(response).await?)?;
        self.store.save(&pair)?;
        info!("Signed in");
        Ok(pair)
    }

    /// Create an account, persisting the issued pair.
    pub async fn register(&self, account: &NewAccount) -> Result<CredentialPair, ApiError> {
        let response = self
            .client
            .post(self.url(REGISTER_PATH)?)
            .json(account)
            .send()
            .await?;

        let pair = Self::parse_credentials(Self::check_response(response).await?)?;
        self.store.save(&pair)?;
        info!(username = %account.username, "Registered new account");
        Ok(pair)
    }

    /// Fetch the identity of the signed-in user.
    pub async fn me(&self) -> Result<UserProfile, ApiError> {
        self.get_json(ME_PATH).await
    }

    /// Revoke the access token on the server and clear the store.
    ///
    /// The store is cleared whatever the server says; the returned error only
    /// reports that the remote call failed.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let remote = match self.store.load() {
            Ok(Some(pair)) => self.call_logout_endpoint(&pair).await,
            Ok(None) => Ok(()),
            Err(e) => Err(e.into()),
        };

        self.store.clear()?;
        remote
    }

    async fn call_logout_endpoint(&self, pair: &CredentialPair) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url(LOGOUT_PATH)?)
            .headers(Self::auth_headers(Some(pair))?)
            .send()
            .await?;

        Self::check_response(response).await.map(|_| ())
    }
}
