use reqwest::StatusCode;
use thiserror::Error;

use crate::auth::StoreError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unauthorized - credentials were rejected")]
    AuthRejected { body: String },

    #[error("Session expired - please sign in again ({reason})")]
    AuthExpired { reason: String },

    #[error("Request rejected ({status}): {}", truncate_body(.body))]
    Validation { status: StatusCode, body: String },

    #[error("Server error ({status}): {}", truncate_body(.body))]
    Server { status: StatusCode, body: String },

    #[error("Unexpected status {status}: {}", truncate_body(.body))]
    Unexpected { status: StatusCode, body: String },

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Session storage failed: {0}")]
    Storage(#[from] StoreError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Truncate a response body to avoid logging excessive data
fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

impl ApiError {
    /// Classify a non-success response.
    pub fn from_status(status: StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 => ApiError::AuthRejected { body },
            400..=499 => ApiError::Validation { status, body },
            500..=599 => ApiError::Server { status, body },
            _ => ApiError::Unexpected { status, body },
        }
    }

    /// HTTP status of the failed response; `None` when no response arrived.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            ApiError::AuthRejected { .. } => Some(StatusCode::UNAUTHORIZED),
            ApiError::Validation { status, .. }
            | ApiError::Server { status, .. }
            | ApiError::Unexpected { status, .. } => Some(*status),
            ApiError::Network(e) => e.status(),
            _ => None,
        }
    }

    /// Raw response body, for errors that carry one.
    pub fn body(&self) -> Option<&str> {
        match self {
            ApiError::AuthRejected { body }
            | ApiError::Validation { body, .. }
            | ApiError::Server { body, .. }
            | ApiError::Unexpected { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Server-provided message, suitable for showing to the user.
    pub fn detail(&self) -> Option<String> {
        self.body().map(extract_detail).filter(|d| !d.is_empty())
    }

    /// The session is gone and the user has to sign in again.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            ApiError::AuthRejected { .. } | ApiError::AuthExpired { .. }
        )
    }
}

/// Pull a readable message out of an error body.
///
/// Understands `{"detail": "..."}`, validation lists of the form
/// `{"detail": [{"msg": "..."}, ...]}` and `{"message": "..."}`. Anything else
/// comes back as the trimmed, truncated body.
pub fn extract_detail(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return truncate_body(body.trim());
    };

    match value.get("detail").or_else(|| value.get("message")) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
            .collect::<Vec<_>>()
            .join("; "),
        Some(other) => other.to_string(),
        None => truncate_body(body.trim()),
    }
}
