use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Token type assumed when the server leaves it out or sends `null`.
const DEFAULT_TOKEN_TYPE: &str = "bearer";

/// Access/refresh token pair issued by the Authentication Service.
///
/// A pair is only ever persisted whole. Use [`CredentialPair::is_well_formed`]
/// before trusting one that came off the wire or out of storage.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type", deserialize_with = "token_type_or_default")]
    pub token_type: String,
}

fn default_token_type() -> String {
    DEFAULT_TOKEN_TYPE.to_string()
}

fn token_type_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(default_token_type))
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            token_type: default_token_type(),
        }
    }

    /// Both tokens present and non-blank.
    pub fn is_well_formed(&self) -> bool {
        !self.access_token.trim().is_empty() && !self.refresh_token.trim().is_empty()
    }

    /// Value for the `Authorization` header.
    pub fn authorization_value(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

// Tokens never show up in logs
impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Body of `POST /auth/refresh-token`.
#[derive(Debug, Serialize)]
pub(crate) struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}
