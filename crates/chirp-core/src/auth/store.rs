use std::sync::RwLock;

use thiserror::Error;
use tracing::warn;

use crate::models::CredentialPair;

/// Well-known key the credential pair is stored under, in every backend.
pub const STORAGE_KEY: &str = "token";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Session storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize credentials: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),
}

/// Durable home of the single persisted [`CredentialPair`].
///
/// Implementations must make `save` atomic with respect to `load`: a reader
/// sees either the previous pair or the new one, never a mix. Absent and
/// malformed entries both load as `None`.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<CredentialPair>, StoreError>;

    fn save(&self, pair: &CredentialPair) -> Result<(), StoreError>;

    /// Remove the stored pair. Succeeds when nothing is stored.
    fn clear(&self) -> Result<(), StoreError>;
}

/// Parse a persisted entry, treating anything unusable as "no session".
pub(crate) fn decode_pair(raw: &str, source: &str) -> Option<CredentialPair> {
    match serde_json::from_str::<CredentialPair>(raw) {
        Ok(pair) if pair.is_well_formed() => Some(pair),
        Ok(_) => {
            warn!(source, "Stored credentials are incomplete, ignoring");
            None
        }
        Err(e) => {
            warn!(source, error = %e, "Stored credentials are malformed, ignoring");
            None
        }
    }
}

/// In-process store. Nothing survives the process; useful for tests and
/// one-shot commands that should not touch the user's saved session.
#[derive(Default)]
pub struct MemoryStore {
    pair: RwLock<Option<CredentialPair>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pair(pair: CredentialPair) -> Self {
        Self {
            pair: RwLock::new(Some(pair)),
        }
    }
}

impl SessionStore for MemoryStore {
    fn load(&self) -> Result<Option<CredentialPair>, StoreError> {
        let guard = self.pair.read().unwrap_or_else(|e| e.into_inner());
        Ok(guard.clone().filter(CredentialPair::is_well_formed))
    }

    fn save(&self, pair: &CredentialPair) -> Result<(), StoreError> {
        let mut guard = self.pair.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(pair.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut guard = self.pair.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        assert!(store.load().unwrap().is_none());

        let pair = CredentialPair::new("AT1", "RT1");
        store.save(&pair).unwrap();
        assert_eq!(store.load().unwrap(), Some(pair));

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        // Clearing twice is fine
        store.clear().unwrap();
    }

    #[test]
    fn test_save_replaces_wholesale() {
        let store = MemoryStore::with_pair(CredentialPair::new("AT1", "RT1"));
        let mut next = CredentialPair::new("AT2", "RT2");
        next.token_type = "Bearer".to_string();
        store.save(&next).unwrap();
        assert_eq!(store.load().unwrap(), Some(next));
    }

    #[test]
    fn test_decode_pair_rejects_garbage() {
        assert!(decode_pair("not json", "test").is_none());
        assert!(decode_pair("[]", "test").is_none());
        assert!(decode_pair(r#"{"access_token": "", "refresh_token": "RT1"}"#, "test").is_none());
        assert_eq!(
            decode_pair(r#"{"access_token": "AT1", "refresh_token": "RT1"}"#, "test"),
            Some(CredentialPair::new("AT1", "RT1"))
        );
    }
}
