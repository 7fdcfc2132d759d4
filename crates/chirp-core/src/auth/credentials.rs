use keyring::Entry;
use tracing::debug;

use super::store::{decode_pair, SessionStore, StoreError, STORAGE_KEY};
use crate::models::CredentialPair;

/// Credential pair kept in the OS keychain.
///
/// One keychain entry per service name; the secret is the serialized pair,
/// written with a single `set_password` call. The entry is opened once and
/// reused for every call.
pub struct KeyringStore {
    service: String,
    entry: Entry,
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Result<Self, StoreError> {
        let service = service.into();
        let entry = Entry::new(&service, STORAGE_KEY)?;
        Ok(Self { service, entry })
    }
}

impl SessionStore for KeyringStore {
    fn load(&self) -> Result<Option<CredentialPair>, StoreError> {
        match self.entry.get_password() {
            Ok(secret) => Ok(decode_pair(&secret, "keyring")),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, pair: &CredentialPair) -> Result<(), StoreError> {
        let secret = serde_json::to_string(pair)?;
        self.entry.set_password(&secret)?;
        debug!(service = %self.service, "Saved credentials to keychain");
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
