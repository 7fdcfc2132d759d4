//! Application configuration management.
//!
//! Holds the API location, which credential backend to use and the last
//! email used to sign in.
//!
//! Configuration is stored at `~/.config/chirp/config.json`. `CHIRP_API_URL`
//! and `CHIRP_STORE` in the environment override the file.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::{ApiClient, DEFAULT_API_URL, REQUEST_TIMEOUT_SECS};
use crate::auth::{FileStore, KeyringStore, MemoryStore, SessionStore};

/// Application name used for config/cache directory paths and the keychain service
pub const APP_NAME: &str = "chirp";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const API_URL_ENV: &str = "CHIRP_API_URL";
pub const STORE_ENV: &str = "CHIRP_STORE";

/// Where the credential pair is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    File,
    Keyring,
    Memory,
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(StoreKind::File),
            "keyring" | "keychain" => Ok(StoreKind::Keyring),
            "memory" => Ok(StoreKind::Memory),
            other => Err(anyhow::anyhow!(
                "Unknown credential store '{}' (expected file, keyring or memory)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub api_url: Option<String>,
    pub store: StoreKind,
    pub request_timeout_secs: Option<u64>,
    pub last_email: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory the file store keeps `token.json` in.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Apply `CHIRP_API_URL` / `CHIRP_STORE` from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup(API_URL_ENV).filter(|u| !u.trim().is_empty()) {
            self.api_url = Some(url);
        }
        if let Some(store) = lookup(STORE_ENV).filter(|s| !s.trim().is_empty()) {
            self.store = store
                .parse()
                .with_context(|| format!("Invalid {}", STORE_ENV))?;
        }
        Ok(())
    }

    pub fn api_url(&self) -> &str {
        self.api_url.as_deref().unwrap_or(DEFAULT_API_URL)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unwrap_or(REQUEST_TIMEOUT_SECS))
    }

    /// Open the configured credential backend.
    pub fn open_store(&self) -> Result<Arc<dyn SessionStore>> {
        let store: Arc<dyn SessionStore> = match self.store {
            StoreKind::File => Arc::new(FileStore::new(self.cache_dir()?)),
            StoreKind::Keyring => Arc::new(KeyringStore::new(APP_NAME)?),
            StoreKind::Memory => Arc::new(MemoryStore::new()),
        };
        Ok(store)
    }

    /// Client for the configured API, backed by the configured store.
    pub fn build_client(&self) -> Result<ApiClient> {
        let store = self.open_store()?;
        ApiClient::with_timeout(self.api_url(), store, self.request_timeout())
            .context("Failed to create API client")
    }
}
