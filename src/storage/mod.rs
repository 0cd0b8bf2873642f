//! Encrypted local persistence.
//!
//! Every value is sealed into its own AES-256-GCM envelope before it reaches
//! the key-value backend. Plaintext only ever exists in process memory.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       EncryptedStore                     │
//! │  - put / get / remove / available        │
//! │  - Self-healing reads                    │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!     (seal)               (open)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       Envelope                           │
//! │  - PBKDF2 key from device fingerprint    │
//! │  - Fresh salt and nonce per write        │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       KeyValueBackend (SQLite)           │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Failure policy
//!
//! Key derivation is deliberately slow, so async callers go through the
//! `*_async` variants, which run the work on the blocking pool.
//!
//! Reads never fail. An envelope that cannot be parsed or decrypted is
//! deleted and reported as absent, so a changed device fingerprint or a
//! tampered file degrades to "nothing stored" instead of an error.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

mod backend;
mod encryption;

#[cfg(test)]
mod tests;

pub use backend::{KeyValueBackend, SqliteBackend};
pub use encryption::{
    DeviceFingerprint, Envelope, OpeningKey, SealingKey, NONCE_SIZE, PBKDF2_ITERATIONS, SALT_SIZE,
};

/// Key used for the availability probe.
const PROBE_KEY: &str = "__runwatch_probe__";

/// Errors from the encrypted store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("encrypted storage is not available")]
    Unavailable,

    #[error("stored data is corrupted: {0}")]
    CorruptedData(String),

    #[error("stored data could not be decrypted")]
    DecryptionFailed,

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// The logical keys persisted by the monitor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageKey {
    Credential,
    SelectedRepositories,
    Preferences,
    LastSync,
}

impl StorageKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKey::Credential => "github_token",
            StorageKey::SelectedRepositories => "selected_repositories",
            StorageKey::Preferences => "dashboard_settings",
            StorageKey::LastSync => "last_sync",
        }
    }
}

/// Authenticated-encryption wrapper around a [`KeyValueBackend`].
pub struct EncryptedStore {
    backend: Option<Box<dyn KeyValueBackend>>,
    password: String,
}

impl EncryptedStore {
    pub fn new(backend: Box<dyn KeyValueBackend>, device: &DeviceFingerprint) -> Self {
        Self {
            backend: Some(backend),
            password: device.password(),
        }
    }

    /// Opens a SQLite-backed store, falling back to an unavailable store if
    /// the database cannot be opened.
    pub fn open<P: AsRef<std::path::Path>>(db_path: P, device: &DeviceFingerprint) -> Self {
        match SqliteBackend::open(db_path) {
            Ok(backend) => Self::new(Box::new(backend), device),
            Err(e) => {
                warn!(error = %e, "Failed to open local store, persistence disabled");
                Self::unavailable(device)
            }
        }
    }

    /// A store with no backend. Every write fails and every read is absent.
    pub fn unavailable(device: &DeviceFingerprint) -> Self {
        Self {
            backend: None,
            password: device.password(),
        }
    }

    /// True only if a backend is attached and a write/delete probe succeeds.
    pub fn available(&self) -> bool {
        let Some(backend) = self.backend.as_deref() else {
            return false;
        };
        let probe = backend
            .write(PROBE_KEY, "probe")
            .and_then(|_| backend.delete(PROBE_KEY));
        match probe {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Storage probe failed");
                false
            }
        }
    }

    /// Encrypts and stores `plaintext` under `key`, replacing any previous value.
    pub fn put(&self, key: StorageKey, plaintext: &str) -> Result<(), StoreError> {
        let backend = self.backend.as_deref().ok_or(StoreError::Unavailable)?;
        let envelope = Envelope::seal(plaintext, &self.password)?;
        backend
            .write(key.as_str(), &envelope.to_json()?)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// Returns the decrypted value, or `None` if absent or unreadable.
    pub fn get(&self, key: StorageKey) -> Option<String> {
        match self.try_get(key) {
            Ok(value) => value,
            Err(StoreError::CorruptedData(reason)) => {
                warn!(key = key.as_str(), reason = %reason, "Discarding corrupted entry");
                self.remove(key);
                None
            }
            Err(StoreError::DecryptionFailed) => {
                warn!(key = key.as_str(), "Discarding entry that failed to decrypt");
                self.remove(key);
                None
            }
            Err(e) => {
                warn!(key = key.as_str(), error = %e, "Failed to read entry");
                None
            }
        }
    }

    fn try_get(&self, key: StorageKey) -> Result<Option<String>, StoreError> {
        let backend = self.backend.as_deref().ok_or(StoreError::Unavailable)?;
        let Some(raw) = backend
            .read(key.as_str())
            .map_err(|e| StoreError::Backend(e.to_string()))?
        else {
            return Ok(None);
        };

        let envelope = Envelope::parse(&raw)?;
        envelope.open(&self.password).map(Some)
    }

    /// Best-effort delete. Never fails.
    pub fn remove(&self, key: StorageKey) {
        let Some(backend) = self.backend.as_deref() else {
            return;
        };
        if let Err(e) = backend.delete(key.as_str()) {
            warn!(key = key.as_str(), error = %e, "Failed to remove entry");
        }
    }

    /// Serializes `value` to JSON and stores it encrypted.
    pub fn put_json<T: Serialize>(&self, key: StorageKey, value: &T) -> Result<(), StoreError> {
        let json =
            serde_json::to_string(value).map_err(|e| StoreError::Encryption(e.to_string()))?;
        self.put(key, &json)
    }

    /// Reads a JSON value. A value that decrypts but no longer deserializes
    /// is treated like corruption.
    pub fn get_json<T: DeserializeOwned>(&self, key: StorageKey) -> Option<T> {
        let raw = self.get(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = key.as_str(), error = %e, "Discarding entry with unexpected shape");
                self.remove(key);
                None
            }
        }
    }

    pub async fn put_async(
        self: &Arc<Self>,
        key: StorageKey,
        plaintext: String,
    ) -> Result<(), StoreError> {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || store.put(key, &plaintext))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
    }

    pub async fn get_async(self: &Arc<Self>, key: StorageKey) -> Option<String> {
        let store = Arc::clone(self);
        match tokio::task::spawn_blocking(move || store.get(key)).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = key.as_str(), error = %e, "Blocking read task failed");
                None
            }
        }
    }

    pub async fn put_json_async<T: Serialize>(
        self: &Arc<Self>,
        key: StorageKey,
        value: &T,
    ) -> Result<(), StoreError> {
        let json =
            serde_json::to_string(value).map_err(|e| StoreError::Encryption(e.to_string()))?;
        self.put_async(key, json).await
    }

    pub async fn get_json_async<T: DeserializeOwned + Send + 'static>(
        self: &Arc<Self>,
        key: StorageKey,
    ) -> Option<T> {
        let store = Arc::clone(self);
        match tokio::task::spawn_blocking(move || store.get_json(key)).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = key.as_str(), error = %e, "Blocking read task failed");
                None
            }
        }
    }
}
