//! Credential lifecycle.
//!
//! Owns the GitHub token and its validity state machine:
//!
//! ```text
//! Unset ──set_credential──▶ Valid
//!   │                        │  ▲
//! restore               revalidate
//!   ▼                        ▼  │
//! Validating ──────────▶ Valid | Invalid ──remove_credential──▶ Unset
//! ```
//!
//! The token is persisted only through the [`EncryptedStore`]. Components that
//! need to call the API ask for a [`GitHubClient`]; components that need to
//! react to credential changes subscribe to [`CredentialEvent`]s.

use reqwest::Client;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::error::{MonitorError, Result};
use crate::github::models::RateLimit;
use crate::github::GitHubClient;
use crate::storage::{EncryptedStore, StorageKey};


#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CredentialState {
    #[default]
    Unset,
    Validating,
    Valid,
    Invalid,
}

/// Read-only view of the credential, without the token itself.
#[derive(Clone, Debug, Default)]
pub struct CredentialSnapshot {
    pub state: CredentialState,
    /// Login of the user the token belongs to
    pub identity: Option<String>,
    pub rate_limit: Option<RateLimit>,
    pub last_error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CredentialEvent {
    Validated { identity: String },
    Invalidated { reason: String },
    Removed,
}

#[derive(Default)]
struct Inner {
    token: Option<String>,
    snapshot: CredentialSnapshot,
}

pub struct CredentialManager {
    store: Arc<EncryptedStore>,
    http_client: Client,
    base_url: String,
    inner: RwLock<Inner>,
    events: broadcast::Sender<CredentialEvent>,
}

impl CredentialManager {
    pub fn new(store: Arc<EncryptedStore>, base_url: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            store,
            http_client: Client::new(),
            base_url: base_url.into(),
            inner: RwLock::new(Inner::default()),
            events,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: CredentialEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn client_for(&self, token: &str) -> GitHubClient {
        GitHubClient::with_http_client(self.http_client.clone(), token, self.base_url.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CredentialEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> CredentialSnapshot {
        self.read().snapshot.clone()
    }

    pub fn state(&self) -> CredentialState {
        self.read().snapshot.state
    }

    /// Login of the validated user, if any.
    pub fn identity(&self) -> Option<String> {
        let inner = self.read();
        match inner.snapshot.state {
            CredentialState::Valid => inner.snapshot.identity.clone(),
            _ => None,
        }
    }

    /// A gateway client, only while the credential is valid.
    pub fn client(&self) -> Option<GitHubClient> {
        let inner = self.read();
        match (&inner.token, inner.snapshot.state) {
            (Some(token), CredentialState::Valid) => Some(self.client_for(token)),
            _ => None,
        }
    }

    pub fn require_client(&self) -> Result<GitHubClient> {
        self.client().ok_or(MonitorError::MissingCredential)
    }

    /// Loads a persisted token and validates it without user interaction.
    ///
    /// Lands in `Unset` immediately, with no network call, if the store is
    /// unavailable or empty.
    pub async fn restore(&self) -> CredentialState {
        if !self.store.available() {
            info!("Encrypted store unavailable, starting without credential");
            self.write().snapshot = CredentialSnapshot::default();
            return CredentialState::Unset;
        }

        let Some(token) = self.store.get_async(StorageKey::Credential).await else {
            self.write().snapshot = CredentialSnapshot::default();
            return CredentialState::Unset;
        };

        {
            let mut inner = self.write();
            inner.token = Some(token.clone());
            inner.snapshot.state = CredentialState::Validating;
        }

        self.validate_stored(&token).await
    }

    /// Re-checks the current token. `Unset` stays `Unset`.
    pub async fn revalidate(&self) -> CredentialState {
        let token = {
            let mut inner = self.write();
            let Some(token) = inner.token.clone() else {
                return CredentialState::Unset;
            };
            inner.snapshot.state = CredentialState::Validating;
            token
        };

        self.validate_stored(&token).await
    }

    async fn validate_stored(&self, token: &str) -> CredentialState {
        match self.client_for(token).get_authenticated_user().await {
            Ok(response) => {
                let identity = response.data.login;
                {
                    let mut inner = self.write();
                    if inner.token.as_deref() != Some(token) {
                        // Replaced or removed while validating
                        return inner.snapshot.state;
                    }
                    inner.snapshot = CredentialSnapshot {
                        state: CredentialState::Valid,
                        identity: Some(identity.clone()),
                        rate_limit: Some(response.rate_limit),
                        last_error: None,
                    };
                }
                info!(identity = %identity, "Credential validated");
                self.emit(CredentialEvent::Validated { identity });
                CredentialState::Valid
            }
            Err(e) => {
                let reason = e.to_string();
                {
                    let mut inner = self.write();
                    if inner.token.as_deref() != Some(token) {
                        return inner.snapshot.state;
                    }
                    if e.is_credential_invalidating() {
                        // Rejected outright, forget the token
                        inner.token = None;
                        self.store.remove(StorageKey::Credential);
                    }
                    inner.snapshot.state = CredentialState::Invalid;
                    inner.snapshot.identity = None;
                    inner.snapshot.last_error = Some(reason.clone());
                }
                warn!(error = %reason, "Stored credential failed validation");
                self.emit(CredentialEvent::Invalidated { reason });
                CredentialState::Invalid
            }
        }
    }

    /// Validates `raw` and, only on success, persists it and makes it current.
    ///
    /// On failure the previous credential state is left untouched.
    pub async fn set_credential(&self, raw: &str) -> Result<String> {
        let token = raw.trim();
        if token.is_empty() {
            return Err(MonitorError::InvalidCredential("token is empty".to_string()));
        }

        let response = self
            .client_for(token)
            .get_authenticated_user()
            .await
            .map_err(|e| MonitorError::InvalidCredential(e.to_string()))?;
        let identity = response.data.login;

        if let Err(e) = self
            .store
            .put_async(StorageKey::Credential, token.to_string())
            .await
        {
            warn!(error = %e, "Failed to persist credential, keeping it in memory only");
        }

        {
            let mut inner = self.write();
            inner.token = Some(token.to_string());
            inner.snapshot = CredentialSnapshot {
                state: CredentialState::Valid,
                identity: Some(identity.clone()),
                rate_limit: Some(response.rate_limit),
                last_error: None,
            };
        }

        info!(identity = %identity, "Credential set");
        self.emit(CredentialEvent::Validated {
            identity: identity.clone(),
        });
        Ok(identity)
    }

    /// Forgets the token and identity. Always succeeds.
    pub fn remove_credential(&self) {
        self.store.remove(StorageKey::Credential);
        *self.write() = Inner::default();
        info!("Credential removed");
        self.emit(CredentialEvent::Removed);
    }

    /// Lets other components report API failures. 401/403 invalidate the
    /// credential; everything else is ignored.
    pub fn observe_error(&self, error: &MonitorError) {
        if !error.is_credential_invalidating() {
            return;
        }
        let reason = error.to_string();
        {
            let mut inner = self.write();
            if inner.snapshot.state != CredentialState::Valid {
                return;
            }
            inner.snapshot.state = CredentialState::Invalid;
            inner.snapshot.last_error = Some(reason.clone());
        }
        warn!(error = %reason, "Credential rejected by API");
        self.emit(CredentialEvent::Invalidated { reason });
    }

    /// Records the rate-limit snapshot from a response. Empty snapshots
    /// (no headers) are ignored.
    pub fn record_rate_limit(&self, rate_limit: RateLimit) {
        if rate_limit.limit == 0 {
            return;
        }
        self.write().snapshot.rate_limit = Some(rate_limit);
    }

    /// Asks the API for the current rate-limit window.
    pub async fn refresh_rate_limit(&self) -> Result<RateLimit> {
        let client = self.require_client()?;
        match client.get_rate_limit().await {
            Ok(response) => {
                self.record_rate_limit(response.data);
                Ok(response.data)
            }
            Err(e) => {
                self.observe_error(&e);
                Err(e)
            }
        }
    }
}
