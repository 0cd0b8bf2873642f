//! Repository discovery and activity enrichment.
//!
//! `discover` pages through every repository of a scope, drops archived and
//! disabled ones, publishes the list immediately with every entry `Unknown`,
//! and then classifies entries in the background in small, throttled batches.
//!
//! Each discovery pass gets a generation number. Enrichment results carry the
//! generation they were started under and are dropped if a newer pass (or a
//! clear) has happened since, so a scope switch can never be overwritten by a
//! slow probe from the previous scope.

use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::DiscoveryConfig;
use crate::credentials::{CredentialEvent, CredentialManager};
use crate::error::Result;
use crate::github::models::{ActivityReport, Classification, Organization, Repository, Scope};
use crate::github::{GitHubClient, MAX_PAGE_SIZE};


#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A fresh list is available; every entry is `Unknown`
    Published { scope: Scope, count: usize },
    /// One repository moved to a new classification
    Classified {
        repo_id: u64,
        classification: Classification,
    },
    /// Enumeration aborted
    Failed { scope: Scope, message: String },
    /// Every published repository has a terminal classification
    EnrichmentFinished { scope: Scope },
    Cleared,
}

#[derive(Default)]
struct DiscoveryState {
    generation: u64,
    scope: Scope,
    repositories: Vec<Repository>,
    loading: bool,
    last_error: Option<String>,
}

/// Minimal identity of a repository to probe.
#[derive(Clone)]
struct ProbeTarget {
    id: u64,
    owner: String,
    name: String,
}

pub struct DiscoveryEngine {
    credentials: Arc<CredentialManager>,
    config: DiscoveryConfig,
    state: RwLock<DiscoveryState>,
    enrichment: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<DiscoveryEvent>,
}

impl DiscoveryEngine {
    pub fn new(credentials: Arc<CredentialManager>, config: DiscoveryConfig) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            credentials,
            config,
            state: RwLock::new(DiscoveryState::default()),
            enrichment: Mutex::new(None),
            events,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, DiscoveryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, DiscoveryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: DiscoveryEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.events.subscribe()
    }

    pub fn scope(&self) -> Scope {
        self.read().scope.clone()
    }

    /// Snapshot of the published list.
    pub fn repositories(&self) -> Vec<Repository> {
        self.read().repositories.clone()
    }

    pub fn repository(&self, repo_id: u64) -> Option<Repository> {
        self.read()
            .repositories
            .iter()
            .find(|r| r.id == repo_id)
            .cloned()
    }

    /// Published repositories matching a free-text name/description filter.
    pub fn filtered(&self, query: &str) -> Vec<Repository> {
        self.read()
            .repositories
            .iter()
            .filter(|r| r.matches_filter(query))
            .cloned()
            .collect()
    }

    pub fn is_loading(&self) -> bool {
        self.read().loading
    }

    pub fn last_error(&self) -> Option<String> {
        self.read().last_error.clone()
    }

    /// Organizations available as discovery scopes.
    pub async fn organizations(&self) -> Result<Vec<Organization>> {
        let client = self.credentials.require_client()?;
        match client.list_organizations().await {
            Ok(response) => {
                self.credentials.record_rate_limit(response.rate_limit);
                Ok(response.data)
            }
            Err(e) => {
                self.credentials.observe_error(&e);
                Err(e)
            }
        }
    }

    /// Discards the published list and stops any enrichment from writing.
    pub fn clear(&self) {
        {
            let mut state = self.write();
            state.generation += 1;
            state.repositories.clear();
            state.loading = false;
            state.last_error = None;
        }
        self.emit(DiscoveryEvent::Cleared);
    }

    /// Switches scope and rediscovers.
    pub async fn set_scope(self: &Arc<Self>, scope: Scope) -> Result<usize> {
        self.discover(scope).await
    }

    /// Enumerates `scope`, publishes the actionable repositories and starts
    /// background enrichment. Returns the number of published repositories.
    ///
    /// A failing page aborts the whole pass and is returned to the caller.
    pub async fn discover(self: &Arc<Self>, scope: Scope) -> Result<usize> {
        let client = self.credentials.require_client()?;

        let generation = {
            let mut state = self.write();
            state.generation += 1;
            state.scope = scope.clone();
            state.repositories.clear();
            state.loading = true;
            state.last_error = None;
            state.generation
        };

        info!(scope = %scope, "Discovering repositories");

        let fetched = match self.fetch_all_pages(&client, &scope).await {
            Ok(fetched) => fetched,
            Err(e) => {
                error!(scope = %scope, error = %e, "Repository discovery failed");
                self.credentials.observe_error(&e);
                {
                    let mut state = self.write();
                    if state.generation == generation {
                        state.loading = false;
                        state.last_error = Some(e.to_string());
                    }
                }
                self.emit(DiscoveryEvent::Failed {
                    scope,
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let total = fetched.len();
        let repositories: Vec<Repository> = fetched
            .into_iter()
            .filter(Repository::is_actionable_remote)
            .map(|mut repo| {
                repo.classification = Classification::Unknown;
                repo.activity = None;
                repo
            })
            .collect();
        let targets: Vec<ProbeTarget> = repositories
            .iter()
            .map(|r| ProbeTarget {
                id: r.id,
                owner: r.owner.login.clone(),
                name: r.name.clone(),
            })
            .collect();
        let count = repositories.len();

        {
            let mut state = self.write();
            if state.generation != generation {
                debug!(scope = %scope, "Discovery superseded before publishing");
                return Ok(0);
            }
            state.repositories = repositories;
            state.loading = false;
        }

        info!(
            scope = %scope,
            fetched = total,
            published = count,
            "Published repositories"
        );
        self.emit(DiscoveryEvent::Published {
            scope: scope.clone(),
            count,
        });

        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            engine.enrich(generation, scope, client, targets).await;
        });
        *self.enrichment.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Ok(count)
    }

    /// Fetches pages sequentially until a short or empty page, or until the
    /// server says there is no next page.
    async fn fetch_all_pages(&self, client: &GitHubClient, scope: &Scope) -> Result<Vec<Repository>> {
        let per_page = self.config.page_size.clamp(1, MAX_PAGE_SIZE);
        let mut repositories = Vec::new();
        let mut page = 1;

        loop {
            let response = client.list_repositories(scope, page, per_page).await?;
            self.credentials.record_rate_limit(response.rate_limit);

            let received = response.data.len();
            repositories.extend(response.data);

            debug!(scope = %scope, page = page, received = received, "Fetched repository page");

            if received < per_page as usize || response.has_next_page == Some(false) {
                break;
            }
            page += 1;
        }

        Ok(repositories)
    }

    async fn enrich(
        self: Arc<Self>,
        generation: u64,
        scope: Scope,
        client: GitHubClient,
        targets: Vec<ProbeTarget>,
    ) {
        let batch_size = self.config.batch_size.max(1);
        let pause = Duration::from_millis(self.config.batch_pause_ms);
        let window_days = self.config.activity_window_days;

        for (index, batch) in targets.chunks(batch_size).enumerate() {
            if index > 0 && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            if self.read().generation != generation {
                debug!(scope = %scope, "Enrichment superseded, stopping");
                return;
            }

            for target in batch {
                self.apply(generation, target.id, Classification::Checking, None);
            }

            let mut pending: FuturesUnordered<_> = batch
                .iter()
                .cloned()
                .map(|target| {
                    let client = client.clone();
                    let probe = tokio::spawn(async move {
                        client
                            .probe_activity(&target.owner, &target.name, window_days)
                            .await
                    });
                    async move { (target.id, probe.await) }
                })
                .collect();

            while let Some((repo_id, result)) = pending.next().await {
                let (classification, activity) = match result {
                    Ok(report) => (report.classification(), Some(report)),
                    Err(e) => {
                        warn!(repo_id = repo_id, error = %e, "Activity probe failed");
                        (
                            Classification::CheckFailed {
                                reason: e.to_string(),
                            },
                            None,
                        )
                    }
                };
                self.apply(generation, repo_id, classification, activity);
            }
        }

        if self.read().generation == generation {
            info!(scope = %scope, repositories = targets.len(), "Enrichment finished");
            self.emit(DiscoveryEvent::EnrichmentFinished { scope });
        }
    }

    /// Advances one repository's classification if `generation` is still the
    /// published one. Re-reads the list by id under the lock.
    fn apply(
        &self,
        generation: u64,
        repo_id: u64,
        classification: Classification,
        activity: Option<ActivityReport>,
    ) -> bool {
        {
            let mut state = self.write();
            if state.generation != generation {
                return false;
            }
            let Some(repo) = state.repositories.iter_mut().find(|r| r.id == repo_id) else {
                return false;
            };
            if !repo.classification.advance(classification.clone()) {
                return false;
            }
            if activity.is_some() {
                repo.activity = activity;
            }
        }

        self.emit(DiscoveryEvent::Classified {
            repo_id,
            classification,
        });
        true
    }

    /// Waits for the most recently started enrichment to finish.
    pub async fn wait_for_enrichment(&self) {
        let handle = self
            .enrichment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Enrichment task ended abnormally");
            }
        }
    }

    /// Rediscovers whenever the credential becomes valid and clears the list
    /// when it is removed. Runs until the returned handle is aborted.
    pub fn spawn_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut events = self.credentials.subscribe();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(CredentialEvent::Validated { identity }) => {
                        let scope = engine.scope();
                        debug!(identity = %identity, scope = %scope, "Credential valid, rediscovering");
                        if let Err(e) = engine.discover(scope).await {
                            warn!(error = %e, "Discovery after credential change failed");
                        }
                    }
                    Ok(CredentialEvent::Removed) => engine.clear(),
                    Ok(CredentialEvent::Invalidated { .. }) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Missed credential events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
