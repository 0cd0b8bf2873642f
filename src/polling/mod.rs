//! Status polling for watched repositories.
//!
//! ```text
//!   toggle / select_all / remove ──► Selection ──► persisted (selected_repositories)
//!                                        │
//!   timer (Weak) ──► refresh_all ──► refresh_one × N (concurrent, deduplicated)
//!                                        │
//!                                        ▼
//!                          statuses: DashMap<repo_id, RepositoryStatus>
//! ```
//!
//! Each repository is refreshed with one listing of recent runs, reduced to
//! the newest run per workflow. A failing repository records its own error
//! and never affects the others.

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use futures::future::join_all;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{PollingConfig, RefreshInterval};
use crate::credentials::CredentialManager;
use crate::discovery::DiscoveryEngine;
use crate::github::models::WorkflowRun;
use crate::github::LatestRuns;
use crate::selection::Selection;
use crate::storage::{EncryptedStore, StorageKey};


/// Latest known runs of one watched repository.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RepositoryStatus {
    /// Newest run per workflow id
    pub runs: LatestRuns,
    pub fetched_at: Option<DateTime<Utc>>,
    /// Error of the most recent refresh, cleared on success
    pub error: Option<String>,
    pub loading: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchedulerEvent {
    SelectionChanged { watched: usize },
    RepositoryRefreshed { repo_id: u64, ok: bool },
    RefreshCompleted { at: DateTime<Utc>, failed: usize },
    IntervalChanged(RefreshInterval),
}

pub struct StatusScheduler {
    credentials: Arc<CredentialManager>,
    discovery: Arc<DiscoveryEngine>,
    store: Arc<EncryptedStore>,
    config: PollingConfig,
    selection: RwLock<Selection>,
    statuses: DashMap<u64, RepositoryStatus>,
    in_flight: DashSet<u64>,
    last_updated: RwLock<Option<DateTime<Utc>>>,
    interval: RwLock<RefreshInterval>,
    timer: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<SchedulerEvent>,
}

impl StatusScheduler {
    pub fn new(
        credentials: Arc<CredentialManager>,
        discovery: Arc<DiscoveryEngine>,
        store: Arc<EncryptedStore>,
        config: PollingConfig,
        interval: RefreshInterval,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            credentials,
            discovery,
            store,
            config,
            selection: RwLock::new(Selection::new()),
            statuses: DashMap::new(),
            in_flight: DashSet::new(),
            last_updated: RwLock::new(None),
            interval: RwLock::new(interval),
            timer: Mutex::new(None),
            events,
        }
    }

    fn selection_read(&self) -> RwLockReadGuard<'_, Selection> {
        self.selection.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn selection_write(&self) -> RwLockWriteGuard<'_, Selection> {
        self.selection.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SchedulerEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    pub fn selection(&self) -> Selection {
        self.selection_read().clone()
    }

    pub fn is_watched(&self, repo_id: u64) -> bool {
        self.selection_read().contains(repo_id)
    }

    pub fn status(&self, repo_id: u64) -> Option<RepositoryStatus> {
        self.statuses.get(&repo_id).map(|s| s.value().clone())
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        *self.last_updated.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn interval(&self) -> RefreshInterval {
        *self.interval.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_timer_running(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Loads the persisted selection and, if it is non-empty, runs the
    /// initial refresh and arms the timer.
    pub async fn restore_selection(self: &Arc<Self>) -> usize {
        let restored = Selection::load(&self.store).await;
        let count = restored.len();
        *self.selection_write() = restored;
        info!(watched = count, "Restored selection");

        self.selection_changed().await;
        count
    }

    /// Watches or unwatches a discovered repository. Returns whether the
    /// selection changed; unknown or still-checking repositories are ignored.
    pub async fn toggle(self: &Arc<Self>, repo_id: u64) -> bool {
        let changed = {
            let mut selection = self.selection_write();
            let candidate = selection
                .get(repo_id)
                .cloned()
                .or_else(|| self.discovery.repository(repo_id));
            match candidate {
                Some(repo) => selection.toggle(repo),
                None => false,
            }
        };

        if changed {
            self.selection_changed().await;
        }
        changed
    }

    /// Watches every actionable discovered repository. Returns how many were added.
    pub async fn select_all(self: &Arc<Self>) -> usize {
        let added = self
            .selection_write()
            .extend_actionable(self.discovery.repositories());
        if added > 0 {
            self.selection_changed().await;
        }
        added
    }

    pub async fn remove(self: &Arc<Self>, repo_id: u64) -> bool {
        let changed = self.selection_write().remove(repo_id);
        if changed {
            self.selection_changed().await;
        }
        changed
    }

    pub async fn clear_selection(self: &Arc<Self>) {
        let changed = self.selection_write().clear();
        if changed {
            self.selection_changed().await;
        }
    }

    /// Persists the selection, drops status of unwatched repositories and
    /// brings the timer in line with the new selection.
    async fn selection_changed(self: &Arc<Self>) {
        let selection = self.selection();

        if let Err(e) = selection.save(&self.store).await {
            warn!(error = %e, "Failed to persist selection");
        }
        self.statuses.retain(|repo_id, _| selection.contains(*repo_id));
        self.emit(SchedulerEvent::SelectionChanged {
            watched: selection.len(),
        });

        if selection.is_empty() {
            self.stop_timer();
            return;
        }

        let needs_initial_load = self.statuses.iter().all(|s| s.fetched_at.is_none());
        if !self.is_timer_running() {
            self.start_timer();
        }
        if needs_initial_load {
            debug!(watched = selection.len(), "Initial status load");
            self.refresh_all().await;
        }
    }

    /// Refreshes one watched repository. Returns whether fresh data was stored.
    ///
    /// Skipped when a refresh of the same repository is already running.
    pub async fn refresh_one(&self, repo_id: u64) -> bool {
        let Some(repo) = self.selection_read().get(repo_id).cloned() else {
            return false;
        };
        let Some(guard) = InFlight::acquire(self, repo_id) else {
            debug!(repo = %repo.full_name, "Refresh already in flight, skipping");
            return false;
        };

        let result = match self.credentials.require_client() {
            Ok(client) => {
                client
                    .latest_runs_by_workflow(&repo.owner.login, &repo.name, self.config.runs_per_page)
                    .await
            }
            Err(e) => Err(e),
        };
        drop(guard);

        // Unwatched while the request was running
        if !self.is_watched(repo_id) {
            self.statuses.remove(&repo_id);
            return false;
        }

        let ok = match result {
            Ok(response) => {
                self.credentials.record_rate_limit(response.rate_limit);
                debug!(
                    repo = %repo.full_name,
                    workflows = response.data.len(),
                    "Refreshed workflow runs"
                );
                let mut status = self.statuses.entry(repo_id).or_default();
                status.runs = response.data;
                status.fetched_at = Some(Utc::now());
                status.error = None;
                status.loading = false;
                true
            }
            Err(e) => {
                warn!(repo = %repo.full_name, error = %e, "Failed to refresh workflow runs");
                self.credentials.observe_error(&e);
                let mut status = self.statuses.entry(repo_id).or_default();
                status.error = Some(e.to_string());
                status.loading = false;
                false
            }
        };

        self.emit(SchedulerEvent::RepositoryRefreshed { repo_id, ok });
        ok
    }

    /// Refreshes every watched repository concurrently and stamps the global
    /// last-updated time. Per-repository failures stay on their own entry.
    pub async fn refresh_all(&self) -> DateTime<Utc> {
        let ids = self.selection_read().ids();
        join_all(ids.iter().map(|id| self.refresh_one(*id))).await;
        let failed = ids
            .iter()
            .filter(|id| self.status(**id).is_some_and(|s| s.error.is_some()))
            .count();

        let at = Utc::now();
        *self.last_updated.write().unwrap_or_else(PoisonError::into_inner) = Some(at);
        if let Err(e) = self
            .store
            .put_async(StorageKey::LastSync, at.to_rfc3339())
            .await
        {
            warn!(error = %e, "Failed to persist last sync time");
        }

        info!(repositories = ids.len(), failed = failed, "Status refresh completed");
        self.emit(SchedulerEvent::RefreshCompleted { at, failed });
        at
    }

    /// Last completed refresh from a previous session, if recorded.
    pub async fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.store
            .get_async(StorageKey::LastSync)
            .await
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|at| at.with_timezone(&Utc))
    }

    /// Changes the refresh interval and re-arms a running timer.
    pub fn set_interval(self: &Arc<Self>, interval: RefreshInterval) {
        {
            let mut current = self.interval.write().unwrap_or_else(PoisonError::into_inner);
            if *current == interval {
                return;
            }
            *current = interval;
        }
        info!(interval = %interval, "Refresh interval changed");
        self.emit(SchedulerEvent::IntervalChanged(interval));

        if self.is_timer_running() {
            self.start_timer();
        }
    }

    /// Arms the periodic refresh, replacing any running timer. Does nothing
    /// while the selection is empty.
    pub fn start_timer(self: &Arc<Self>) {
        self.stop_timer();
        if self.selection_read().is_empty() {
            return;
        }

        let period = self.interval().as_duration();
        let scheduler: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(scheduler) = scheduler.upgrade() else {
                    break;
                };
                scheduler.refresh_all().await;
            }
        });

        debug!(period_secs = period.as_secs(), "Refresh timer armed");
        *self.timer.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    fn stop_timer(&self) {
        if let Some(handle) = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
            debug!("Refresh timer stopped");
        }
    }

    /// Stops the timer. In-flight refreshes finish on their own.
    pub fn shutdown(&self) {
        self.stop_timer();
        info!("Status scheduler stopped");
    }

    /// Latest runs of a watched repository, newest first. With `only_mine`,
    /// restricted to runs triggered by the authenticated user.
    pub fn visible_runs(&self, repo_id: u64, only_mine: bool) -> Vec<WorkflowRun> {
        let Some(status) = self.statuses.get(&repo_id) else {
            return Vec::new();
        };
        let identity = if only_mine {
            match self.credentials.identity() {
                Some(identity) => Some(identity),
                None => return Vec::new(),
            }
        } else {
            None
        };

        let mut runs: Vec<WorkflowRun> = status
            .runs
            .values()
            .filter(|run| match &identity {
                Some(login) => run.actor_login() == Some(login.as_str()),
                None => true,
            })
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs
    }
}

/// Marks a repository as refreshing until dropped, including when the
/// refresh future is cancelled mid-request.
struct InFlight<'a> {
    scheduler: &'a StatusScheduler,
    repo_id: u64,
}

impl<'a> InFlight<'a> {
    fn acquire(scheduler: &'a StatusScheduler, repo_id: u64) -> Option<Self> {
        if !scheduler.in_flight.insert(repo_id) {
            return None;
        }
        scheduler.statuses.entry(repo_id).or_default().loading = true;
        Some(Self { scheduler, repo_id })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(mut status) = self.scheduler.statuses.get_mut(&self.repo_id) {
            status.loading = false;
        }
        self.scheduler.in_flight.remove(&self.repo_id);
    }
}

impl Drop for StatusScheduler {
    fn drop(&mut self) {
        self.stop_timer();
    }
}
