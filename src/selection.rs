//! The ordered set of repositories the user watches.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::github::models::Repository;
use std::sync::Arc;

use crate::storage::{EncryptedStore, StorageKey, StoreError};

/// Ordered, de-duplicated list of watched repositories.
///
/// Only repositories with an actionable classification can be added. The
/// entries are stored as they were when selected, classification included.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selection {
    repositories: Vec<Repository>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.repositories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }

    pub fn contains(&self, repo_id: u64) -> bool {
        self.repositories.iter().any(|r| r.id == repo_id)
    }

    pub fn get(&self, repo_id: u64) -> Option<&Repository> {
        self.repositories.iter().find(|r| r.id == repo_id)
    }

    pub fn ids(&self) -> Vec<u64> {
        self.repositories.iter().map(|r| r.id).collect()
    }

    pub fn repositories(&self) -> &[Repository] {
        &self.repositories
    }

    /// Appends `repo` if it is actionable and not already present.
    pub fn insert(&mut self, repo: Repository) -> bool {
        if !repo.classification.is_actionable() || self.contains(repo.id) {
            return false;
        }
        self.repositories.push(repo);
        true
    }

    pub fn remove(&mut self, repo_id: u64) -> bool {
        let before = self.repositories.len();
        self.repositories.retain(|r| r.id != repo_id);
        self.repositories.len() != before
    }

    /// Removes `repo` if watched, otherwise tries to add it.
    /// Returns whether membership changed.
    pub fn toggle(&mut self, repo: Repository) -> bool {
        if self.contains(repo.id) {
            self.remove(repo.id)
        } else {
            self.insert(repo)
        }
    }

    /// Adds every actionable repository of `candidates`. Returns how many were added.
    pub fn extend_actionable(&mut self, candidates: impl IntoIterator<Item = Repository>) -> usize {
        candidates
            .into_iter()
            .filter(|repo| self.insert(repo.clone()))
            .count()
    }

    pub fn clear(&mut self) -> bool {
        let changed = !self.repositories.is_empty();
        self.repositories.clear();
        changed
    }

    /// Stored selection, minus any entry that is no longer selectable.
    pub async fn load(store: &Arc<EncryptedStore>) -> Self {
        let stored: Vec<Repository> = store
            .get_json_async(StorageKey::SelectedRepositories)
            .await
            .unwrap_or_default();
        let total = stored.len();

        let mut selection = Self::new();
        selection.extend_actionable(stored);
        if selection.len() != total {
            warn!(
                stored = total,
                kept = selection.len(),
                "Dropped unselectable entries from stored selection"
            );
        }
        selection
    }

    pub async fn save(&self, store: &Arc<EncryptedStore>) -> Result<(), StoreError> {
        store
            .put_json_async(StorageKey::SelectedRepositories, self)
            .await
    }
}
