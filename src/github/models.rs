//! GitHub REST payloads and the local annotations carried alongside them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Authenticated user returned by `GET /user`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub login: String,
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Organization membership entry from `GET /user/orgs`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Organization {
    pub login: String,
    pub id: u64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub login: String,
}

/// Which collection of repositories is being enumerated.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Scope {
    /// Repositories of the authenticated user
    #[default]
    Mine,
    /// Repositories of a named organization
    Organization(String),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Mine => write!(f, "mine"),
            Scope::Organization(org) => write!(f, "org:{org}"),
        }
    }
}

/// Locally derived workflow-activity classification of a repository.
///
/// Moves forward exactly once per discovery pass:
/// `Unknown → Checking → {HasActivity | NoActivity | CheckFailed}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Classification {
    #[default]
    Unknown,
    Checking,
    HasActivity { run_count: u64 },
    NoActivity,
    CheckFailed { reason: String },
}

impl Classification {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Classification::HasActivity { .. }
                | Classification::NoActivity
                | Classification::CheckFailed { .. }
        )
    }

    /// Only repositories with a settled probe result may be watched.
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            Classification::HasActivity { .. } | Classification::NoActivity
        )
    }

    /// Moves to `next` if that is a forward step. Returns whether it moved.
    pub fn advance(&mut self, next: Classification) -> bool {
        let allowed = match (&*self, &next) {
            (Classification::Unknown, Classification::Checking) => true,
            (Classification::Checking, n) => n.is_terminal(),
            _ => false,
        };
        if allowed {
            *self = next;
        }
        allowed
    }
}

/// Result of the bounded "does this repository run workflows" probe.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityReport {
    pub has_activity: bool,
    /// Total workflow runs reported by the API (0 when only workflows were found)
    pub run_count: u64,
    pub latest_run_at: Option<DateTime<Utc>>,
    /// Latest run falls within the probe window
    pub recent: bool,
}

impl ActivityReport {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn classification(&self) -> Classification {
        if self.has_activity {
            Classification::HasActivity {
                run_count: self.run_count,
            }
        } else {
            Classification::NoActivity
        }
    }
}

/// GitHub repository plus the local activity annotation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: u64,
    pub name: String,
    pub full_name: String,
    pub owner: Owner,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pushed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,

    // Local fields, absent from API payloads
    #[serde(default)]
    pub classification: Classification,
    #[serde(default)]
    pub activity: Option<ActivityReport>,
}

impl Repository {
    /// Archived and disabled repositories cannot run workflows.
    pub fn is_actionable_remote(&self) -> bool {
        !self.archived && !self.disabled
    }

    /// Case-insensitive match against name and description.
    pub fn matches_filter(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }
        self.full_name.to_lowercase().contains(&query)
            || self
                .description
                .as_deref()
                .map(|d| d.to_lowercase().contains(&query))
                .unwrap_or(false)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    Completed,
    Waiting,
    Requested,
    Pending,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunConclusion {
    Success,
    Failure,
    Cancelled,
    Skipped,
    Neutral,
    TimedOut,
    ActionRequired,
    Stale,
    StartupFailure,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub login: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAuthor {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadCommit {
    pub id: String,
    pub message: String,
    #[serde(default)]
    pub author: Option<CommitAuthor>,
}

/// One workflow run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    pub workflow_id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub head_branch: Option<String>,
    #[serde(default)]
    pub head_sha: String,
    pub status: RunStatus,
    #[serde(default)]
    pub conclusion: Option<RunConclusion>,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub run_number: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub run_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub actor: Option<Actor>,
    #[serde(default)]
    pub head_commit: Option<HeadCommit>,
}

impl WorkflowRun {
    pub fn actor_login(&self) -> Option<&str> {
        self.actor.as_ref().map(|a| a.login.as_str())
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct WorkflowRunList {
    pub total_count: u64,
    pub workflow_runs: Vec<WorkflowRun>,
}

/// Workflow definition from `GET /repos/{owner}/{repo}/actions/workflows`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Workflow {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub state: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct WorkflowList {
    pub total_count: u64,
    pub workflows: Vec<Workflow>,
}

/// Rate-limit snapshot. Fields default to zero when headers are missing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub limit: u64,
    pub remaining: u64,
    /// Unix epoch seconds at which the window resets
    pub reset: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RateLimitResources {
    pub core: RateLimit,
}

/// Body of `GET /rate_limit`.
#[derive(Clone, Debug, Deserialize)]
pub struct RateLimitStatus {
    pub resources: RateLimitResources,
}
