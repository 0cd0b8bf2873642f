//! GitHub REST gateway.
//!
//! Every outbound call goes through [`GitHubClient::request`], which attaches
//! the bearer token and API version header, reads rate-limit and pagination
//! metadata, and normalizes failures into [`MonitorError`].

pub mod models;


use chrono::{Duration, Utc};
use reqwest::header::{HeaderMap, ACCEPT, LINK, USER_AGENT};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::{MonitorError, Result};
use self::models::{
    ActivityReport, Organization, RateLimit, RateLimitStatus, Repository, Scope, User,
    WorkflowList, WorkflowRun, WorkflowRunList,
};

pub const BASE_URL: &str = "https://api.github.com";

/// Value of the `X-GitHub-Api-Version` header sent with every request.
pub const API_VERSION: &str = "2022-11-28";

/// Largest `per_page` the API accepts.
pub const MAX_PAGE_SIZE: u32 = 100;

const CLIENT_USER_AGENT: &str = concat!("runwatch/", env!("CARGO_PKG_VERSION"));

/// Latest run per workflow id.
pub type LatestRuns = BTreeMap<u64, WorkflowRun>;

/// Decoded body plus the metadata every response carries.
#[derive(Clone, Debug)]
pub struct ApiResponse<T> {
    pub data: T,
    pub rate_limit: RateLimit,
    /// `Some(false)` when a `Link` header is present without `rel="next"`.
    /// `None` when the server sent no `Link` header at all.
    pub has_next_page: Option<bool>,
}

impl<T> ApiResponse<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ApiResponse<U> {
        ApiResponse {
            data: f(self.data),
            rate_limit: self.rate_limit,
            has_next_page: self.has_next_page,
        }
    }
}

/// Filters for `GET /repos/{owner}/{repo}/actions/runs`.
#[derive(Clone, Debug, Default)]
pub struct RunFilter {
    pub branch: Option<String>,
    pub status: Option<String>,
    pub actor: Option<String>,
    pub per_page: Option<u32>,
    pub page: Option<u32>,
}

impl RunFilter {
    pub fn latest(per_page: u32) -> Self {
        Self {
            per_page: Some(per_page),
            ..Self::default()
        }
    }

    fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(branch) = &self.branch {
            query.push(("branch", branch.clone()));
        }
        if let Some(status) = &self.status {
            query.push(("status", status.clone()));
        }
        if let Some(actor) = &self.actor {
            query.push(("actor", actor.clone()));
        }
        if let Some(per_page) = self.per_page {
            query.push(("per_page", per_page.min(MAX_PAGE_SIZE).to_string()));
        }
        if let Some(page) = self.page {
            query.push(("page", page.to_string()));
        }
        query
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// HTTP client for the GitHub REST API.
///
/// Holds only the base URL and token; the inner `reqwest::Client` is a
/// shared connection pool, so cloning is cheap.
#[derive(Clone)]
pub struct GitHubClient {
    http_client: Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GitHubClient {
    /// Create a client using the default GitHub API base URL.
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, BASE_URL)
    }

    /// Create a client with a custom base URL (for testing with a mock server).
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self::with_http_client(Client::new(), token, base_url)
    }

    /// Create a client that reuses an existing connection pool.
    pub fn with_http_client(
        http_client: Client,
        token: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sends one request and decodes the JSON response.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<ApiResponse<T>> {
        let url = format!("{}{}", self.base_url, endpoint);

        let mut builder = self
            .http_client
            .request(method.clone(), &url)
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .header(USER_AGENT, CLIENT_USER_AGENT);
        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        debug!(method = %method, endpoint = %endpoint, "GitHub request");

        let response = builder
            .send()
            .await
            .map_err(|e| MonitorError::Network(e.to_string()))?;

        let status = response.status();
        let rate_limit = parse_rate_limit(response.headers());
        let has_next_page = parse_has_next(response.headers());

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.message)
                .unwrap_or_else(|_| format!("API Error: {}", status.as_u16()));
            warn!(
                endpoint = %endpoint,
                status = status.as_u16(),
                message = %message,
                "GitHub API error"
            );
            return Err(MonitorError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let data = response.json::<T>().await?;

        Ok(ApiResponse {
            data,
            rate_limit,
            has_next_page,
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<ApiResponse<T>> {
        self.request(Method::GET, endpoint, query, None).await
    }

    /// Identity check: the user the token belongs to.
    pub async fn get_authenticated_user(&self) -> Result<ApiResponse<User>> {
        self.get("/user", &[]).await
    }

    /// Organizations the authenticated user belongs to.
    pub async fn list_organizations(&self) -> Result<ApiResponse<Vec<Organization>>> {
        self.get("/user/orgs", &[("per_page", MAX_PAGE_SIZE.to_string())])
            .await
    }

    /// One page of repositories for `scope`, most recently updated first.
    pub async fn list_repositories(
        &self,
        scope: &Scope,
        page: u32,
        per_page: u32,
    ) -> Result<ApiResponse<Vec<Repository>>> {
        let endpoint = match scope {
            Scope::Mine => "/user/repos".to_string(),
            Scope::Organization(org) => format!("/orgs/{}/repos", urlencoding::encode(org)),
        };
        let query = [
            ("sort", "updated".to_string()),
            ("per_page", per_page.clamp(1, MAX_PAGE_SIZE).to_string()),
            ("page", page.max(1).to_string()),
        ];
        self.get(&endpoint, &query).await
    }

    pub async fn list_workflows(
        &self,
        owner: &str,
        repo: &str,
        per_page: u32,
    ) -> Result<ApiResponse<WorkflowList>> {
        let endpoint = format!("{}/actions/workflows", repo_path(owner, repo));
        self.get(&endpoint, &[("per_page", per_page.min(MAX_PAGE_SIZE).to_string())])
            .await
    }

    pub async fn list_workflow_runs(
        &self,
        owner: &str,
        repo: &str,
        filter: &RunFilter,
    ) -> Result<ApiResponse<WorkflowRunList>> {
        let endpoint = format!("{}/actions/runs", repo_path(owner, repo));
        self.get(&endpoint, &filter.to_query()).await
    }

    /// Current core rate-limit window. Does not count against the limit.
    pub async fn get_rate_limit(&self) -> Result<ApiResponse<RateLimit>> {
        let response: ApiResponse<RateLimitStatus> = self.get("/rate_limit", &[]).await?;
        Ok(response.map(|status| status.resources.core))
    }

    /// Newest run of every workflow, from a single listing of recent runs.
    ///
    /// Workflows that have not run within the last `per_page` runs are absent.
    pub async fn latest_runs_by_workflow(
        &self,
        owner: &str,
        repo: &str,
        per_page: u32,
    ) -> Result<ApiResponse<LatestRuns>> {
        let response = self
            .list_workflow_runs(owner, repo, &RunFilter::latest(per_page))
            .await?;
        Ok(response.map(|list| latest_per_workflow(list.workflow_runs)))
    }

    /// Legacy N+1 variant: list workflows, then fetch one run per workflow.
    ///
    /// Costs one request per workflow. Kept for repositories where the recent
    /// run window misses rarely-run workflows; polling never uses it.
    pub async fn latest_runs_by_workflow_legacy(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<LatestRuns> {
        let workflows = self.list_workflows(owner, repo, MAX_PAGE_SIZE).await?;
        let mut latest = LatestRuns::new();

        for workflow in workflows.data.workflows {
            let endpoint = format!(
                "{}/actions/workflows/{}/runs",
                repo_path(owner, repo),
                workflow.id
            );
            match self
                .get::<WorkflowRunList>(&endpoint, &[("per_page", "1".to_string())])
                .await
            {
                Ok(response) => {
                    if let Some(run) = response.data.workflow_runs.into_iter().next() {
                        latest.insert(workflow.id, run);
                    }
                }
                Err(e) => {
                    warn!(
                        repo = %format!("{owner}/{repo}"),
                        workflow_id = workflow.id,
                        error = %e,
                        "Failed to fetch runs for workflow"
                    );
                }
            }
        }

        Ok(latest)
    }

    /// Bounded check for workflow activity. Never fails.
    ///
    /// Asks for a single run; falls back to checking whether any workflow
    /// exists; reports no activity if both calls fail.
    pub async fn probe_activity(&self, owner: &str, repo: &str, window_days: i64) -> ActivityReport {
        match self
            .list_workflow_runs(owner, repo, &RunFilter::latest(1))
            .await
        {
            Ok(response) => {
                let list = response.data;
                let latest_run_at = list.workflow_runs.first().map(|run| run.created_at);
                let recent = latest_run_at
                    .map(|at| Utc::now() - at <= Duration::days(window_days))
                    .unwrap_or(false);
                return ActivityReport {
                    has_activity: list.total_count > 0,
                    run_count: list.total_count,
                    latest_run_at,
                    recent,
                };
            }
            Err(e) => {
                debug!(
                    repo = %format!("{owner}/{repo}"),
                    error = %e,
                    "Run listing failed, falling back to workflow listing"
                );
            }
        }

        match self.list_workflows(owner, repo, 1).await {
            Ok(response) => ActivityReport {
                has_activity: response.data.total_count > 0,
                ..ActivityReport::none()
            },
            Err(e) => {
                debug!(
                    repo = %format!("{owner}/{repo}"),
                    error = %e,
                    "Workflow listing failed, reporting no activity"
                );
                ActivityReport::none()
            }
        }
    }
}

fn repo_path(owner: &str, repo: &str) -> String {
    format!(
        "/repos/{}/{}",
        urlencoding::encode(owner),
        urlencoding::encode(repo)
    )
}

/// Keeps the newest run (by `created_at`) for every workflow id.
pub fn latest_per_workflow(runs: impl IntoIterator<Item = WorkflowRun>) -> LatestRuns {
    let mut latest = LatestRuns::new();
    for run in runs {
        match latest.get(&run.workflow_id) {
            Some(existing) if existing.created_at >= run.created_at => {}
            _ => {
                latest.insert(run.workflow_id, run);
            }
        }
    }
    latest
}

fn header_value<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<T>().ok())
}

/// Reads `x-ratelimit-*` headers. Missing or malformed values become zero.
pub fn parse_rate_limit(headers: &HeaderMap) -> RateLimit {
    RateLimit {
        limit: header_value(headers, "x-ratelimit-limit").unwrap_or(0),
        remaining: header_value(headers, "x-ratelimit-remaining").unwrap_or(0),
        reset: header_value(headers, "x-ratelimit-reset").unwrap_or(0),
    }
}

fn parse_has_next(headers: &HeaderMap) -> Option<bool> {
    let link = headers.get(LINK)?.to_str().ok()?;
    Some(link.split(',').any(|part| part.contains("rel=\"next\"")))
}
