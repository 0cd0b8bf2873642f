pub mod preferences;
pub mod runtime;

pub use preferences::{DashboardPreferences, RefreshInterval, Theme};
pub use runtime::apply_env_overrides;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Complete runwatch configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub polling: PollingConfig,
}

/// GitHub API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_base_url() -> String {
    crate::github::BASE_URL.to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

/// Local encrypted store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// SQLite file holding the encrypted envelopes
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("runwatch.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Repository discovery and enrichment tuning
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    /// Repositories requested per page (capped at 100 by the API)
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Activity probes run concurrently per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between enrichment batches (milliseconds)
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
    /// A run newer than this counts as recent activity
    #[serde(default = "default_activity_window_days")]
    pub activity_window_days: i64,
}

fn default_page_size() -> u32 {
    100
}

fn default_batch_size() -> usize {
    5
}

fn default_batch_pause_ms() -> u64 {
    1000
}

fn default_activity_window_days() -> i64 {
    30
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            batch_size: default_batch_size(),
            batch_pause_ms: default_batch_pause_ms(),
            activity_window_days: default_activity_window_days(),
        }
    }
}

/// Status polling configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    /// Recent runs fetched per repository and reduced to one per workflow
    #[serde(default = "default_runs_per_page")]
    pub runs_per_page: u32,
}

fn default_runs_per_page() -> u32 {
    50
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            runs_per_page: default_runs_per_page(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<MonitorConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config {path}"))?;
    let config: MonitorConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config {path}"))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();
        assert_eq!(config.api.base_url, "https://api.github.com");
        assert_eq!(config.storage.path, PathBuf::from("runwatch.db"));
        assert_eq!(config.discovery.page_size, 100);
        assert_eq!(config.discovery.batch_size, 5);
        assert_eq!(config.discovery.batch_pause_ms, 1000);
        assert_eq!(config.polling.runs_per_page, 50);
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [api]
            base_url = "https://github.example.com/api/v3"

            [storage]
            path = "/tmp/runwatch.db"

            [discovery]
            page_size = 50
            batch_size = 3
            batch_pause_ms = 250
            activity_window_days = 7

            [polling]
            runs_per_page = 20
        "#;

        let config: MonitorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.api.base_url, "https://github.example.com/api/v3");
        assert_eq!(config.storage.path, PathBuf::from("/tmp/runwatch.db"));
        assert_eq!(config.discovery.batch_size, 3);
        assert_eq!(config.discovery.activity_window_days, 7);
        assert_eq!(config.polling.runs_per_page, 20);
    }

    #[test]
    fn test_partial_config() {
        // Missing sections use defaults
        let toml = r#"
            [discovery]
            batch_pause_ms = 0
        "#;

        let config: MonitorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.discovery.batch_pause_ms, 0);
        assert_eq!(config.discovery.batch_size, 5); // Default
        assert_eq!(config.polling.runs_per_page, 50); // Default
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runwatch.toml");
        std::fs::write(&path, "[polling]\nruns_per_page = 10\n").unwrap();

        let config = load_config(path.to_str().unwrap()).unwrap();
        assert_eq!(config.polling.runs_per_page, 10);

        assert!(load_config("/nonexistent/runwatch.toml").is_err());
    }
}
