use super::MonitorConfig;
use std::path::PathBuf;

/// Applies `RUNWATCH_*` environment variables on top of a loaded config.
///
/// Unparseable values are ignored and the configured value kept.
pub fn apply_env_overrides(config: &mut MonitorConfig) {
    apply_overrides(config, |name| std::env::var(name).ok());
}

fn apply_overrides(config: &mut MonitorConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("RUNWATCH_API_URL") {
        config.api.base_url = v;
    }
    if let Some(v) = var("RUNWATCH_STORE_PATH") {
        config.storage.path = PathBuf::from(v);
    }
    if let Some(v) = var("RUNWATCH_BATCH_PAUSE_MS") {
        if let Ok(n) = v.parse::<u64>() {
            config.discovery.batch_pause_ms = n;
        }
    }
    if let Some(v) = var("RUNWATCH_RUNS_PER_PAGE") {
        if let Ok(n) = v.parse::<u32>() {
            config.polling.runs_per_page = n;
        }
    }
}
