use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use runwatch::config::{apply_env_overrides, load_config, DashboardPreferences, MonitorConfig};
use runwatch::credentials::{CredentialManager, CredentialState};
use runwatch::discovery::DiscoveryEngine;
use runwatch::polling::{SchedulerEvent, StatusScheduler};
use runwatch::storage::{DeviceFingerprint, EncryptedStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "runwatch=info".into()),
        )
        .init();

    info!("runwatch starting...");

    let mut config = match std::env::var("RUNWATCH_CONFIG") {
        Ok(path) => load_config(&path)?,
        Err(_) => MonitorConfig::default(),
    };
    apply_env_overrides(&mut config);

    info!(
        api = %config.api.base_url,
        store = %config.storage.path.display(),
        "Configuration loaded"
    );

    // Storage
    let device = DeviceFingerprint::detect();
    let store = Arc::new(EncryptedStore::open(&config.storage.path, &device));
    if !store.available() {
        warn!("Local store unavailable, nothing will be persisted");
    }

    // Credential
    let credentials = Arc::new(CredentialManager::new(
        Arc::clone(&store),
        config.api.base_url.clone(),
    ));
    match std::env::var("RUNWATCH_TOKEN") {
        Ok(token) => {
            let identity = credentials
                .set_credential(&token)
                .await
                .context("RUNWATCH_TOKEN was rejected")?;
            info!(identity = %identity, "Credential set from environment");
        }
        Err(_) => {
            let state = credentials.restore().await;
            info!(state = ?state, "Credential restored");
        }
    }
    if credentials.state() != CredentialState::Valid {
        warn!("No valid credential; set RUNWATCH_TOKEN to a GitHub token");
        return Ok(());
    }

    let preferences = DashboardPreferences::load(&store).await;

    // Discovery
    let discovery = Arc::new(DiscoveryEngine::new(
        Arc::clone(&credentials),
        config.discovery.clone(),
    ));
    let listener = discovery.spawn_listener();
    match discovery.discover(preferences.scope.clone()).await {
        Ok(count) => info!(
            scope = %preferences.scope,
            repositories = count,
            matching_filter = discovery.filtered(&preferences.filter).len(),
            "Discovery complete"
        ),
        Err(e) => warn!(scope = %preferences.scope, error = %e, "Discovery failed"),
    }

    // Polling
    let scheduler = Arc::new(StatusScheduler::new(
        Arc::clone(&credentials),
        Arc::clone(&discovery),
        Arc::clone(&store),
        config.polling.clone(),
        preferences.refresh_interval,
    ));
    let mut events = scheduler.subscribe();
    let watched = scheduler.restore_selection().await;
    if watched == 0 {
        warn!("No repositories selected yet, nothing to poll");
    }
    info!(
        watched = watched,
        interval = %preferences.refresh_interval,
        "Status scheduler ready"
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
            event = events.recv() => match event {
                Ok(SchedulerEvent::RefreshCompleted { at, failed }) => {
                    log_refresh(&scheduler, preferences.only_mine, failed);
                    info!(at = %at, "Next refresh in {}", scheduler.interval());
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Missed scheduler events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    scheduler.shutdown();
    listener.abort();
    Ok(())
}

fn log_refresh(scheduler: &StatusScheduler, only_mine: bool, failed: usize) {
    let selection = scheduler.selection();
    for repo in selection.repositories() {
        let runs = scheduler.visible_runs(repo.id, only_mine);
        match scheduler.status(repo.id).and_then(|s| s.error) {
            Some(error) => warn!(repo = %repo.full_name, error = %error, "Refresh failed"),
            None => {
                for run in runs {
                    info!(
                        repo = %repo.full_name,
                        workflow = run.name.as_deref().unwrap_or("-"),
                        status = ?run.status,
                        conclusion = ?run.conclusion,
                        branch = run.head_branch.as_deref().unwrap_or("-"),
                        "Latest run"
                    );
                }
            }
        }
    }
    if failed > 0 {
        warn!(failed = failed, "Some repositories failed to refresh");
    }
}
