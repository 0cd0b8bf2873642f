//! Display preferences persisted in the encrypted store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::github::models::Scope;
use crate::storage::{EncryptedStore, StorageKey, StoreError};

/// Allowed auto-refresh intervals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub enum RefreshInterval {
    TenSeconds,
    ThirtySeconds,
    OneMinute,
    #[default]
    TwoMinutes,
    FiveMinutes,
    TenMinutes,
    ThirtyMinutes,
    OneHour,
}

impl RefreshInterval {
    pub const ALL: [RefreshInterval; 8] = [
        RefreshInterval::TenSeconds,
        RefreshInterval::ThirtySeconds,
        RefreshInterval::OneMinute,
        RefreshInterval::TwoMinutes,
        RefreshInterval::FiveMinutes,
        RefreshInterval::TenMinutes,
        RefreshInterval::ThirtyMinutes,
        RefreshInterval::OneHour,
    ];

    pub fn as_secs(&self) -> u64 {
        match self {
            RefreshInterval::TenSeconds => 10,
            RefreshInterval::ThirtySeconds => 30,
            RefreshInterval::OneMinute => 60,
            RefreshInterval::TwoMinutes => 120,
            RefreshInterval::FiveMinutes => 300,
            RefreshInterval::TenMinutes => 600,
            RefreshInterval::ThirtyMinutes => 1800,
            RefreshInterval::OneHour => 3600,
        }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.as_secs())
    }
}

impl TryFrom<u64> for RefreshInterval {
    type Error = String;

    fn try_from(secs: u64) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|i| i.as_secs() == secs)
            .ok_or_else(|| format!("unsupported refresh interval: {secs}s"))
    }
}

impl From<RefreshInterval> for u64 {
    fn from(interval: RefreshInterval) -> Self {
        interval.as_secs()
    }
}

impl fmt::Display for RefreshInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.as_secs();
        match secs {
            s if s < 60 => write!(f, "{s}s"),
            s if s < 3600 => write!(f, "{}m", s / 60),
            s => write!(f, "{}h", s / 3600),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

/// User-facing dashboard settings. Plain local preferences.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardPreferences {
    pub refresh_interval: RefreshInterval,
    pub compact: bool,
    pub title: String,
    pub theme: Theme,
    /// Only show runs triggered by the authenticated user
    pub only_mine: bool,
    pub scope: Scope,
    /// Free-text name/description filter for discovered repositories
    pub filter: String,
}

impl Default for DashboardPreferences {
    fn default() -> Self {
        Self {
            refresh_interval: RefreshInterval::default(),
            compact: false,
            title: "GitHub Actions".to_string(),
            theme: Theme::default(),
            only_mine: false,
            scope: Scope::default(),
            filter: String::new(),
        }
    }
}

impl DashboardPreferences {
    /// Stored preferences, or defaults if none (or unreadable).
    pub async fn load(store: &Arc<EncryptedStore>) -> Self {
        store
            .get_json_async(StorageKey::Preferences)
            .await
            .unwrap_or_default()
    }

    pub async fn save(&self, store: &Arc<EncryptedStore>) -> Result<(), StoreError> {
        store.put_json_async(StorageKey::Preferences, self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DeviceFingerprint, SqliteBackend};

    #[test]
    fn test_default_interval_is_two_minutes() {
        assert_eq!(RefreshInterval::default().as_secs(), 120);
        assert_eq!(
            RefreshInterval::default().as_duration(),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn test_interval_bounds() {
        assert_eq!(RefreshInterval::ALL.first().unwrap().as_secs(), 10);
        assert_eq!(RefreshInterval::ALL.last().unwrap().as_secs(), 3600);
        assert_eq!(RefreshInterval::try_from(300).unwrap(), RefreshInterval::FiveMinutes);
        assert!(RefreshInterval::try_from(45).is_err());
    }

    #[test]
    fn test_interval_display() {
        assert_eq!(RefreshInterval::ThirtySeconds.to_string(), "30s");
        assert_eq!(RefreshInterval::TenMinutes.to_string(), "10m");
        assert_eq!(RefreshInterval::OneHour.to_string(), "1h");
    }

    #[test]
    fn test_preferences_serialize_interval_as_seconds() {
        let prefs = DashboardPreferences {
            refresh_interval: RefreshInterval::OneMinute,
            ..DashboardPreferences::default()
        };
        let json = serde_json::to_value(&prefs).unwrap();
        assert_eq!(json["refresh_interval"], 60);
        assert_eq!(json["theme"], "light");

        let invalid = serde_json::json!({"refresh_interval": 42});
        assert!(serde_json::from_value::<DashboardPreferences>(invalid).is_err());
    }

    #[test]
    fn test_partial_preferences_use_defaults() {
        let prefs: DashboardPreferences =
            serde_json::from_str(r#"{"theme": "dark", "only_mine": true}"#).unwrap();
        assert_eq!(prefs.theme, Theme::Dark);
        assert!(prefs.only_mine);
        assert_eq!(prefs.refresh_interval, RefreshInterval::TwoMinutes);
        assert_eq!(prefs.scope, Scope::Mine);
    }

    #[tokio::test]
    async fn test_load_and_save() {
        let device = DeviceFingerprint {
            user_agent: "runwatch/test".to_string(),
            locale: "en-US".to_string(),
            display: "headless".to_string(),
            timezone_offset_minutes: 0,
        };
        let store = Arc::new(EncryptedStore::new(
            Box::new(SqliteBackend::in_memory().unwrap()),
            &device,
        ));

        assert_eq!(
            DashboardPreferences::load(&store).await,
            DashboardPreferences::default()
        );

        let prefs = DashboardPreferences {
            title: "Acme CI".to_string(),
            scope: Scope::Organization("acme".to_string()),
            compact: true,
            ..DashboardPreferences::default()
        };
        prefs.save(&store).await.unwrap();

        assert_eq!(DashboardPreferences::load(&store).await, prefs);
    }
}
