use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub scheduler: SchedulerSettings,
    pub exceptions: ExceptionsSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub tick_seconds: u64,
    /// How often the daemon logs a summary line; 0 disables it.
    pub summary_seconds: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_seconds: 2,
            summary_seconds: 60,
        }
    }
}

impl SchedulerSettings {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExceptionsSettings {
    /// Window used for the "recent" exception counts.
    pub recent_seconds: u64,
    pub per_app_summary_count: usize,
    pub stores: Vec<StoreSettings>,
    pub groups: Vec<GroupSettings>,
}

impl Default for ExceptionsSettings {
    fn default() -> Self {
        Self {
            recent_seconds: 600,
            per_app_summary_count: 1000,
            stores: Vec::new(),
            groups: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub name: String,
    pub description: String,
    pub poll_interval_seconds: u64,
    pub min_seconds_between_polls: u64,
    pub query_timeout_ms: Option<u64>,
    pub connection_string: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            poll_interval_seconds: 60,
            min_seconds_between_polls: 1,
            query_timeout_ms: Some(30_000),
            connection_string: "memory:".to_string(),
        }
    }
}

impl StoreSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn min_between_polls(&self) -> Duration {
        Duration::from_secs(self.min_seconds_between_polls)
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupSettings {
    pub name: String,
    pub applications: Vec<String>,
}

impl Settings {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("opwatch").join("config.toml"))
    }

    /// Loads from `path`, or from the default location when `None`. A missing
    /// default file yields defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let path = Self::config_path().context("Could not determine config directory")?;
                if !path.exists() {
                    tracing::info!(?path, "Config file not found, using defaults");
                    return Ok(Self::default());
                }
                path
            }
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        tracing::info!(?path, stores = settings.exceptions.stores.len(), "Loaded config");
        Ok(settings)
    }

    /// Duplicate store names are left to the registry, which rejects them
    /// at registration.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.tick_seconds == 0 {
            anyhow::bail!("scheduler.tick_seconds must be greater than 0");
        }

        for store in &self.exceptions.stores {
            if store.name.trim().is_empty() {
                anyhow::bail!("exceptions.stores entries must have a name");
            }
            if store.poll_interval_seconds == 0 {
                anyhow::bail!(
                    "exceptions.stores '{}': poll_interval_seconds must be greater than 0",
                    store.name
                );
            }
            if store.query_timeout_ms == Some(0) {
                anyhow::bail!(
                    "exceptions.stores '{}': query_timeout_ms must be greater than 0",
                    store.name
                );
            }
        }

        let mut seen = HashSet::new();
        for group in &self.exceptions.groups {
            if !seen.insert(group.name.as_str()) {
                anyhow::bail!("exceptions.groups: duplicate group '{}'", group.name);
            }
        }

        if let Some(smallest) = self.smallest_interval() {
            if self.scheduler.tick() >= smallest {
                tracing::warn!(
                    tick_seconds = self.scheduler.tick_seconds,
                    smallest_seconds = smallest.as_secs(),
                    "Scheduler tick is not shorter than the smallest poll interval"
                );
            }
        }

        Ok(())
    }

    /// Smallest configured TTL or node floor, ignoring zero floors.
    fn smallest_interval(&self) -> Option<Duration> {
        self.exceptions
            .stores
            .iter()
            .flat_map(|s| [s.poll_interval_seconds, s.min_seconds_between_polls])
            .filter(|secs| *secs > 0)
            .min()
            .map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.scheduler.tick_seconds, 2);
        assert_eq!(settings.exceptions.recent_seconds, 600);
        assert_eq!(settings.exceptions.per_app_summary_count, 1000);
        assert!(settings.exceptions.stores.is_empty());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            [scheduler]
            tick_seconds = 1

            [exceptions]
            recent_seconds = 300

            [[exceptions.stores]]
            name = "ny-sql01"
            description = "New York exceptions"
            poll_interval_seconds = 10
            min_seconds_between_polls = 5
            query_timeout_ms = 2000
            connection_string = "file:/var/lib/opwatch/ny.json"

            [[exceptions.stores]]
            name = "or-sql01"

            [[exceptions.groups]]
            name = "Core"
            applications = ["Core", "Core API"]
        "#;

        let settings: Settings = toml::from_str(toml).unwrap();
        assert_eq!(settings.scheduler.tick_seconds, 1);
        assert_eq!(settings.scheduler.summary_seconds, 60);
        assert_eq!(settings.exceptions.recent_seconds, 300);
        assert_eq!(settings.exceptions.stores.len(), 2);

        let ny = &settings.exceptions.stores[0];
        assert_eq!(ny.poll_interval(), Duration::from_secs(10));
        assert_eq!(ny.min_between_polls(), Duration::from_secs(5));
        assert_eq!(ny.query_timeout(), Some(Duration::from_millis(2000)));

        let or = &settings.exceptions.stores[1];
        assert_eq!(or.poll_interval_seconds, 60);
        assert_eq!(or.min_seconds_between_polls, 1);
        assert_eq!(or.connection_string, "memory:");

        assert_eq!(settings.exceptions.groups[0].applications.len(), 2);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = Settings::default();
        settings.exceptions.stores.push(StoreSettings {
            name: "ny-sql01".to_string(),
            ..StoreSettings::default()
        });
        assert!(settings.validate().is_ok());

        settings.exceptions.stores[0].poll_interval_seconds = 0;
        assert!(settings.validate().is_err());
        settings.exceptions.stores[0].poll_interval_seconds = 60;

        settings.exceptions.stores[0].query_timeout_ms = Some(0);
        assert!(settings.validate().is_err());
        settings.exceptions.stores[0].query_timeout_ms = None;
        assert!(settings.validate().is_ok());

        settings.exceptions.stores[0].name = "  ".to_string();
        assert!(settings.validate().is_err());
        settings.exceptions.stores[0].name = "ny-sql01".to_string();

        settings.scheduler.tick_seconds = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_duplicate_groups_rejected() {
        let mut settings = Settings::default();
        for _ in 0..2 {
            settings.exceptions.groups.push(GroupSettings {
                name: "Core".to_string(),
                applications: Vec::new(),
            });
        }
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[scheduler]\ntick_seconds = 5\n").unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.scheduler.tick_seconds, 5);

        let missing = dir.path().join("missing.toml");
        assert!(Settings::load(Some(&missing)).is_err());
    }
}
