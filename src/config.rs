//! Configuration Management
//!
//! Persistent defaults for gcpgraph, stored as JSON in the user config dir.
//! Command line flags take precedence over the file, and the file over the
//! gcloud defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adapter::DEFAULT_CACHE_TTL;

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Project to discover in
    #[serde(default)]
    pub project_id: Option<String>,
    /// Zones and regions to bind location-scoped types to
    #[serde(default)]
    pub locations: Vec<String>,
    /// How long query results stay cached
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
    /// Per-query deadline
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("gcpgraph").join("config.json"))
    }

    /// Load configuration from disk. A missing or unreadable file gives the
    /// defaults.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring malformed config {:?}: {}", path, e);
                Self::default()
            }),
            Err(e) => {
                tracing::warn!("Failed to read config {:?}: {}", path, e);
                Self::default()
            },
        }
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {:?}", parent))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).with_context(|| format!("writing {:?}", path))?;

        Ok(())
    }

    /// Get effective project (CLI > config > gcloud default)
    pub fn effective_project(&self, cli: Option<&str>) -> Option<String> {
        cli.map(str::to_string)
            .or_else(|| self.project_id.clone())
            .or_else(crate::gcp::auth::get_default_project)
    }

    /// Get effective locations (CLI > config > gcloud default zone)
    pub fn effective_locations(&self, cli: &[String]) -> Vec<String> {
        if !cli.is_empty() {
            return cli.to_vec();
        }
        if !self.locations.is_empty() {
            return self.locations.clone();
        }
        crate::gcp::auth::get_default_zone().into_iter().collect()
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CACHE_TTL)
    }

    /// Per-query deadline (CLI > config); none means no deadline
    pub fn effective_timeout(&self, cli: Option<u64>) -> Option<Duration> {
        cli.or(self.timeout_secs).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("gcpgraph-config-{}-{}", name, std::process::id()))
            .join("config.json")
    }

    #[test]
    fn test_save_then_load() {
        let path = temp_path("roundtrip");
        let config = Config {
            project_id: Some("my-project".to_string()),
            locations: vec!["us-central1-a".to_string(), "us-central1".to_string()],
            cache_ttl_secs: Some(30),
            timeout_secs: None,
        };

        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path), config);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_missing_or_malformed_file_gives_defaults() {
        let path = temp_path("malformed");
        assert_eq!(Config::load_from(&path), Config::default());

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_cli_overrides_config() {
        let config = Config {
            project_id: Some("from-file".to_string()),
            locations: vec!["europe-west1-b".to_string()],
            cache_ttl_secs: None,
            timeout_secs: Some(10),
        };

        assert_eq!(
            config.effective_project(Some("from-cli")).as_deref(),
            Some("from-cli")
        );
        assert_eq!(config.effective_project(None).as_deref(), Some("from-file"));

        let cli = vec!["us-east1-b".to_string()];
        assert_eq!(config.effective_locations(&cli), cli);
        assert_eq!(config.effective_locations(&[]), vec!["europe-west1-b"]);

        assert_eq!(config.effective_timeout(Some(3)), Some(Duration::from_secs(3)));
        assert_eq!(config.effective_timeout(None), Some(Duration::from_secs(10)));
        assert_eq!(config.cache_ttl(), DEFAULT_CACHE_TTL);
    }
}
