//! `config.toml` in the config directory
//!
//! Every field is optional:
//!
//! ```toml
//! state_file = "~/.local/state/overlord/state.json"
//! snaps_root = "/var/lib/overlord"
//! store_url = "https://store.example.com"
//! jobs = 4
//! poll_interval_ms = 100
//! prune_after_hours = 24
//!
//! [retry]
//! max_attempts = 4
//! base_delay_ms = 500
//! backoff_factor = 2.0
//! max_delay_ms = 30000
//! ```

use crate::paths;
use anyhow::{Context, Result};
use engine::RunnerOptions;
use engine::backend::RetryConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "config.toml";

/// Store used when the config doesn't name one
pub const DEFAULT_STORE_URL: &str = "https://api.snapcraft.io";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Defaults to `state.json` in the state directory
    pub state_file: Option<String>,
    /// Defaults to `snaps/` in the state directory
    pub snaps_root: Option<String>,
    pub store_url: String,
    /// Changes run at the same time
    pub jobs: usize,
    pub poll_interval_ms: u64,
    /// `run` drops ready changes older than this; 0 keeps them forever
    pub prune_after_hours: u64,
    pub retry: RetrySettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_file: None,
            snaps_root: None,
            store_url: DEFAULT_STORE_URL.to_string(),
            jobs: 4,
            poll_interval_ms: 100,
            prune_after_hours: 24,
            retry: RetrySettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            base_delay_ms: defaults.base_delay.as_millis() as u64,
            backoff_factor: defaults.backoff_factor,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
        }
    }
}

impl Config {
    /// Load `config.toml` from the config directory, or defaults if absent
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_dir()?.join(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid {}", path.display()))
    }

    pub fn state_file(&self) -> Result<PathBuf> {
        match &self.state_file {
            Some(file) => Ok(paths::expand(file)),
            None => paths::state_file(),
        }
    }

    pub fn snaps_root(&self) -> Result<PathBuf> {
        match &self.snaps_root {
            Some(root) => Ok(paths::expand(root)),
            None => paths::snaps_root(),
        }
    }

    pub fn runner_options(&self) -> RunnerOptions {
        RunnerOptions {
            jobs: self.jobs.max(1),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
        }
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry.max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            backoff_factor: self.retry.backoff_factor,
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn prune_after(&self) -> Option<Duration> {
        (self.prune_after_hours > 0).then(|| Duration::from_secs(self.prune_after_hours * 3600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.retry(), RetryConfig::default());
        assert_eq!(config.runner_options().jobs, 4);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(
            &path,
            r#"
state_file = "/srv/overlord/state.json"
jobs = 2

[retry]
max_attempts = 1
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.jobs, 2);
        assert_eq!(config.store_url, DEFAULT_STORE_URL);
        assert_eq!(
            config.state_file().unwrap(),
            PathBuf::from("/srv/overlord/state.json")
        );
        let retry = config.retry();
        assert_eq!(retry.max_attempts, 1);
        assert_eq!(retry.base_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "jobs = \"many\"").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Invalid"));
    }

    #[test]
    fn test_prune_after() {
        let mut config = Config::default();
        assert_eq!(config.prune_after(), Some(Duration::from_secs(24 * 3600)));
        config.prune_after_hours = 0;
        assert_eq!(config.prune_after(), None);
    }

    #[test]
    fn test_zero_jobs_is_clamped() {
        let config = Config {
            jobs: 0,
            poll_interval_ms: 0,
            ..Default::default()
        };
        let opts = config.runner_options();
        assert_eq!(opts.jobs, 1);
        assert_eq!(opts.poll_interval, Duration::from_millis(1));
    }
}
