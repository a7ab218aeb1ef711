//! `skyform.toml` - user defaults for state location, parallelism and retries

use anyhow::{Context, Result};
use infragraph::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory holding one state record per resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<String>,

    /// Default number of changes applied in parallel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobs: Option<usize>,

    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts per provider call, including the first
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_backoff")]
    pub backoff: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_attempts() -> u32 {
    1
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_backoff() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff: default_backoff(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Retry policy with `attempts` overridden when given
    pub fn policy(&self, attempts: Option<u32>) -> RetryPolicy {
        RetryPolicy::new(
            attempts.unwrap_or(self.attempts).max(1),
            Duration::from_millis(self.base_delay_ms),
            self.backoff,
        )
        .with_max_delay(Duration::from_millis(self.max_delay_ms))
    }
}

impl Config {
    /// Load from the default location; a missing file means defaults
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config: {}", path.display()))
    }

    /// State directory: `SKYFORM_STATE_DIR`, then config, then platform default
    pub fn state_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = paths::state_dir_override() {
            return Ok(dir);
        }
        match &self.state_dir {
            Some(dir) => Ok(paths::expand(dir)),
            None => paths::default_state_dir(),
        }
    }

    /// Parallelism: CLI flag, then config, then the engine default
    pub fn jobs(&self, flag: Option<usize>) -> usize {
        flag.or(self.jobs)
            .unwrap_or_else(|| infragraph::ExecuteOptions::default().concurrency)
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::tests::with_env;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("skyform.toml")).unwrap();
        assert!(config.state_dir.is_none());
        assert_eq!(config.retry.attempts, 1);
    }

    #[test]
    fn test_load_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skyform.toml");
        fs::write(
            &path,
            r#"
state_dir = "/var/lib/skyform"
jobs = 8

[retry]
attempts = 3
base_delay_ms = 100
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.jobs(None), 8);
        assert_eq!(config.jobs(Some(2)), 2);
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.retry.max_delay_ms, 10_000);

        let policy = config.retry.policy(None);
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.retry.policy(Some(5)).max_attempts, 5);

        with_env(paths::ENV_STATE_DIR, None, || {
            assert_eq!(config.state_dir().unwrap(), PathBuf::from("/var/lib/skyform"));
        });
    }

    #[test]
    fn test_unknown_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skyform.toml");
        fs::write(&path, "parallelism = 3\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_env_state_dir_wins() {
        let config = Config {
            state_dir: Some("/from/config".into()),
            ..Config::default()
        };
        with_env(paths::ENV_STATE_DIR, Some("/from/env"), || {
            assert_eq!(config.state_dir().unwrap(), PathBuf::from("/from/env"));
        });
    }

    #[test]
    fn test_jobs_default() {
        assert_eq!(Config::default().jobs(None), 4);
        assert_eq!(Config::default().jobs(Some(0)), 1);
    }
}
