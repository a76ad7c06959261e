//! Configuration management.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

const DEFAULT_LONG_POLL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SESSION_TTL_HOURS: u32 = 24;

/// Main configuration, stored as `config.json` under the base directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log filter (`trace`..`error`, or directives like `warn,inchat=debug`).
    pub log_level: String,
    /// Database location. Defaults to `inchat.sqlite` under the base directory.
    pub database_path: Option<PathBuf>,
    /// Wait applied to long-poll requests that give no timeout.
    pub long_poll_timeout_secs: u64,
    /// Lifetime of a new session.
    pub session_ttl_hours: u32,
    pub retry: RetrySettings,
}

/// Retry policy for optimistic updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Attempts before giving up with the last conflict. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// First backoff delay. Zero disables backoff.
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            database_path: None,
            long_poll_timeout_secs: DEFAULT_LONG_POLL_TIMEOUT_SECS,
            session_ttl_hours: DEFAULT_SESSION_TTL_HOURS,
            retry: RetrySettings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_initial_ms: 0,
            backoff_max_ms: 50,
        }
    }
}

impl RetrySettings {
    /// `(initial, max)` backoff delays, if backoff is enabled.
    pub fn backoff(&self) -> Option<(Duration, Duration)> {
        (self.backoff_initial_ms > 0).then(|| {
            (
                Duration::from_millis(self.backoff_initial_ms),
                Duration::from_millis(self.backoff_max_ms.max(self.backoff_initial_ms)),
            )
        })
    }
}

impl Config {
    /// Load configuration from the base directory, falling back to defaults.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.long_poll_timeout_secs == 0 {
            return Err(CoreError::Config(
                "long_poll_timeout_secs must be positive".to_string(),
            ));
        }
        if self.session_ttl_hours == 0 {
            return Err(CoreError::Config(
                "session_ttl_hours must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Where the database lives for these paths.
    pub fn database_file(&self, paths: &Paths) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| paths.database_file())
    }

    pub fn long_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.long_poll_timeout_secs)
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("INCHAT_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(database) = std::env::var("INCHAT_DATABASE") {
            if !database.trim().is_empty() {
                self.database_path = Some(PathBuf::from(database));
            }
        }
    }
}
