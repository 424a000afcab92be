//! Runtime configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use vsync_member::MemberConfig;
use vsync_types::JoinOptions;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Configuration for a [`GroupMember`](crate::GroupMember).
///
/// # Example
///
/// ```toml
/// leave_timeout_ms = 5000
/// sync_transfer_timeout_ms = 10000
///
/// [member]
/// primary_only = true
/// quorum_size = 3
///
/// [join]
/// group_name = "orders"
/// heartbeat_rate_ms = 1000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How long `leave` waits for the exit confirmation.
    pub leave_timeout_ms: u64,

    /// How long a synchronous state request waits for resolution.
    pub sync_transfer_timeout_ms: u64,

    /// Member policy.
    pub member: MemberConfig,

    /// Options used by `join_configured`.
    pub join: JoinOptions,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            leave_timeout_ms: 5_000,
            sync_transfer_timeout_ms: 10_000,
            member: MemberConfig::default(),
            join: JoinOptions::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.leave_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "leave_timeout_ms must be positive".to_string(),
            ));
        }
        if self.sync_transfer_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "sync_transfer_timeout_ms must be positive".to_string(),
            ));
        }
        if self.member.quorum_size == Some(0) {
            return Err(ConfigError::Invalid(
                "member.quorum_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the leave timeout.
    pub fn with_leave_timeout(mut self, timeout: Duration) -> Self {
        self.leave_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the synchronous transfer timeout.
    pub fn with_sync_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.sync_transfer_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the member policy.
    pub fn with_member(mut self, member: MemberConfig) -> Self {
        self.member = member;
        self
    }

    /// Set the configured join options.
    pub fn with_join(mut self, join: JoinOptions) -> Self {
        self.join = join;
        self
    }

    /// How long `leave` waits for the exit confirmation.
    pub fn leave_timeout(&self) -> Duration {
        Duration::from_millis(self.leave_timeout_ms)
    }

    /// How long a synchronous state request waits.
    pub fn sync_transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_transfer_timeout_ms)
    }
}
