//! Broker bootstrap configuration: where the policy document, session
//! database, and decision log live, plus the server-mode bind settings.
//!
//! This is distinct from the authorization policy document (spec.md §6.2,
//! see [`crate::policy::model::Policy`]): this config describes how the
//! broker process itself starts up, not what it decides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::policy::model::duration_mod;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
pub struct LocalServerConfig {
    #[serde(default)]
    pub bind_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
pub struct RemoteServerConfig {
    #[serde(default)]
    pub bind_address: Option<String>,
    /// Sliding-window rate limit, requests/minute per caller ARN (spec.md
    /// §4.8 "Default: 100 requests/minute").
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,
}

fn default_rate_limit() -> u32 {
    100
}

impl Default for RemoteServerConfig {
    fn default() -> Self {
        Self {
            bind_address: None,
            rate_limit_per_minute: default_rate_limit(),
        }
    }
}

/// Root bootstrap configuration for the broker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
pub struct BrokerConfig {
    /// Store-relative path (or local file path) of the authorization policy
    /// document the [`crate::policy::PolicyLoader`] fetches.
    pub policy_path: String,

    /// Path to the SQLite session/approval/break-glass database.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Path the append-only decision log is written to.
    #[serde(default = "default_decision_log_path")]
    pub decision_log_path: PathBuf,

    /// Profile name -> IAM role ARN to assume for that profile.
    #[serde(default)]
    pub profile_roles: std::collections::HashMap<String, String>,

    /// Profile server mode vends when a poll omits `?profile=` (the common
    /// case: one container-credential server instance maps to one profile).
    #[serde(default)]
    pub default_profile: Option<String>,

    /// TTL granted to a freshly created approval request before it expires
    /// unanswered (spec.md §4.4).
    #[serde(with = "duration_mod", default = "default_approval_ttl")]
    pub approval_request_ttl: Duration,

    #[serde(default)]
    pub local_server: LocalServerConfig,
    #[serde(default)]
    pub remote_server: RemoteServerConfig,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/sentinel-broker/broker.db")
}

fn default_decision_log_path() -> PathBuf {
    PathBuf::from("/var/log/sentinel-broker/decisions.jsonl")
}

fn default_approval_ttl() -> Duration {
    Duration::from_secs(3600)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {0}: {1}")]
    Io(PathBuf, String),
    #[error("failed to parse configuration file {0}: {1}")]
    Parse(PathBuf, String),
}

impl BrokerConfig {
    /// Default configuration file location, overridable via
    /// `SENTINEL_CONFIG_PATH`.
    pub fn default_path() -> PathBuf {
        if let Some(p) = std::env::var_os("SENTINEL_CONFIG_PATH") {
            return PathBuf::from(p);
        }
        if cfg!(target_os = "windows") {
            let home = std::env::var_os("USERPROFILE").unwrap_or_default();
            PathBuf::from(home).join("sentinel").join("config.yaml")
        } else {
            PathBuf::from("/etc/sentinel-broker/config.yaml")
        }
    }

    /// Load from `path` (or [`Self::default_path`] if `None`), applying the
    /// environment-variable overrides a deployment is most likely to set at
    /// the container/unit level rather than bake into the file.
    pub fn load(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.unwrap_or_else(Self::default_path);
        let mut cfg = Self::load_from_file(&path)?;

        if let Ok(raw) = std::env::var("SENTINEL_POLICY_PATH") {
            cfg.policy_path = raw;
        }
        if let Ok(raw) = std::env::var("SENTINEL_DB_PATH") {
            cfg.db_path = PathBuf::from(raw);
        }
        if let Ok(raw) = std::env::var("SENTINEL_DECISION_LOG_PATH") {
            cfg.decision_log_path = PathBuf::from(raw);
        }
        if let Ok(raw) = std::env::var("SENTINEL_LOCAL_BIND_ADDRESS") {
            cfg.local_server.bind_address = Some(raw);
        }
        if let Ok(raw) = std::env::var("SENTINEL_REMOTE_BIND_ADDRESS") {
            cfg.remote_server.bind_address = Some(raw);
        }
        if let Ok(raw) = std::env::var("SENTINEL_REMOTE_RATE_LIMIT") {
            if let Ok(n) = raw.parse() {
                cfg.remote_server.rate_limit_per_minute = n;
            }
        }

        Ok(cfg)
    }

    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e.to_string()))?;
        Self::parse_yaml_with_path(path, &text)
    }

    fn parse_yaml_with_path(path: &Path, text: &str) -> Result<Self, ConfigError> {
        serde_yaml_ng::from_str::<Self>(text).map_err(|e| {
            let msg = if let Some(loc) = e.location() {
                format!("yaml error at line {}, column {}: {}", loc.line(), loc.column(), e)
            } else {
                format!("yaml error: {e}")
            };
            ConfigError::Parse(path.to_path_buf(), msg)
        })
    }
}
