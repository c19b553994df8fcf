//! Settings file management

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::errors::DeployError;
use crate::logs::LogLevel;

/// deployd settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub log_json: bool,

    /// Also write daily rotated log files to this directory
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Tracker configuration
    #[serde(default)]
    pub tracker: TrackerSettings,

    /// Poller configuration
    #[serde(default)]
    pub poller: PollerSettings,

    /// Remote platform connection
    #[serde(default)]
    pub remote: RemoteSettings,

    /// Maximum delay for graceful shutdown in seconds
    #[serde(default = "default_max_shutdown_delay")]
    pub max_shutdown_delay_secs: u64,
}

fn default_max_shutdown_delay() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            tracker: TrackerSettings::default(),
            poller: PollerSettings::default(),
            remote: RemoteSettings::default(),
            max_shutdown_delay_secs: default_max_shutdown_delay(),
        }
    }
}

/// Upper bound of the poll interval in seconds
pub const MAX_POLL_INTERVAL_SECS: u64 = 60 * 60;

/// Upper bound of a deployment's time budget in seconds
pub const MAX_DEPLOYMENT_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

const MAX_CLEANUP_SECS: u64 = 7 * 24 * 60 * 60;
const MAX_COMMAND_TIMEOUT_SECS: u64 = 60 * 60;

impl Settings {
    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), DeployError> {
        check_range("poller.interval_secs", self.poller.interval_secs, MAX_POLL_INTERVAL_SECS)?;
        check_range(
            "poller.max_duration_secs",
            self.poller.max_duration_secs,
            MAX_DEPLOYMENT_DURATION_SECS,
        )?;
        if self.poller.max_consecutive_errors == 0 {
            return Err(DeployError::ConfigError(
                "poller.max_consecutive_errors must be greater than 0".to_string(),
            ));
        }
        check_range(
            "tracker.cleanup_interval_secs",
            self.tracker.cleanup_interval_secs,
            MAX_CLEANUP_SECS,
        )?;
        if self.tracker.cleanup_ttl_secs > MAX_CLEANUP_SECS {
            return Err(DeployError::ConfigError(format!(
                "tracker.cleanup_ttl_secs must be at most {}",
                MAX_CLEANUP_SECS
            )));
        }
        check_range(
            "remote.command_timeout_secs",
            self.remote.command_timeout_secs,
            MAX_COMMAND_TIMEOUT_SECS,
        )?;
        if self.max_shutdown_delay_secs > MAX_COMMAND_TIMEOUT_SECS {
            return Err(DeployError::ConfigError(format!(
                "max_shutdown_delay_secs must be at most {}",
                MAX_COMMAND_TIMEOUT_SECS
            )));
        }
        if self.remote.host.trim().is_empty() {
            return Err(DeployError::ConfigError(
                "remote.host cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_range(name: &str, value: u64, max: u64) -> Result<(), DeployError> {
    if value == 0 {
        return Err(DeployError::ConfigError(format!(
            "{} must be greater than 0",
            name
        )));
    }
    if value > max {
        return Err(DeployError::ConfigError(format!(
            "{} must be at most {}, got {}",
            name, max, value
        )));
    }
    Ok(())
}

/// Tracker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerSettings {
    /// Retention of finished deployments in seconds
    #[serde(default = "default_cleanup_ttl")]
    pub cleanup_ttl_secs: u64,

    /// Delay between expiry passes in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

fn default_cleanup_ttl() -> u64 {
    300
}

fn default_cleanup_interval() -> u64 {
    60
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            cleanup_ttl_secs: default_cleanup_ttl(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

/// Poller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerSettings {
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_max_duration")]
    pub max_duration_secs: u64,

    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,

    #[serde(default = "default_log_lines")]
    pub log_lines: usize,
}

fn default_poll_interval() -> u64 {
    10
}

fn default_max_duration() -> u64 {
    30 * 60
}

fn default_max_consecutive_errors() -> u32 {
    5
}

fn default_log_lines() -> usize {
    50
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
            max_duration_secs: default_max_duration(),
            max_consecutive_errors: default_max_consecutive_errors(),
            log_lines: default_log_lines(),
        }
    }
}

/// Remote platform settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    #[serde(default = "default_remote_host")]
    pub host: String,

    #[serde(default = "default_remote_port")]
    pub port: u16,

    #[serde(default = "default_remote_user")]
    pub user: String,

    /// SSH private key, the ssh agent is used when absent
    #[serde(default)]
    pub key_path: Option<PathBuf>,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_remote_host() -> String {
    "localhost".to_string()
}

fn default_remote_port() -> u16 {
    22
}

fn default_remote_user() -> String {
    "dokku".to_string()
}

fn default_command_timeout() -> u64 {
    60
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            host: default_remote_host(),
            port: default_remote_port(),
            user: default_remote_user(),
            key_path: None,
            command_timeout_secs: default_command_timeout(),
        }
    }
}

/// Load settings from a JSON file, falling back to defaults when it is missing
pub async fn load_settings(path: &Path) -> Result<Settings, DeployError> {
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("Settings file {} not found, using defaults", path.display());
            return Ok(Settings::default());
        }
        Err(e) => return Err(e.into()),
    };

    let settings: Settings = serde_json::from_str(&contents)?;
    settings.validate()?;
    Ok(settings)
}
