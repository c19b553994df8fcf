//! Application configuration options

use std::time::Duration;

use crate::deploy::poller::PollerOptions;
use crate::deploy::tracker::TrackerOptions;
use crate::dokku::command::SshOptions;
use crate::storage::settings::Settings;
use crate::workers::expiry;

/// Main application options
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Tracker configuration
    pub tracker: TrackerOptions,

    /// Poller configuration
    pub poller: PollerOptions,

    /// Expiry worker options
    pub expiry_worker: expiry::Options,

    /// Remote platform connection
    pub ssh: SshOptions,
}

impl AppOptions {
    /// Build options from a validated settings file
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: Duration::from_secs(settings.max_shutdown_delay_secs),
                ..Default::default()
            },
            tracker: TrackerOptions {
                cleanup_ttl: Duration::from_secs(settings.tracker.cleanup_ttl_secs),
            },
            poller: PollerOptions {
                interval: Duration::from_secs(settings.poller.interval_secs),
                max_duration: Duration::from_secs(settings.poller.max_duration_secs),
                max_consecutive_errors: settings.poller.max_consecutive_errors,
                log_lines: settings.poller.log_lines,
            },
            expiry_worker: expiry::Options {
                interval: Duration::from_secs(settings.tracker.cleanup_interval_secs),
            },
            ssh: SshOptions {
                host: settings.remote.host.clone(),
                port: settings.remote.port,
                user: settings.remote.user.clone(),
                key_path: settings.remote.key_path.clone(),
                command_timeout: Duration::from_secs(settings.remote.command_timeout_secs),
            },
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// How often the runner looks at the tracked deployment
    pub status_check_interval: Duration,

    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            status_check_interval: Duration::from_secs(1),
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// A deployment requested on the command line
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub app_name: String,
    pub repo_url: String,
    pub git_ref: String,

    /// Buildpack set on the application before the build
    pub buildpack: Option<String>,
}
