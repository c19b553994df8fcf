//! Status probe contract consumed by the poller

use async_trait::async_trait;

use crate::errors::DeployError;
use crate::models::deployment::DeploymentStatus;

/// Coarse status resolved by a probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub status: DeploymentStatus,

    /// Human readable detail, recorded as the error message on failure
    pub message: String,
}

impl ProbeReport {
    pub fn new(status: DeploymentStatus) -> Self {
        Self {
            status,
            message: String::new(),
        }
    }

    pub fn with_message(status: DeploymentStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Resolves the real-world status of an application's deployment.
///
/// Calls are best effort: they may be slow and may fail. A failure is a
/// transient condition for the caller, not a deployment failure.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    /// Resolve the current deployment status of `app_name`
    async fn check_status(&self, app_name: &str) -> Result<ProbeReport, DeployError>;

    /// Fetch up to `lines` recent log lines of `app_name`
    async fn get_logs(&self, app_name: &str, lines: usize) -> Result<String, DeployError>;
}
