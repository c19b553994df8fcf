//! Deployment models

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DeployError;
use crate::utils::generate_deployment_id;
use crate::validate;

/// Git ref used when the caller does not name one
pub const DEFAULT_GIT_REF: &str = "main";

/// Status of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    RolledBack,
}

impl DeploymentStatus {
    /// No further automatic transitions are expected from a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Succeeded | DeploymentStatus::Failed | DeploymentStatus::RolledBack
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Succeeded => "succeeded",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One deployment attempt of an application.
///
/// Identity fields are read-only; state fields only change through
/// [`crate::deploy::fsm::apply`] and [`Deployment::append_logs`], which the
/// tracker calls under the entry lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    id: String,
    app_name: String,
    git_ref: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    repo_url: String,
    /// Deployment whose git ref this one redeploys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rollback_of: Option<String>,
    pub(crate) status: DeploymentStatus,
    created_at: DateTime<Utc>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
    pub(crate) error_message: String,
    pub(crate) build_logs: String,
}

impl Deployment {
    /// Create a pending deployment for `app_name` at `git_ref`
    pub fn new(app_name: &str, git_ref: &str) -> Result<Self, DeployError> {
        Self::with_created_at(app_name, git_ref, Utc::now())
    }

    /// Create a pending deployment with an explicit creation time
    pub fn with_created_at(
        app_name: &str,
        git_ref: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Self, DeployError> {
        let app_name = app_name.trim();
        if app_name.is_empty() {
            return Err(DeployError::Validation(
                "application name cannot be empty".to_string(),
            ));
        }
        validate::arg("application name", app_name, &[validate::is_valid_app_name])?;

        let git_ref = match git_ref.trim() {
            "" => DEFAULT_GIT_REF,
            r => r,
        };
        validate::arg("git ref", git_ref, &[validate::is_valid_git_ref])?;

        Ok(Self {
            id: generate_deployment_id(),
            app_name: app_name.to_string(),
            git_ref: git_ref.to_string(),
            repo_url: String::new(),
            rollback_of: None,
            status: DeploymentStatus::Pending,
            created_at,
            started_at: None,
            completed_at: None,
            error_message: String::new(),
            build_logs: String::new(),
        })
    }

    /// Create a pending deployment that redeploys `target`'s git ref
    pub fn rollback_to(target: &Deployment) -> Result<Self, DeployError> {
        let mut deployment = Self::new(&target.app_name, &target.git_ref)?;
        deployment.repo_url = target.repo_url.clone();
        deployment.rollback_of = Some(target.id.clone());
        Ok(deployment)
    }

    /// Record the repository the deployment is built from
    pub fn with_repo_url(mut self, repo_url: &str) -> Result<Self, DeployError> {
        let repo_url = repo_url.trim();
        validate::arg(
            "repository URL",
            repo_url,
            &[validate::is_safe_argument, validate::no_whitespace],
        )?;
        self.repo_url = repo_url.to_string();
        Ok(self)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn git_ref(&self) -> &str {
        &self.git_ref
    }

    /// Empty for records not started by this process
    pub fn repo_url(&self) -> &str {
        &self.repo_url
    }

    pub fn rollback_of(&self) -> Option<&str> {
        self.rollback_of.as_deref()
    }

    pub fn is_rollback(&self) -> bool {
        self.rollback_of.is_some()
    }

    pub fn status(&self) -> DeploymentStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    pub fn build_logs(&self) -> &str {
        &self.build_logs
    }

    pub fn is_running(&self) -> bool {
        self.status == DeploymentStatus::Running
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_successful(&self) -> bool {
        self.status == DeploymentStatus::Succeeded
    }

    pub fn is_failed(&self) -> bool {
        self.status == DeploymentStatus::Failed
    }

    /// Time spent since the deployment started running, up to completion
    pub fn duration(&self) -> Duration {
        let Some(started_at) = self.started_at else {
            return Duration::ZERO;
        };
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - started_at).to_std().unwrap_or_default()
    }

    /// Append build log text. Logs are never replaced or truncated.
    pub(crate) fn append_logs(&mut self, text: &str) {
        self.build_logs.push_str(text);
    }
}
