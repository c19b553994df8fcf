//! Deployment service
//!
//! Starts deployments without waiting for them: the record is tracked, the
//! remote deploy is triggered, and the poller takes it from there.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::deploy::fsm::Transition;
use crate::deploy::poller::DeploymentPoller;
use crate::deploy::tracker::DeploymentTracker;
use crate::errors::DeployError;
use crate::models::deployment::{Deployment, DeploymentStatus};
use crate::validate;

/// Message recorded on deployments cancelled through [`DeploymentService::cancel`]
pub const CANCELLED_BY_USER: &str = "deployment cancelled by user";

/// Issues the remote commands that kick off a deployment
#[async_trait]
pub trait DeployTrigger: Send + Sync {
    /// Trigger a deployment of `git_ref` from `repo_url` onto `app_name`
    async fn trigger(
        &self,
        deployment_id: &str,
        app_name: &str,
        repo_url: &str,
        git_ref: &str,
    ) -> Result<(), DeployError>;

    /// Select the buildpack used by the next build of `app_name`
    async fn set_buildpack(&self, app_name: &str, buildpack: &str) -> Result<(), DeployError>;
}

/// Deployments the platform itself remembers
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn deployment_history(&self, app_name: &str) -> Result<Vec<Deployment>, DeployError>;
}

/// Deployment service
pub struct DeploymentService {
    tracker: Arc<DeploymentTracker>,
    poller: DeploymentPoller,
    trigger: Arc<dyn DeployTrigger>,
    history: Arc<dyn HistorySource>,
}

impl DeploymentService {
    /// Create a new deployment service
    pub fn new(
        tracker: Arc<DeploymentTracker>,
        poller: DeploymentPoller,
        trigger: Arc<dyn DeployTrigger>,
        history: Arc<dyn HistorySource>,
    ) -> Self {
        Self {
            tracker,
            poller,
            trigger,
            history,
        }
    }

    /// Start a deployment and return as soon as it is being polled.
    ///
    /// A buildpack that cannot be set is logged and the build goes on with
    /// the application's current one.
    pub async fn deploy(
        &self,
        app_name: &str,
        repo_url: &str,
        git_ref: &str,
        buildpack: Option<&str>,
    ) -> Result<Deployment, DeployError> {
        let deployment = Deployment::new(app_name, git_ref)?.with_repo_url(repo_url)?;
        let buildpack = buildpack.map(str::trim).filter(|bp| !bp.is_empty());
        if let Some(buildpack) = buildpack {
            validate::arg(
                "buildpack",
                buildpack,
                &[validate::is_safe_argument, validate::no_whitespace],
            )?;
        }

        let id = deployment.id().to_string();
        let app_name = deployment.app_name().to_string();
        let git_ref = deployment.git_ref().to_string();
        let repo_url = deployment.repo_url().to_string();

        info!(deployment_id = %id, app_name = %app_name, git_ref = %git_ref, "Starting deployment");

        self.tracker.track(deployment)?;
        self.tracker
            .update_status(&id, DeploymentStatus::Running, "")?;

        if let Some(buildpack) = buildpack {
            if let Err(e) = self.trigger.set_buildpack(&app_name, buildpack).await {
                warn!(
                    deployment_id = %id,
                    app_name = %app_name,
                    buildpack = %buildpack,
                    "Failed to set buildpack, keeping the current one: {}",
                    e
                );
            }
        }

        if let Err(e) = self
            .trigger
            .trigger(&id, &app_name, &repo_url, &git_ref)
            .await
        {
            error!(deployment_id = %id, app_name = %app_name, "Failed to trigger deployment: {}", e);
            self.tracker
                .update_status(&id, DeploymentStatus::Failed, &e.to_string())?;
            return Err(DeployError::Command(format!(
                "failed to trigger deployment of {}: {}",
                app_name, e
            )));
        }

        self.poller.start_polling(&id, &app_name);
        info!(deployment_id = %id, app_name = %app_name, "Deployment triggered");

        self.tracker.get_by_id(&id)
    }

    /// Redeploy the git ref of a finished deployment of `app_name`.
    ///
    /// The new record ends as `RolledBack` once the platform reports success.
    pub async fn rollback(
        &self,
        app_name: &str,
        deployment_id: &str,
    ) -> Result<Deployment, DeployError> {
        let target = self.tracker.get_by_id(deployment_id)?;
        if target.app_name() != app_name.trim() {
            return Err(DeployError::NotFound(format!(
                "{} (application {})",
                deployment_id, app_name
            )));
        }
        if !target.is_terminal() {
            return Err(DeployError::Validation(format!(
                "cannot roll back to incomplete deployment {} (status: {})",
                deployment_id,
                target.status()
            )));
        }
        if target.repo_url().is_empty() {
            return Err(DeployError::Validation(format!(
                "deployment {} has no repository to redeploy",
                deployment_id
            )));
        }

        let deployment = Deployment::rollback_to(&target)?;
        let id = deployment.id().to_string();
        let app_name = target.app_name();

        info!(
            deployment_id = %id,
            app_name = %app_name,
            target = %deployment_id,
            git_ref = %target.git_ref(),
            "Rolling back deployment"
        );

        self.tracker.track(deployment)?;
        self.tracker
            .update_status(&id, DeploymentStatus::Running, "")?;

        if let Err(e) = self
            .trigger
            .trigger(&id, app_name, target.repo_url(), target.git_ref())
            .await
        {
            error!(deployment_id = %id, app_name = %app_name, "Failed to trigger rollback: {}", e);
            self.tracker.update_status(
                &id,
                DeploymentStatus::Failed,
                &format!("rollback failed: {}", e),
            )?;
            return Err(DeployError::Command(format!(
                "failed to roll back {} to {}: {}",
                app_name, deployment_id, e
            )));
        }

        self.poller.start_polling(&id, app_name);
        self.tracker.get_by_id(&id)
    }

    /// Current state of a deployment
    pub fn get(&self, deployment_id: &str) -> Result<Deployment, DeployError> {
        self.tracker.get_by_id(deployment_id)
    }

    /// Deployments that have not reached a terminal status
    pub fn active(&self) -> Vec<Deployment> {
        self.tracker.get_active()
    }

    /// Deployments of an application, most recent first.
    ///
    /// Read from the platform, or from the tracker when the platform cannot
    /// answer or remembers nothing.
    pub async fn history(&self, app_name: &str) -> Vec<Deployment> {
        let mut deployments = match self.history.deployment_history(app_name).await {
            Ok(deployments) if !deployments.is_empty() => deployments,
            Ok(_) => self.tracked(app_name),
            Err(e) => {
                warn!(
                    app_name = %app_name,
                    "Failed to read platform history, using tracked deployments: {}",
                    e
                );
                self.tracked(app_name)
            }
        };
        deployments.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        deployments
    }

    fn tracked(&self, app_name: &str) -> Vec<Deployment> {
        self.tracker
            .get_all()
            .into_iter()
            .filter(|d| d.app_name() == app_name)
            .collect()
    }

    /// Cancel a deployment that is still in flight.
    ///
    /// Polling stops before the deployment is failed with
    /// [`CANCELLED_BY_USER`]. A deployment that is already terminal, even one
    /// that finished concurrently, is left untouched.
    pub fn cancel(&self, deployment_id: &str) -> Result<Deployment, DeployError> {
        info!(deployment_id = %deployment_id, "Cancelling deployment");
        self.poller.stop_polling(deployment_id);

        let transition =
            self.tracker
                .update_status(deployment_id, DeploymentStatus::Failed, CANCELLED_BY_USER)?;
        if let Transition::Ignored { current, .. } = transition {
            return Err(DeployError::Validation(format!(
                "deployment {} is not running (status: {})",
                deployment_id, current
            )));
        }

        self.tracker.get_by_id(deployment_id)
    }

    pub fn tracker(&self) -> &Arc<DeploymentTracker> {
        &self.tracker
    }

    pub fn poller(&self) -> &DeploymentPoller {
        &self.poller
    }
}
