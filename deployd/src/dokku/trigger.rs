//! Git deployment trigger

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::deploy::service::DeployTrigger;
use crate::dokku::command::CommandRunner;
use crate::errors::DeployError;
use crate::validate;

/// Triggers `git:sync --build` on the platform, one deploy per app at a time
pub struct DokkuDeployTrigger {
    runner: Arc<dyn CommandRunner>,
    in_flight: Mutex<HashSet<String>>,
}

impl DokkuDeployTrigger {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn claim(&self, app_name: &str) -> Result<AppClaim<'_>, DeployError> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !in_flight.insert(app_name.to_string()) {
            return Err(DeployError::Validation(format!(
                "deployment already in progress for application {}",
                app_name
            )));
        }
        Ok(AppClaim {
            in_flight: &self.in_flight,
            app_name: app_name.to_string(),
        })
    }
}

/// Releases the app when the trigger call ends, whatever the outcome
struct AppClaim<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    app_name: String,
}

impl Drop for AppClaim<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.app_name);
        debug!(app_name = %self.app_name, "Deployment lock released");
    }
}

#[async_trait]
impl DeployTrigger for DokkuDeployTrigger {
    async fn trigger(
        &self,
        deployment_id: &str,
        app_name: &str,
        repo_url: &str,
        git_ref: &str,
    ) -> Result<(), DeployError> {
        validate::arg("application name", app_name, &[validate::is_valid_app_name])?;
        validate::arg(
            "repository URL",
            repo_url,
            &[validate::is_safe_argument, validate::no_whitespace],
        )?;
        validate::arg("git ref", git_ref, &[validate::is_valid_git_ref])?;

        let _claim = self.claim(app_name)?;

        info!(
            deployment_id = %deployment_id,
            app_name = %app_name,
            repo_url = %repo_url,
            git_ref = %git_ref,
            "Triggering git deployment"
        );

        self.runner
            .execute("git:sync", &["--build", app_name, repo_url, git_ref])
            .await
            .map_err(|e| DeployError::Command(format!("git sync failed: {}", e)))?;

        Ok(())
    }

    async fn set_buildpack(&self, app_name: &str, buildpack: &str) -> Result<(), DeployError> {
        validate::arg("application name", app_name, &[validate::is_valid_app_name])?;
        validate::arg(
            "buildpack",
            buildpack,
            &[validate::is_safe_argument, validate::no_whitespace],
        )?;

        info!(app_name = %app_name, buildpack = %buildpack, "Setting buildpack");
        self.runner
            .execute("buildpacks:set", &[app_name, buildpack])
            .await
            .map_err(|e| DeployError::Command(format!("buildpacks:set failed: {}", e)))?;

        Ok(())
    }
}
