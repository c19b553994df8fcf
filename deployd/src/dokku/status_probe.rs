//! Status probe reading Dokku reports
//!
//! Dokku has no structured deployment status, so the probe reads the text of
//! `apps:report`, `ps:report` and `logs` and maps it to a coarse status.

use std::sync::Arc;

use async_trait::async_trait;

use crate::deploy::probe::{ProbeReport, StatusProbe};
use crate::dokku::command::CommandRunner;
use crate::errors::DeployError;
use crate::models::deployment::DeploymentStatus;

const FAILED_LOGS_MESSAGE: &str = "deployment failed - check logs for details";
const FAILURE_LOG_LINES: usize = 100;
const FAILURE_MARKERS: [&str; 3] = ["error", "failed", "exit code"];

/// Dokku status probe
pub struct DokkuStatusProbe {
    runner: Arc<dyn CommandRunner>,
}

impl DokkuStatusProbe {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl StatusProbe for DokkuStatusProbe {
    async fn check_status(&self, app_name: &str) -> Result<ProbeReport, DeployError> {
        let apps_report = self
            .runner
            .execute("apps:report", &[app_name])
            .await
            .map_err(|e| DeployError::Probe(format!("failed to get app report: {}", e)))?;

        if !is_deployed(&apps_report) {
            return Ok(ProbeReport::new(DeploymentStatus::Running));
        }

        let ps_report = match self.runner.execute("ps:report", &[app_name]).await {
            Ok(report) => report,
            // Process state unknown, the deploy may still be in flight
            Err(_) => return Ok(ProbeReport::new(DeploymentStatus::Running)),
        };

        match process_state(&ps_report) {
            ProcessState::Running => Ok(ProbeReport::new(DeploymentStatus::Succeeded)),
            ProcessState::Stopped => {
                let logs = self
                    .get_logs(app_name, FAILURE_LOG_LINES)
                    .await
                    .unwrap_or_default();
                if logs_indicate_failure(&logs) {
                    Ok(ProbeReport::with_message(
                        DeploymentStatus::Failed,
                        FAILED_LOGS_MESSAGE,
                    ))
                } else {
                    Ok(ProbeReport::new(DeploymentStatus::Succeeded))
                }
            }
            ProcessState::Unknown if apps_report.contains("deploy source:") => {
                Ok(ProbeReport::new(DeploymentStatus::Succeeded))
            }
            ProcessState::Unknown => Ok(ProbeReport::new(DeploymentStatus::Running)),
        }
    }

    async fn get_logs(&self, app_name: &str, lines: usize) -> Result<String, DeployError> {
        let lines = lines.to_string();
        self.runner
            .execute("logs", &[app_name, "--num", &lines])
            .await
            .map_err(|e| DeployError::Probe(format!("failed to get logs: {}", e)))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ProcessState {
    Running,
    Stopped,
    Unknown,
}

fn is_deployed(apps_report: &str) -> bool {
    apps_report.contains("deployed: true") || apps_report.contains("Deployed:")
}

fn process_state(ps_report: &str) -> ProcessState {
    if !ps_report.contains("Processes running") && !ps_report.contains("running:") {
        return ProcessState::Unknown;
    }
    if ps_report.contains("running: 0") || ps_report.contains("Processes running: 0") {
        ProcessState::Stopped
    } else {
        ProcessState::Running
    }
}

fn logs_indicate_failure(logs: &str) -> bool {
    let logs = logs.to_lowercase();
    FAILURE_MARKERS.iter().any(|marker| logs.contains(marker))
}
