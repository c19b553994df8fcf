//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::deploy::poller::DeploymentPoller;
use crate::deploy::probe::StatusProbe;
use crate::deploy::service::{DeployTrigger, DeploymentService, HistorySource};
use crate::deploy::tracker::DeploymentTracker;
use crate::dokku::command::{CommandRunner, SshCommandRunner};
use crate::dokku::history::DokkuEventHistory;
use crate::dokku::status_probe::DokkuStatusProbe;
use crate::dokku::trigger::DokkuDeployTrigger;

/// Main application state
pub struct AppState {
    /// Tracked deployments
    pub tracker: Arc<DeploymentTracker>,

    /// Background status polling
    pub poller: DeploymentPoller,

    /// Deployment entry point
    pub service: Arc<DeploymentService>,
}

impl AppState {
    /// Wire the engine around the given platform collaborators
    pub fn new(
        options: &AppOptions,
        probe: Arc<dyn StatusProbe>,
        trigger: Arc<dyn DeployTrigger>,
        history: Arc<dyn HistorySource>,
    ) -> Self {
        info!("Initializing application state...");

        let tracker = Arc::new(DeploymentTracker::new(options.tracker.clone()));
        let poller = DeploymentPoller::new(tracker.clone(), probe, options.poller.clone());
        let service = Arc::new(DeploymentService::new(
            tracker.clone(),
            poller.clone(),
            trigger,
            history,
        ));

        Self {
            tracker,
            poller,
            service,
        }
    }

    /// Wire the engine against a Dokku host reached over SSH
    pub fn with_ssh(options: &AppOptions) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(SshCommandRunner::new(options.ssh.clone()));
        let probe = Arc::new(DokkuStatusProbe::new(runner.clone()));
        let trigger = Arc::new(DokkuDeployTrigger::new(runner.clone()));
        let history = Arc::new(DokkuEventHistory::new(runner));
        Self::new(options, probe, trigger, history)
    }
}
