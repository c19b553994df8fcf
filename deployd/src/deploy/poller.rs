//! Per-deployment status polling
//!
//! Every polled deployment owns one background task. The task asks the
//! [`StatusProbe`] for the deployment's status on a fixed interval and writes
//! the answer back through the [`DeploymentTracker`] until the deployment is
//! terminal, the time budget runs out, or the probe keeps failing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::deploy::fsm::Transition;
use crate::deploy::probe::{ProbeReport, StatusProbe};
use crate::deploy::tracker::DeploymentTracker;
use crate::errors::DeployError;
use crate::models::deployment::DeploymentStatus;
use crate::utils::format_duration;

/// Deadline used when a budget does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Poller options
#[derive(Debug, Clone)]
pub struct PollerOptions {
    /// Delay between two status checks
    pub interval: Duration,

    /// Budget of a single deployment, it is failed once exceeded
    pub max_duration: Duration,

    /// Probe failures in a row tolerated before the deployment is failed
    pub max_consecutive_errors: u32,

    /// Number of log lines fetched per check
    pub log_lines: usize,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_duration: Duration::from_secs(30 * 60),
            max_consecutive_errors: 5,
            log_lines: 50,
        }
    }
}

/// Why a polling task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The deployment reached a terminal status
    Completed(DeploymentStatus),

    /// The time budget ran out and the deployment was failed
    TimedOut,

    /// The probe failed too many times in a row and the deployment was failed
    ProbeExhausted,

    /// The task was stopped by its owner, the status was left untouched
    Cancelled,

    /// The deployment is no longer tracked
    Untracked,
}

struct ActivePoll {
    generation: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    polls: Mutex<HashMap<String, ActivePoll>>,
    next_generation: AtomicU64,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, ActivePoll>> {
        self.polls.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop the bookkeeping of a finished task unless it was replaced
    fn finish(&self, deployment_id: &str, generation: u64) {
        let mut polls = self.lock();
        if polls
            .get(deployment_id)
            .is_some_and(|poll| poll.generation == generation)
        {
            polls.remove(deployment_id);
        }
    }
}

/// Releases a task's registry entry however the task ends, panics included
struct PollGuard {
    registry: Arc<Registry>,
    deployment_id: String,
    generation: u64,
}

impl Drop for PollGuard {
    fn drop(&mut self) {
        self.registry.finish(&self.deployment_id, self.generation);
    }
}

/// Deployment poller
#[derive(Clone)]
pub struct DeploymentPoller {
    tracker: Arc<DeploymentTracker>,
    probe: Arc<dyn StatusProbe>,
    options: PollerOptions,
    registry: Arc<Registry>,
}

impl DeploymentPoller {
    /// Create a new deployment poller
    pub fn new(
        tracker: Arc<DeploymentTracker>,
        probe: Arc<dyn StatusProbe>,
        options: PollerOptions,
    ) -> Self {
        Self {
            tracker,
            probe,
            options,
            registry: Arc::new(Registry::default()),
        }
    }

    pub fn options(&self) -> &PollerOptions {
        &self.options
    }

    /// Start polling a deployment in the background.
    ///
    /// A task already polling `deployment_id` is cancelled and replaced.
    /// Must be called from within a Tokio runtime.
    pub fn start_polling(&self, deployment_id: &str, app_name: &str) {
        info!(
            deployment_id = %deployment_id,
            app_name = %app_name,
            poll_interval = ?self.options.interval,
            max_duration = ?self.options.max_duration,
            "Starting deployment polling"
        );

        let token = CancellationToken::new();
        let generation = self.registry.next_generation.fetch_add(1, Ordering::Relaxed);
        let task = PollTask {
            deployment_id: deployment_id.to_string(),
            app_name: app_name.to_string(),
            tracker: self.tracker.clone(),
            probe: self.probe.clone(),
            options: self.options.clone(),
            token: token.clone(),
        };

        // Held across spawn so the task cannot finish before it is registered
        let mut polls = self.registry.lock();

        if let Some(previous) = polls.remove(deployment_id) {
            warn!(deployment_id = %deployment_id, "Replacing running poll task");
            previous.token.cancel();
        }

        let registry = self.registry.clone();
        let handle = tokio::spawn(async move {
            // Dropping an unpolled task must not take the registry lock
            let _guard = PollGuard {
                registry,
                deployment_id: task.deployment_id.clone(),
                generation,
            };
            let outcome = task.run().await;
            debug!(
                deployment_id = %task.deployment_id,
                outcome = ?outcome,
                "Poll task finished"
            );
        });

        polls.insert(
            deployment_id.to_string(),
            ActivePoll {
                generation,
                token,
                handle,
            },
        );
    }

    /// Stop polling a deployment. The deployment status is not changed.
    ///
    /// Returns whether a task was running for `deployment_id`.
    pub fn stop_polling(&self, deployment_id: &str) -> bool {
        let removed = self.registry.lock().remove(deployment_id);
        match removed {
            Some(poll) => {
                poll.token.cancel();
                info!(deployment_id = %deployment_id, "Stopped polling for deployment");
                true
            }
            None => false,
        }
    }

    /// Cancel every polling task and wait for them to exit
    pub async fn shutdown(&self) {
        let polls: Vec<(String, ActivePoll)> = self.registry.lock().drain().collect();

        let mut handles = Vec::with_capacity(polls.len());
        for (deployment_id, poll) in polls {
            poll.token.cancel();
            info!(deployment_id = %deployment_id, "Cancelled polling during shutdown");
            handles.push(poll.handle);
        }

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("Poll task ended abnormally: {}", e);
            }
        }
    }

    /// Number of running polling tasks
    pub fn active_poll_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Whether a task is polling `deployment_id`
    pub fn is_polling(&self, deployment_id: &str) -> bool {
        self.registry.lock().contains_key(deployment_id)
    }
}

struct PollTask {
    deployment_id: String,
    app_name: String,
    tracker: Arc<DeploymentTracker>,
    probe: Arc<dyn StatusProbe>,
    options: PollerOptions,
    token: CancellationToken,
}

impl PollTask {
    async fn run(&self) -> PollOutcome {
        let started = Instant::now();
        let deadline = started
            .checked_add(self.options.max_duration)
            .unwrap_or_else(|| started + FAR_FUTURE);

        // A zero period would make the interval panic
        let period = self
            .options
            .interval
            .clamp(Duration::from_millis(1), FAR_FUTURE);
        let mut ticker = time::interval_at(started + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut consecutive_errors: u32 = 0;

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return self.cancelled(),
                _ = time::sleep_until(deadline) => return self.time_out(),
                _ = ticker.tick() => {}
            }

            if Instant::now() >= deadline {
                return self.time_out();
            }

            let result = tokio::select! {
                biased;
                _ = self.token.cancelled() => return self.cancelled(),
                _ = time::sleep_until(deadline) => return self.time_out(),
                result = self.probe.check_status(&self.app_name) => result,
            };

            let report = match result {
                Ok(report) => {
                    consecutive_errors = 0;
                    report
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(
                        deployment_id = %self.deployment_id,
                        app_name = %self.app_name,
                        consecutive_errors,
                        "Failed to check deployment status: {}",
                        e
                    );

                    if consecutive_errors >= self.options.max_consecutive_errors {
                        return self.exhaust(consecutive_errors, &e);
                    }
                    continue;
                }
            };

            let status = match self.record(&report) {
                Ok(Transition::Ignored { current, .. }) => {
                    debug!(
                        deployment_id = %self.deployment_id,
                        status = %current,
                        "Deployment already terminal, stopping poll"
                    );
                    return PollOutcome::Completed(current);
                }
                Ok(Transition::Applied { to, .. }) => to,
                Ok(Transition::Unchanged) => report.status,
                Err(e) if e.is_not_found() => {
                    warn!(deployment_id = %self.deployment_id, "Deployment not found in tracker");
                    return PollOutcome::Untracked;
                }
                Err(e) => {
                    warn!(
                        deployment_id = %self.deployment_id,
                        "Failed to update deployment status: {}",
                        e
                    );
                    continue;
                }
            };

            if matches!(
                report.status,
                DeploymentStatus::Running | DeploymentStatus::Succeeded | DeploymentStatus::Failed
            ) {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => return self.cancelled(),
                    _ = self.collect_logs() => {}
                }
            }

            if status.is_terminal() {
                info!(
                    deployment_id = %self.deployment_id,
                    app_name = %self.app_name,
                    status = %status,
                    error = %report.message,
                    "Deployment completed"
                );
                return PollOutcome::Completed(status);
            }
        }
    }

    fn record(&self, report: &ProbeReport) -> Result<Transition, DeployError> {
        let transition =
            self.tracker
                .update_status(&self.deployment_id, report.status, &report.message)?;

        debug!(
            deployment_id = %self.deployment_id,
            app_name = %self.app_name,
            status = %report.status,
            transition = ?transition,
            "Deployment status checked"
        );
        Ok(transition)
    }

    async fn collect_logs(&self) {
        match self
            .probe
            .get_logs(&self.app_name, self.options.log_lines)
            .await
        {
            Ok(logs) if !logs.is_empty() => {
                if let Err(e) = self.tracker.add_logs(&self.deployment_id, &logs) {
                    debug!(deployment_id = %self.deployment_id, "Failed to store logs: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => {
                debug!(deployment_id = %self.deployment_id, "Failed to fetch logs: {}", e);
            }
        }
    }

    fn cancelled(&self) -> PollOutcome {
        info!(
            deployment_id = %self.deployment_id,
            app_name = %self.app_name,
            "Deployment polling stopped"
        );
        PollOutcome::Cancelled
    }

    fn time_out(&self) -> PollOutcome {
        let message = format!(
            "deployment timed out after {}",
            format_duration(self.options.max_duration)
        );
        warn!(
            deployment_id = %self.deployment_id,
            app_name = %self.app_name,
            "Deployment polling timed out"
        );
        self.fail(&message);
        PollOutcome::TimedOut
    }

    fn exhaust(&self, consecutive_errors: u32, last_error: &DeployError) -> PollOutcome {
        error!(
            deployment_id = %self.deployment_id,
            app_name = %self.app_name,
            consecutive_errors,
            "Too many consecutive polling errors, marking deployment as failed"
        );
        let message = format!(
            "{} consecutive status-check failures: {}",
            consecutive_errors, last_error
        );
        self.fail(&message);
        PollOutcome::ProbeExhausted
    }

    fn fail(&self, message: &str) {
        if let Err(e) = self
            .tracker
            .update_status(&self.deployment_id, DeploymentStatus::Failed, message)
        {
            warn!(
                deployment_id = %self.deployment_id,
                "Failed to mark deployment as failed: {}",
                e
            );
        }
    }
}
