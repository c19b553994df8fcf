//! In-memory registry of tracked deployments
//!
//! A coarse lock guards the map structure and a per-entry lock guards the
//! record itself, so a status update on one deployment never waits on an
//! update of another. Locks are always taken map first, entry second, and
//! are never held across an await point.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::deploy::fsm::{self, Transition};
use crate::errors::DeployError;
use crate::models::deployment::{Deployment, DeploymentStatus};

/// Tracker options
#[derive(Debug, Clone)]
pub struct TrackerOptions {
    /// How long a terminal deployment is kept after it was last checked
    pub cleanup_ttl: Duration,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            cleanup_ttl: Duration::from_secs(300),
        }
    }
}

struct TrackedEntry {
    deployment: Deployment,
    tracked_since: Instant,
    last_checked: Instant,
}

type SharedEntry = Arc<Mutex<TrackedEntry>>;

fn lock_entry(entry: &SharedEntry) -> MutexGuard<'_, TrackedEntry> {
    entry.lock().unwrap_or_else(|e| e.into_inner())
}

/// Deployment tracker
pub struct DeploymentTracker {
    entries: RwLock<HashMap<String, SharedEntry>>,
    cleanup_ttl: Duration,
}

impl DeploymentTracker {
    /// Create a new deployment tracker
    pub fn new(options: TrackerOptions) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            cleanup_ttl: options.cleanup_ttl,
        }
    }

    /// Start tracking a deployment.
    ///
    /// An id that is already tracked is a caller bug and is rejected rather
    /// than overwritten.
    pub fn track(&self, deployment: Deployment) -> Result<(), DeployError> {
        if deployment.id().is_empty() {
            return Err(DeployError::Validation(
                "deployment id cannot be empty".to_string(),
            ));
        }
        if deployment.app_name().is_empty() {
            return Err(DeployError::Validation(
                "deployment application name cannot be empty".to_string(),
            ));
        }

        let id = deployment.id().to_string();
        let now = Instant::now();

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.contains_key(&id) {
            return Err(DeployError::AlreadyTracked(id));
        }

        debug!(deployment_id = %id, app_name = %deployment.app_name(), "Tracking deployment");
        entries.insert(
            id,
            Arc::new(Mutex::new(TrackedEntry {
                deployment,
                tracked_since: now,
                last_checked: now,
            })),
        );

        Ok(())
    }

    fn entry(&self, deployment_id: &str) -> Result<SharedEntry, DeployError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(deployment_id)
            .cloned()
            .ok_or_else(|| DeployError::NotFound(deployment_id.to_string()))
    }

    /// Get a snapshot of a tracked deployment
    pub fn get_by_id(&self, deployment_id: &str) -> Result<Deployment, DeployError> {
        let entry = self.entry(deployment_id)?;
        let tracked = lock_entry(&entry);
        Ok(tracked.deployment.clone())
    }

    /// Apply a status transition to a tracked deployment
    pub fn update_status(
        &self,
        deployment_id: &str,
        status: DeploymentStatus,
        error_message: &str,
    ) -> Result<Transition, DeployError> {
        let entry = self.entry(deployment_id)?;
        let mut tracked = lock_entry(&entry);

        tracked.last_checked = Instant::now();
        let transition = fsm::apply(&mut tracked.deployment, status, error_message, Utc::now());

        match transition {
            Transition::Applied { from, to } => {
                info!(
                    deployment_id = %deployment_id,
                    app_name = %tracked.deployment.app_name(),
                    from = %from,
                    to = %to,
                    "Deployment status changed"
                );
            }
            Transition::Ignored { current, requested } => {
                warn!(
                    deployment_id = %deployment_id,
                    current = %current,
                    requested = %requested,
                    "Ignoring status update on terminal deployment"
                );
            }
            Transition::Unchanged => {}
        }

        Ok(transition)
    }

    /// Append text to a deployment's build logs
    pub fn add_logs(&self, deployment_id: &str, text: &str) -> Result<(), DeployError> {
        let entry = self.entry(deployment_id)?;
        if text.is_empty() {
            return Ok(());
        }

        let mut tracked = lock_entry(&entry);
        tracked.deployment.append_logs(text);
        Ok(())
    }

    /// Stop tracking a deployment, returning its last snapshot.
    ///
    /// Removing an unknown id is a no-op, concurrent removals are expected.
    pub fn remove(&self, deployment_id: &str) -> Option<Deployment> {
        let removed = {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            entries.remove(deployment_id)
        };

        let entry = removed?;
        debug!(deployment_id = %deployment_id, "Removed deployment from tracking");
        let deployment = lock_entry(&entry).deployment.clone();
        Some(deployment)
    }

    /// Snapshot of every tracked deployment
    pub fn get_all(&self) -> Vec<Deployment> {
        self.collect(|_| true)
    }

    /// Snapshot of every deployment that is not terminal
    pub fn get_active(&self) -> Vec<Deployment> {
        self.collect(|deployment| !deployment.is_terminal())
    }

    fn collect<F>(&self, filter: F) -> Vec<Deployment>
    where
        F: Fn(&Deployment) -> bool,
    {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .values()
            .filter_map(|entry| {
                let tracked = lock_entry(entry);
                if filter(&tracked.deployment) {
                    Some(tracked.deployment.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    /// Number of tracked deployments
    pub fn count(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Configured retention of terminal deployments
    pub fn cleanup_ttl(&self) -> Duration {
        self.cleanup_ttl
    }

    fn is_expired(&self, tracked: &TrackedEntry, now: Instant) -> bool {
        tracked.deployment.is_terminal()
            && now.saturating_duration_since(tracked.last_checked) > self.cleanup_ttl
    }

    /// Remove terminal deployments not checked within the TTL.
    ///
    /// Active deployments are kept regardless of age. Returns the number of
    /// removed deployments.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();

        let candidates: Vec<String> = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            entries
                .iter()
                .filter(|(_, entry)| self.is_expired(&lock_entry(entry), now))
                .map(|(id, _)| id.clone())
                .collect()
        };

        if candidates.is_empty() {
            return 0;
        }

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let mut removed = 0;
        for id in candidates {
            // Re-check, the entry may have been updated since the scan
            let still_expired = entries
                .get(&id)
                .map(|entry| {
                    let tracked = lock_entry(entry);
                    let expired = self.is_expired(&tracked, now);
                    if expired {
                        debug!(
                            deployment_id = %id,
                            status = %tracked.deployment.status(),
                            tracked_for = ?now.saturating_duration_since(tracked.tracked_since),
                            "Expiring deployment"
                        );
                    }
                    expired
                })
                .unwrap_or(false);

            if still_expired {
                entries.remove(&id);
                removed += 1;
            }
        }

        removed
    }
}

impl Default for DeploymentTracker {
    fn default() -> Self {
        Self::new(TrackerOptions::default())
    }
}
