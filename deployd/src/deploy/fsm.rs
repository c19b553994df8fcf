//! Finite state machine for deployment status transitions
//!
//! ```text
//! Pending ──► Running ──► Succeeded | Failed | RolledBack
//!    └────────────────────────┘
//! ```
//!
//! Terminal statuses are final. A request that would move a terminal record
//! is ignored and reported as [`Transition::Ignored`]. A rollback record that
//! succeeds ends as `RolledBack`.

use chrono::{DateTime, Utc};

use crate::models::deployment::{Deployment, DeploymentStatus};

/// Result of applying a requested status to a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The record moved from one status to another
    Applied {
        from: DeploymentStatus,
        to: DeploymentStatus,
    },

    /// The request matched the current state, nothing changed
    Unchanged,

    /// The record is terminal and was left untouched
    Ignored {
        current: DeploymentStatus,
        requested: DeploymentStatus,
    },
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }
}

/// Apply a requested status to `deployment`.
///
/// `started_at` is set on the first move into `Running` and `completed_at` on
/// the first move into a terminal status. `message` is stored only when the
/// deployment fails.
pub fn apply(
    deployment: &mut Deployment,
    requested: DeploymentStatus,
    message: &str,
    now: DateTime<Utc>,
) -> Transition {
    let current = deployment.status;

    if current.is_terminal() {
        return Transition::Ignored { current, requested };
    }

    match (current, requested) {
        // Never regress, a pending probe result only means "not done yet"
        (_, DeploymentStatus::Pending) => Transition::Unchanged,

        (DeploymentStatus::Running, DeploymentStatus::Running) => Transition::Unchanged,

        (_, DeploymentStatus::Running) => {
            deployment.status = DeploymentStatus::Running;
            deployment.started_at.get_or_insert(now);
            Transition::Applied {
                from: current,
                to: requested,
            }
        }

        (_, terminal) => {
            let terminal = match terminal {
                DeploymentStatus::Succeeded if deployment.is_rollback() => {
                    DeploymentStatus::RolledBack
                }
                other => other,
            };
            deployment.status = terminal;
            deployment.completed_at.get_or_insert(now);
            if terminal == DeploymentStatus::Failed {
                deployment.error_message = message.to_string();
            }
            Transition::Applied {
                from: current,
                to: terminal,
            }
        }
    }
}
