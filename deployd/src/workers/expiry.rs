//! Expiry worker removing finished deployments from the tracker

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, info};

use crate::deploy::tracker::DeploymentTracker;

/// Expiry worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Delay between two expiry passes
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// Run the expiry worker
pub async fn run<S, F>(
    options: &Options,
    tracker: &DeploymentTracker,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!(
        "Expiry worker starting (interval {:?}, ttl {:?})...",
        options.interval,
        tracker.cleanup_ttl()
    );

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Expiry worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        let removed = tracker.cleanup_expired();
        if removed > 0 {
            info!("Expired {} finished deployments", removed);
        } else {
            debug!("No deployments to expire ({} tracked)", tracker.count());
        }
    }
}
