//! Main application run loop

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::options::{AppOptions, DeployRequest, LifecycleOptions};
use crate::app::state::AppState;
use crate::deploy::poller::DeploymentPoller;
use crate::deploy::tracker::DeploymentTracker;
use crate::errors::DeployError;
use crate::models::deployment::Deployment;
use crate::workers::expiry;

/// Deploy one application against the configured Dokku host and wait for the
/// outcome
pub async fn run(
    version: String,
    options: AppOptions,
    request: DeployRequest,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<Deployment, DeployError> {
    info!("Initializing deployd {}...", version);
    let state = AppState::with_ssh(&options);
    run_with_state(state, &options, request, shutdown_signal).await
}

/// Run a deployment through an already wired engine.
///
/// Returns the deployment as last observed: terminal when it finished, or in
/// whatever state it had when the shutdown signal arrived.
pub async fn run_with_state(
    state: AppState,
    options: &AppOptions,
    request: DeployRequest,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<Deployment, DeployError> {
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(
        shutdown_tx.clone(),
        options.lifecycle.clone(),
        state.poller.clone(),
    );

    init_expiry_worker(
        options.expiry_worker.clone(),
        state.tracker.clone(),
        &mut shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    let deployment = match state
        .service
        .deploy(
            &request.app_name,
            &request.repo_url,
            &request.git_ref,
            request.buildpack.as_deref(),
        )
        .await
    {
        Ok(deployment) => deployment,
        Err(e) => {
            error!("Failed to start deployment: {}", e);
            drop(shutdown_tx);
            shutdown_manager.shutdown().await?;
            return Err(e);
        }
    };

    let result = tokio::select! {
        _ = shutdown_signal => {
            info!("Shutdown signal received, shutting down...");
            state.service.get(deployment.id())
        }
        result = await_terminal(
            &state.tracker,
            deployment.id(),
            options.lifecycle.status_check_interval,
        ) => result,
    };

    drop(shutdown_tx);
    shutdown_manager.shutdown().await?;
    result
}

async fn await_terminal(
    tracker: &DeploymentTracker,
    deployment_id: &str,
    check_interval: Duration,
) -> Result<Deployment, DeployError> {
    loop {
        let deployment = tracker.get_by_id(deployment_id)?;
        if deployment.is_terminal() {
            info!(
                deployment_id = %deployment_id,
                status = %deployment.status(),
                "Deployment finished"
            );
            return Ok(deployment);
        }
        tokio::time::sleep(check_interval).await;
    }
}

// =============================== INITIALIZATION ================================== //

fn init_expiry_worker(
    options: expiry::Options,
    tracker: Arc<DeploymentTracker>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DeployError> {
    info!("Initializing expiry worker...");

    let expiry_handle = tokio::spawn(async move {
        expiry::run(
            &options,
            tracker.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_expiry_worker_handle(expiry_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    poller: DeploymentPoller,
    expiry_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    fn new(
        shutdown_tx: broadcast::Sender<()>,
        lifecycle_options: LifecycleOptions,
        poller: DeploymentPoller,
    ) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            poller,
            expiry_worker_handle: None,
        }
    }

    fn with_expiry_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), DeployError> {
        if self.expiry_worker_handle.is_some() {
            return Err(DeployError::ShutdownError(
                "expiry_worker_handle already set".to_string(),
            ));
        }
        self.expiry_worker_handle = Some(handle);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), DeployError> {
        let _ = self.shutdown_tx.send(());

        let max_delay = self.lifecycle_options.max_shutdown_delay;
        match tokio::time::timeout(max_delay, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Shutdown timed out after {:?}", max_delay);
                Err(DeployError::ShutdownError(format!(
                    "shutdown timed out after {:?}",
                    max_delay
                )))
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), DeployError> {
        info!("Shutting down deployd...");

        // 1. Polling tasks
        self.poller.shutdown().await;

        // 2. Expiry worker
        if let Some(handle) = self.expiry_worker_handle.take() {
            handle
                .await
                .map_err(|e| DeployError::ShutdownError(e.to_string()))?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
