//! Poller unit tests

use std::sync::Arc;
use std::time::Duration;

use deployd::deploy::poller::{DeploymentPoller, PollerOptions};
use deployd::deploy::probe::{ProbeReport, StatusProbe};
use deployd::deploy::tracker::DeploymentTracker;
use deployd::errors::DeployError;
use deployd::models::deployment::{Deployment, DeploymentStatus};

use crate::fakes::{HangingStatus, PanickingStatus, ScriptedProbe};

fn fast_options() -> PollerOptions {
    PollerOptions {
        interval: Duration::from_millis(10),
        max_duration: Duration::from_secs(60),
        max_consecutive_errors: 3,
        log_lines: 20,
    }
}

fn setup<P: StatusProbe + 'static>(
    probe: P,
    options: PollerOptions,
) -> (Arc<DeploymentTracker>, Arc<P>, DeploymentPoller, String) {
    let tracker = Arc::new(DeploymentTracker::default());
    let probe = Arc::new(probe);
    let poller = DeploymentPoller::new(tracker.clone(), probe.clone(), options);

    let deployment = Deployment::new("blog", "main").unwrap();
    let id = deployment.id().to_string();
    tracker.track(deployment).unwrap();

    (tracker, probe, poller, id)
}

async fn wait_until_stopped(poller: &DeploymentPoller, deployment_id: &str) {
    while poller.is_polling(deployment_id) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_polls_until_succeeded() {
    let probe = ScriptedProbe::new(vec![
        Ok(ProbeReport::new(DeploymentStatus::Running)),
        Ok(ProbeReport::new(DeploymentStatus::Succeeded)),
    ])
    .with_logs("-----> Build succeeded\n");
    let (tracker, probe, poller, id) = setup(probe, fast_options());

    poller.start_polling(&id, "blog");
    wait_until_stopped(&poller, &id).await;

    let deployment = tracker.get_by_id(&id).unwrap();
    assert_eq!(deployment.status(), DeploymentStatus::Succeeded);
    assert!(deployment.started_at().is_some());
    assert!(deployment.completed_at().is_some());
    assert_eq!(
        deployment.build_logs(),
        "-----> Build succeeded\n-----> Build succeeded\n"
    );
    assert_eq!(probe.checks(), 2);
    assert_eq!(probe.log_fetches(), 2);

    // No more probe calls once completed
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(probe.checks(), 2);
    assert_eq!(poller.active_poll_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_probe_failure_message_is_recorded() {
    let probe = ScriptedProbe::new(vec![Ok(ProbeReport::with_message(
        DeploymentStatus::Failed,
        "deployment failed - check logs for details",
    ))]);
    let (tracker, _probe, poller, id) = setup(probe, fast_options());

    poller.start_polling(&id, "blog");
    wait_until_stopped(&poller, &id).await;

    let deployment = tracker.get_by_id(&id).unwrap();
    assert!(deployment.is_failed());
    assert_eq!(
        deployment.error_message(),
        "deployment failed - check logs for details"
    );
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_probe_errors_fail_deployment() {
    let (tracker, probe, poller, id) = setup(ScriptedProbe::failing(), fast_options());

    poller.start_polling(&id, "blog");
    wait_until_stopped(&poller, &id).await;

    let deployment = tracker.get_by_id(&id).unwrap();
    assert!(deployment.is_failed());
    assert!(deployment
        .error_message()
        .starts_with("3 consecutive status-check failures"));
    assert!(deployment.error_message().contains("connection refused"));
    assert_eq!(probe.checks(), 3);
    assert_eq!(probe.log_fetches(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_successful_check_resets_error_count() {
    let probe_error = || Err(DeployError::Probe("timeout".to_string()));
    let probe = ScriptedProbe::new(vec![
        probe_error(),
        probe_error(),
        Ok(ProbeReport::new(DeploymentStatus::Running)),
        probe_error(),
        probe_error(),
        Ok(ProbeReport::new(DeploymentStatus::Succeeded)),
    ]);
    let (tracker, probe, poller, id) = setup(probe, fast_options());

    poller.start_polling(&id, "blog");
    wait_until_stopped(&poller, &id).await;

    assert!(tracker.get_by_id(&id).unwrap().is_successful());
    assert_eq!(probe.checks(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_deployment_times_out() {
    let options = PollerOptions {
        max_duration: Duration::from_millis(50),
        ..fast_options()
    };
    let probe = ScriptedProbe::always(DeploymentStatus::Running);
    let (tracker, _probe, poller, id) = setup(probe, options);

    poller.start_polling(&id, "blog");
    wait_until_stopped(&poller, &id).await;

    let deployment = tracker.get_by_id(&id).unwrap();
    assert!(deployment.is_failed());
    assert_eq!(deployment.error_message(), "deployment timed out after 50ms");
}

#[tokio::test(start_paused = true)]
async fn test_stop_polling_leaves_status_untouched() {
    let probe = ScriptedProbe::always(DeploymentStatus::Running);
    let (tracker, probe, poller, id) = setup(probe, fast_options());

    poller.start_polling(&id, "blog");
    tokio::time::sleep(Duration::from_millis(25)).await;

    assert!(poller.stop_polling(&id));
    assert!(!poller.is_polling(&id));
    assert!(!poller.stop_polling(&id));

    let checks = probe.checks();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(probe.checks(), checks);
    assert_eq!(
        tracker.get_by_id(&id).unwrap().status(),
        DeploymentStatus::Running
    );
}

#[tokio::test(start_paused = true)]
async fn test_start_polling_replaces_running_task() {
    let probe = ScriptedProbe::always(DeploymentStatus::Running);
    let (_tracker, probe, poller, id) = setup(probe, fast_options());

    poller.start_polling(&id, "blog");
    poller.start_polling(&id, "blog");
    assert_eq!(poller.active_poll_count(), 1);

    tokio::time::sleep(Duration::from_millis(15)).await;
    assert_eq!(probe.checks(), 1);
    assert!(poller.is_polling(&id));

    poller.shutdown().await;
    assert_eq!(poller.active_poll_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_externally_finished_deployment_stops_polling() {
    let probe = ScriptedProbe::always(DeploymentStatus::Running);
    let (tracker, probe, poller, id) = setup(probe, fast_options());

    poller.start_polling(&id, "blog");
    tokio::time::sleep(Duration::from_millis(15)).await;

    tracker
        .update_status(&id, DeploymentStatus::Failed, "cancelled")
        .unwrap();
    wait_until_stopped(&poller, &id).await;

    let deployment = tracker.get_by_id(&id).unwrap();
    assert!(deployment.is_failed());
    assert_eq!(deployment.error_message(), "cancelled");
    assert_eq!(probe.checks(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_untracked_deployment_stops_polling() {
    let probe = ScriptedProbe::always(DeploymentStatus::Running);
    let (tracker, _probe, poller, id) = setup(probe, fast_options());

    poller.start_polling(&id, "blog");
    tokio::time::sleep(Duration::from_millis(15)).await;

    assert!(tracker.remove(&id).is_some());
    wait_until_stopped(&poller, &id).await;
    assert_eq!(tracker.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_every_task() {
    let tracker = Arc::new(DeploymentTracker::default());
    let probe = Arc::new(ScriptedProbe::always(DeploymentStatus::Running));
    let poller = DeploymentPoller::new(tracker.clone(), probe.clone(), fast_options());

    let mut ids = Vec::new();
    for app in ["blog", "shop", "docs"] {
        let deployment = Deployment::new(app, "main").unwrap();
        ids.push(deployment.id().to_string());
        tracker.track(deployment).unwrap();
        poller.start_polling(ids.last().unwrap(), app);
    }
    assert_eq!(poller.active_poll_count(), 3);

    tokio::time::sleep(Duration::from_millis(25)).await;
    poller.shutdown().await;

    assert_eq!(poller.active_poll_count(), 0);
    for id in &ids {
        assert_eq!(
            tracker.get_by_id(id).unwrap().status(),
            DeploymentStatus::Running
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_log_fetch_failure_never_fails_deployment() {
    let probe = ScriptedProbe::new(vec![
        Ok(ProbeReport::new(DeploymentStatus::Running)),
        Ok(ProbeReport::new(DeploymentStatus::Succeeded)),
    ])
    .with_failing_logs("logs: connection reset by peer");
    let (tracker, probe, poller, id) = setup(probe, fast_options());

    poller.start_polling(&id, "blog");
    wait_until_stopped(&poller, &id).await;

    let deployment = tracker.get_by_id(&id).unwrap();
    assert!(deployment.is_successful());
    assert!(deployment.error_message().is_empty());
    assert!(deployment.build_logs().is_empty());
    assert_eq!(probe.checks(), 2);
    assert_eq!(probe.log_fetches(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stop_polling_interrupts_hanging_status_check() {
    let (tracker, status, poller, id) = setup(HangingStatus::default(), fast_options());

    poller.start_polling(&id, "blog");
    tokio::time::sleep(Duration::from_millis(15)).await;
    assert_eq!(status.waiting(), 1);

    assert!(poller.stop_polling(&id));
    tokio::time::timeout(Duration::from_secs(1), async {
        while status.waiting() > 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("status check still waiting after stop_polling");

    assert_eq!(
        tracker.get_by_id(&id).unwrap().status(),
        DeploymentStatus::Pending
    );
}

#[tokio::test(start_paused = true)]
async fn test_deadline_interrupts_hanging_status_check() {
    let options = PollerOptions {
        max_duration: Duration::from_millis(50),
        ..fast_options()
    };
    let (tracker, status, poller, id) = setup(HangingStatus::default(), options);

    poller.start_polling(&id, "blog");
    tokio::time::timeout(Duration::from_secs(1), wait_until_stopped(&poller, &id))
        .await
        .expect("hanging status check outlived the deadline");

    let deployment = tracker.get_by_id(&id).unwrap();
    assert!(deployment.is_failed());
    assert_eq!(deployment.error_message(), "deployment timed out after 50ms");
    assert_eq!(status.waiting(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_budget_polls_to_completion() {
    let options = PollerOptions {
        max_duration: Duration::MAX,
        ..fast_options()
    };
    let probe = ScriptedProbe::new(vec![
        Ok(ProbeReport::new(DeploymentStatus::Running)),
        Ok(ProbeReport::new(DeploymentStatus::Succeeded)),
    ]);
    let (tracker, _probe, poller, id) = setup(probe, options);

    poller.start_polling(&id, "blog");
    wait_until_stopped(&poller, &id).await;

    assert!(tracker.get_by_id(&id).unwrap().is_successful());
    assert_eq!(poller.active_poll_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_interval_still_times_out() {
    let options = PollerOptions {
        interval: Duration::MAX,
        max_duration: Duration::from_millis(50),
        ..fast_options()
    };
    let probe = ScriptedProbe::always(DeploymentStatus::Running);
    let (tracker, probe, poller, id) = setup(probe, options);

    poller.start_polling(&id, "blog");
    wait_until_stopped(&poller, &id).await;

    assert!(tracker.get_by_id(&id).unwrap().is_failed());
    assert_eq!(probe.checks(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_status_check_releases_its_slot() {
    let (tracker, _status, poller, id) = setup(PanickingStatus, fast_options());

    poller.start_polling(&id, "blog");
    assert!(poller.is_polling(&id));

    tokio::time::timeout(Duration::from_secs(1), wait_until_stopped(&poller, &id))
        .await
        .expect("panicked task left its registry entry behind");

    assert_eq!(poller.active_poll_count(), 0);
    assert_eq!(
        tracker.get_by_id(&id).unwrap().status(),
        DeploymentStatus::Pending
    );

    // A fresh task can be started and shut down normally
    poller.start_polling(&id, "blog");
    poller.shutdown().await;
    assert_eq!(poller.active_poll_count(), 0);
}
