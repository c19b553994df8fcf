//! Tracker unit tests

use std::sync::Arc;
use std::time::Duration;

use deployd::deploy::fsm::Transition;
use deployd::deploy::tracker::{DeploymentTracker, TrackerOptions};
use deployd::errors::DeployError;
use deployd::models::deployment::{Deployment, DeploymentStatus};

fn tracker_with_ttl(ttl: Duration) -> DeploymentTracker {
    DeploymentTracker::new(TrackerOptions { cleanup_ttl: ttl })
}

fn tracked(tracker: &DeploymentTracker, app: &str) -> String {
    let deployment = Deployment::new(app, "main").unwrap();
    let id = deployment.id().to_string();
    tracker.track(deployment).unwrap();
    id
}

#[test]
fn test_track_and_get() {
    let tracker = DeploymentTracker::default();
    let deployment = Deployment::new("blog", "v2").unwrap();
    let id = deployment.id().to_string();

    tracker.track(deployment.clone()).unwrap();

    let fetched = tracker.get_by_id(&id).unwrap();
    assert_eq!(fetched, deployment);
    assert_eq!(fetched.status(), DeploymentStatus::Pending);
    assert_eq!(tracker.count(), 1);
}

#[test]
fn test_track_same_id_twice_is_rejected() {
    let tracker = DeploymentTracker::default();
    let deployment = Deployment::new("blog", "main").unwrap();

    tracker.track(deployment.clone()).unwrap();
    let result = tracker.track(deployment);

    assert!(matches!(result, Err(DeployError::AlreadyTracked(_))));
    assert_eq!(tracker.count(), 1);
}

#[test]
fn test_unknown_id_is_not_found() {
    let tracker = DeploymentTracker::default();

    assert!(tracker.get_by_id("deploy_missing").unwrap_err().is_not_found());
    assert!(tracker
        .update_status("deploy_missing", DeploymentStatus::Running, "")
        .unwrap_err()
        .is_not_found());
    assert!(tracker
        .add_logs("deploy_missing", "line")
        .unwrap_err()
        .is_not_found());
    assert_eq!(tracker.count(), 0);
}

#[test]
fn test_remove() {
    let tracker = DeploymentTracker::default();
    let id = tracked(&tracker, "blog");

    let removed = tracker.remove(&id).unwrap();
    assert_eq!(removed.id(), id);
    assert!(tracker.get_by_id(&id).unwrap_err().is_not_found());

    // Second removal is a no-op
    assert!(tracker.remove(&id).is_none());
}

#[test]
fn test_logs_keep_append_order() {
    let tracker = DeploymentTracker::default();
    let id = tracked(&tracker, "blog");

    tracker.add_logs(&id, "a").unwrap();
    tracker.add_logs(&id, "").unwrap();
    tracker.add_logs(&id, "b").unwrap();

    assert_eq!(tracker.get_by_id(&id).unwrap().build_logs(), "ab");
}

#[test]
fn test_update_status_lifecycle() {
    let tracker = DeploymentTracker::default();
    let id = tracked(&tracker, "blog");

    let transition = tracker
        .update_status(&id, DeploymentStatus::Running, "")
        .unwrap();
    assert!(transition.is_applied());
    let running = tracker.get_by_id(&id).unwrap();
    assert!(running.started_at().is_some());
    assert!(running.completed_at().is_none());

    tracker
        .update_status(&id, DeploymentStatus::Failed, "build failed")
        .unwrap();
    let failed = tracker.get_by_id(&id).unwrap();
    assert!(failed.is_failed());
    assert_eq!(failed.error_message(), "build failed");
    assert!(failed.completed_at().is_some());
}

#[test]
fn test_terminal_status_is_final() {
    let tracker = DeploymentTracker::default();
    let id = tracked(&tracker, "blog");

    tracker
        .update_status(&id, DeploymentStatus::Succeeded, "")
        .unwrap();
    let completed_at = tracker.get_by_id(&id).unwrap().completed_at();

    let transition = tracker
        .update_status(&id, DeploymentStatus::Running, "")
        .unwrap();
    assert_eq!(
        transition,
        Transition::Ignored {
            current: DeploymentStatus::Succeeded,
            requested: DeploymentStatus::Running,
        }
    );

    let deployment = tracker.get_by_id(&id).unwrap();
    assert!(deployment.is_successful());
    assert_eq!(deployment.completed_at(), completed_at);
}

#[test]
fn test_get_active_excludes_terminal() {
    let tracker = DeploymentTracker::default();
    let pending = tracked(&tracker, "blog");
    let running = tracked(&tracker, "shop");
    let done = tracked(&tracker, "docs");

    tracker
        .update_status(&running, DeploymentStatus::Running, "")
        .unwrap();
    tracker
        .update_status(&done, DeploymentStatus::RolledBack, "")
        .unwrap();

    let mut active: Vec<String> = tracker
        .get_active()
        .iter()
        .map(|d| d.id().to_string())
        .collect();
    active.sort();
    let mut expected = vec![pending, running];
    expected.sort();

    assert_eq!(active, expected);
    assert_eq!(tracker.get_all().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_expired_removes_only_old_terminal_deployments() {
    let tracker = tracker_with_ttl(Duration::from_millis(100));
    let finished = tracked(&tracker, "blog");
    let running = tracked(&tracker, "shop");

    tracker
        .update_status(&finished, DeploymentStatus::Succeeded, "")
        .unwrap();
    tracker
        .update_status(&running, DeploymentStatus::Running, "")
        .unwrap();

    // Within the TTL nothing is removed
    tokio::time::advance(Duration::from_millis(50)).await;
    assert_eq!(tracker.cleanup_expired(), 0);

    tokio::time::advance(Duration::from_millis(100)).await;
    assert_eq!(tracker.cleanup_expired(), 1);

    assert!(tracker.get_by_id(&finished).unwrap_err().is_not_found());
    assert!(tracker.get_by_id(&running).is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_uses_last_check() {
    let tracker = tracker_with_ttl(Duration::from_millis(100));
    let id = tracked(&tracker, "blog");

    tokio::time::advance(Duration::from_millis(500)).await;
    tracker
        .update_status(&id, DeploymentStatus::Failed, "boom")
        .unwrap();

    tokio::time::advance(Duration::from_millis(50)).await;
    assert_eq!(tracker.cleanup_expired(), 0);
    assert!(tracker.get_by_id(&id).is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tracking() {
    let tracker = Arc::new(DeploymentTracker::default());

    let handles: Vec<_> = (0..100)
        .map(|i| {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                let deployment = Deployment::new(&format!("app-{}", i), "main").unwrap();
                let id = deployment.id().to_string();
                tracker.track(deployment).unwrap();
                tracker
                    .update_status(&id, DeploymentStatus::Running, "")
                    .unwrap();
                tracker.add_logs(&id, "building\n").unwrap();
                id
            })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }

    assert_eq!(tracker.count(), 100);
    assert_eq!(tracker.get_active().len(), 100);
    for id in ids {
        assert_eq!(tracker.get_by_id(&id).unwrap().build_logs(), "building\n");
    }
}
