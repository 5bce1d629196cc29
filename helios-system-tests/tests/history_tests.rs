//! Job history trail scenarios

use std::time::Duration;

use helios_core::descriptors::{Goal, Job, TaskState};
use helios_system_tests::{poll_until, TestCluster};

/// A job that exits immediately, like running /bin/true.
fn one_shot_job() -> Job {
    Job::builder()
        .name("oneshot")
        .version("1")
        .image("busybox:latest")
        .command(["/bin/true"])
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_job_history_trail() {
    let mut cluster = TestCluster::new().await;
    cluster.runtime.set_auto_exit(0);
    cluster.start_agent("h1").await;

    let id = cluster.model.create_job(one_shot_job()).await.unwrap();
    cluster.model.deploy(&id, "h1", Goal::Start).await.unwrap();
    cluster.await_task_state("h1", &id, TaskState::Exited).await;
    cluster.model.undeploy(&id, "h1").await.unwrap();

    let events = poll_until(Duration::from_secs(5), || async {
        let events = cluster.model.job_history(&id).await.unwrap();
        let non_pull = events
            .iter()
            .filter(|e| e.status.state != TaskState::PullingImage)
            .count();
        if non_pull >= 4 {
            Some(events)
        } else {
            None
        }
    })
    .await
    .expect("history never completed");

    // Skip any leading PULLING_IMAGE events (a flaky pull may add more
    // than one); the lifecycle that follows is fixed.
    let mut n = 0;
    while events[n].status.state == TaskState::PullingImage {
        assert!(events[n].status.container_id.is_none());
        n += 1;
    }

    assert_eq!(events[n].status.state, TaskState::Creating);
    assert!(events[n].status.container_id.is_none());

    assert_eq!(events[n + 1].status.state, TaskState::Starting);
    assert!(events[n + 1].status.container_id.is_some());

    assert_eq!(events[n + 2].status.state, TaskState::Running);
    assert_eq!(events[n + 3].status.state, TaskState::Exited);
    assert_eq!(events[n + 3].status.exit_code, Some(0));

    // Timestamps are non-decreasing across the whole trail.
    for pair in events.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
    for event in &events {
        assert_eq!(event.host, "h1");
    }
}

#[tokio::test]
async fn test_history_includes_pull_retries() {
    let mut cluster = TestCluster::new().await;
    cluster.runtime.fail_next_pulls(2);
    cluster.start_agent("h1").await;

    let id = cluster.model.create_job(one_shot_job()).await.unwrap();
    cluster.model.deploy(&id, "h1", Goal::Start).await.unwrap();
    cluster.await_task_state("h1", &id, TaskState::Running).await;

    let events = cluster.model.job_history(&id).await.unwrap();
    let pulls = events
        .iter()
        .take_while(|e| e.status.state == TaskState::PullingImage)
        .count();
    assert_eq!(pulls, 3);
}

#[tokio::test]
async fn test_history_survives_undeploy_and_remove() {
    let mut cluster = TestCluster::new().await;
    cluster.runtime.set_auto_exit(0);
    cluster.start_agent("h1").await;

    let id = cluster.model.create_job(one_shot_job()).await.unwrap();
    cluster.model.deploy(&id, "h1", Goal::Start).await.unwrap();
    cluster.await_task_state("h1", &id, TaskState::Exited).await;
    cluster.model.undeploy(&id, "h1").await.unwrap();

    poll_until(Duration::from_secs(5), || async {
        let status = cluster.model.host_status("h1").await.unwrap();
        if status.statuses.is_empty() {
            Some(())
        } else {
            None
        }
    })
    .await
    .expect("status never cleared");

    // The trail is still queryable after the task is gone.
    let events = cluster.model.job_history(&id).await.unwrap();
    assert!(!events.is_empty());
}
