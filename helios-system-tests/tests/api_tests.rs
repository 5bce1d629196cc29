//! HTTP surface scenarios: router, client, and error kind tags

use std::sync::Arc;

use helios_client::{ClientError, MasterClient};
use helios_core::descriptors::{Goal, Job, JobId, TaskState};
use helios_master::api;
use helios_master::config::MasterConfig;
use helios_master::model::MasterModel;
use helios_store::StoreClient;
use helios_system_tests::{service_job, TestCluster};

/// Serves the master API for one cluster on an ephemeral port.
async fn serve_api(cluster: &TestCluster) -> MasterClient {
    let model = Arc::new(MasterModel::new(
        StoreClient::new(cluster.store.clone()),
        MasterConfig::default(),
    ));
    let app = api::create_router(model);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    MasterClient::new(format!("http://{addr}"))
}

#[tokio::test]
async fn test_job_crud_over_http() {
    let cluster = TestCluster::new().await;
    let client = serve_api(&cluster).await;

    let job = service_job("web");
    let id = client.create_job(&job).await.unwrap();
    assert_eq!(id, job.id);

    let fetched = client.get_job(&id).await.unwrap();
    assert_eq!(fetched, job);

    let listed = client.list_jobs(Some("web")).await.unwrap();
    assert!(listed.contains_key(&id));

    client.remove_job(&id).await.unwrap();
    let err = client.get_job(&id).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.kind(), Some("JOB_NOT_FOUND"));
}

#[tokio::test]
async fn test_error_kinds_over_http() {
    let mut cluster = TestCluster::new().await;
    cluster.start_agent("h1").await;
    let client = serve_api(&cluster).await;

    let id = client.create_job(&service_job("web")).await.unwrap();

    // Conflict tags.
    client.deploy(&id, "h1", Goal::Start).await.unwrap();
    let err = client.deploy(&id, "h1", Goal::Start).await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(err.kind(), Some("ALREADY_DEPLOYED"));

    let err = client.remove_job(&id).await.unwrap_err();
    assert_eq!(err.kind(), Some("JOB_STILL_DEPLOYED"));

    // Strict host registration.
    let err = client.deploy(&id, "ghost", Goal::Start).await.unwrap_err();
    assert_eq!(err.kind(), Some("HOST_NOT_REGISTERED"));

    let err = client
        .undeploy(&id, "other-host")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Some("DEPLOYMENT_NOT_FOUND"));
}

#[tokio::test]
async fn test_full_control_loop_over_http() {
    let mut cluster = TestCluster::new().await;
    cluster.start_agent("h1").await;
    let client = serve_api(&cluster).await;

    let hosts = client.list_hosts().await.unwrap();
    assert_eq!(hosts, vec!["h1"]);

    let id = client.create_job(&service_job("web")).await.unwrap();
    client.deploy(&id, "h1", Goal::Start).await.unwrap();
    cluster.await_task_state("h1", &id, TaskState::Running).await;

    let status = client.host_status("h1").await.unwrap();
    assert_eq!(
        status.statuses.get(&id).unwrap().state,
        TaskState::Running
    );

    client.set_goal(&id, "h1", Goal::Stop).await.unwrap();
    cluster.await_task_state("h1", &id, TaskState::Stopped).await;

    client.undeploy(&id, "h1").await.unwrap();
    let history = client.job_history(&id).await.unwrap();
    assert!(history.iter().any(|e| e.status.state == TaskState::Running));
}

#[tokio::test]
async fn test_create_job_idempotence_and_forged_hash_over_http() {
    let cluster = TestCluster::new().await;
    let client = serve_api(&cluster).await;

    let job = service_job("web");
    let first = client.create_job(&job).await.unwrap();
    let second = client.create_job(&job).await.unwrap();
    assert_eq!(first, second);

    let mut forged = job.clone();
    forged.id = JobId::new("web", "1").unwrap().with_hash("f".repeat(40));
    let err = client.create_job(&forged).await.unwrap_err();
    match err {
        ClientError::Api { kind, .. } => assert_eq!(kind, "INVALID_JOB"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_get_job_requires_exact_id() {
    let cluster = TestCluster::new().await;
    let client = serve_api(&cluster).await;

    let job = Job::builder()
        .name("web")
        .version("1")
        .image("nginx:1.25")
        .build()
        .unwrap();
    client.create_job(&job).await.unwrap();

    // A short id names no stored node.
    let err = client
        .get_job(&JobId::parse("web:1").unwrap())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}
