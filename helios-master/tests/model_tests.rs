//! Master model behavior against the in-process store

use std::sync::Arc;

use helios_core::descriptors::{Goal, HostState, Job, JobId};
use helios_core::paths;
use helios_master::config::MasterConfig;
use helios_master::model::{MasterError, MasterModel};
use helios_store::{MemoryStore, StoreClient};

struct Fixture {
    store: Arc<MemoryStore>,
    model: MasterModel,
}

async fn fixture() -> Fixture {
    let store = MemoryStore::new();
    let model = MasterModel::new(
        StoreClient::new(store.clone()),
        MasterConfig::default(),
    );
    model.bootstrap().await.unwrap();
    Fixture { store, model }
}

async fn fixture_permissive() -> Fixture {
    let store = MemoryStore::new();
    let model = MasterModel::new(
        StoreClient::new(store.clone()),
        MasterConfig {
            allow_unregistered_hosts: true,
            ..MasterConfig::default()
        },
    );
    model.bootstrap().await.unwrap();
    Fixture { store, model }
}

fn sample_job() -> Job {
    Job::builder()
        .name("web")
        .version("1")
        .image("nginx:1.25")
        .command(["nginx", "-g", "daemon off;"])
        .build()
        .unwrap()
}

/// Simulates an agent having registered by creating its status skeleton.
async fn register_host(f: &Fixture, host: &str) {
    let client = StoreClient::new(f.store.clone());
    client
        .ensure_path(&paths::status_host_jobs(host))
        .await
        .unwrap();
    client
        .ensure_path(&paths::config_host_jobs(host))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_create_job_is_idempotent_for_identical_config() {
    let f = fixture().await;
    let job = sample_job();
    let id = f.model.create_job(job.clone()).await.unwrap();
    let again = f.model.create_job(job).await.unwrap();
    assert_eq!(id, again);
}

#[tokio::test]
async fn test_create_job_rejects_forged_hash() {
    let f = fixture().await;
    let mut job = sample_job();
    job.id = JobId::new("web", "1")
        .unwrap()
        .with_hash("0".repeat(40));
    let err = f.model.create_job(job).await.unwrap_err();
    assert!(matches!(err, MasterError::InvalidJob(_)));
}

#[tokio::test]
async fn test_create_job_accepts_correct_precomputed_hash() {
    let f = fixture().await;
    let job = sample_job();
    let expected = job.id.clone();
    let id = f.model.create_job(job).await.unwrap();
    assert_eq!(id, expected);
}

#[tokio::test]
async fn test_get_job_roundtrip() {
    let f = fixture().await;
    let job = sample_job();
    let id = f.model.create_job(job.clone()).await.unwrap();
    let fetched = f.model.get_job(&id).await.unwrap();
    assert_eq!(fetched, job);
}

#[tokio::test]
async fn test_get_job_not_found() {
    let f = fixture().await;
    let id = JobId::parse("ghost:1:abc").unwrap();
    assert!(matches!(
        f.model.get_job(&id).await.unwrap_err(),
        MasterError::JobNotFound(_)
    ));
}

#[tokio::test]
async fn test_list_jobs_with_pattern() {
    let f = fixture().await;
    f.model.create_job(sample_job()).await.unwrap();
    let other = Job::builder()
        .name("worker")
        .version("2")
        .image("worker:2")
        .build()
        .unwrap();
    f.model.create_job(other).await.unwrap();

    assert_eq!(f.model.list_jobs(None).await.unwrap().len(), 2);
    let filtered = f.model.list_jobs(Some("web")).await.unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered.keys().next().unwrap().name(), "web");
}

#[tokio::test]
async fn test_deploy_requires_registered_host_by_default() {
    let f = fixture().await;
    let id = f.model.create_job(sample_job()).await.unwrap();
    let err = f.model.deploy(&id, "h1", Goal::Start).await.unwrap_err();
    assert!(matches!(err, MasterError::HostNotRegistered(_)));
}

#[tokio::test]
async fn test_deploy_to_unregistered_host_when_permitted() {
    let f = fixture_permissive().await;
    let id = f.model.create_job(sample_job()).await.unwrap();
    f.model.deploy(&id, "future-host", Goal::Start).await.unwrap();
    let status = f.model.host_status("future-host").await.unwrap();
    assert_eq!(status.status, HostState::Down);
    assert!(status.jobs.contains_key(&id));
}

#[tokio::test]
async fn test_deploy_twice_conflicts() {
    let f = fixture().await;
    register_host(&f, "h1").await;
    let id = f.model.create_job(sample_job()).await.unwrap();
    f.model.deploy(&id, "h1", Goal::Start).await.unwrap();
    let err = f.model.deploy(&id, "h1", Goal::Start).await.unwrap_err();
    assert!(matches!(err, MasterError::AlreadyDeployed { .. }));
}

#[tokio::test]
async fn test_deploy_unknown_job() {
    let f = fixture().await;
    register_host(&f, "h1").await;
    let id = JobId::parse(&format!("ghost:1:{}", "a".repeat(40))).unwrap();
    let err = f.model.deploy(&id, "h1", Goal::Start).await.unwrap_err();
    assert!(matches!(err, MasterError::JobNotFound(_)));
}

#[tokio::test]
async fn test_deploy_rejects_short_id_and_undeploy_goal() {
    let f = fixture().await;
    register_host(&f, "h1").await;
    let id = f.model.create_job(sample_job()).await.unwrap();

    let short = JobId::parse("web:1").unwrap();
    assert!(matches!(
        f.model.deploy(&short, "h1", Goal::Start).await.unwrap_err(),
        MasterError::InvalidJob(_)
    ));
    assert!(matches!(
        f.model.deploy(&id, "h1", Goal::Undeploy).await.unwrap_err(),
        MasterError::InvalidJob(_)
    ));
}

#[tokio::test]
async fn test_remove_job_blocked_while_deployed() {
    let f = fixture().await;
    register_host(&f, "h1").await;
    let id = f.model.create_job(sample_job()).await.unwrap();
    f.model.deploy(&id, "h1", Goal::Start).await.unwrap();

    let err = f.model.remove_job(&id).await.unwrap_err();
    assert!(matches!(err, MasterError::JobStillDeployed(_)));

    f.model.undeploy(&id, "h1").await.unwrap();
    f.model.remove_job(&id).await.unwrap();
    assert!(matches!(
        f.model.get_job(&id).await.unwrap_err(),
        MasterError::JobNotFound(_)
    ));
}

#[tokio::test]
async fn test_set_goal_updates_deployment() {
    let f = fixture().await;
    register_host(&f, "h1").await;
    let id = f.model.create_job(sample_job()).await.unwrap();
    f.model.deploy(&id, "h1", Goal::Start).await.unwrap();

    f.model.set_goal(&id, "h1", Goal::Stop).await.unwrap();
    let status = f.model.host_status("h1").await.unwrap();
    assert_eq!(status.jobs.get(&id).unwrap().goal, Goal::Stop);
}

#[tokio::test]
async fn test_set_goal_undeploy_removes_deployment() {
    let f = fixture().await;
    register_host(&f, "h1").await;
    let id = f.model.create_job(sample_job()).await.unwrap();
    f.model.deploy(&id, "h1", Goal::Start).await.unwrap();

    f.model.set_goal(&id, "h1", Goal::Undeploy).await.unwrap();
    let status = f.model.host_status("h1").await.unwrap();
    assert!(status.jobs.is_empty());
    // The job itself is removable now.
    f.model.remove_job(&id).await.unwrap();
}

#[tokio::test]
async fn test_set_goal_on_missing_deployment() {
    let f = fixture().await;
    register_host(&f, "h1").await;
    let id = f.model.create_job(sample_job()).await.unwrap();
    let err = f.model.set_goal(&id, "h1", Goal::Stop).await.unwrap_err();
    assert!(matches!(err, MasterError::DeploymentNotFound { .. }));
}

#[tokio::test]
async fn test_undeploy_missing_deployment() {
    let f = fixture().await;
    register_host(&f, "h1").await;
    let id = f.model.create_job(sample_job()).await.unwrap();
    let err = f.model.undeploy(&id, "h1").await.unwrap_err();
    assert!(matches!(err, MasterError::DeploymentNotFound { .. }));
}

#[tokio::test]
async fn test_host_status_unknown_host() {
    let f = fixture().await;
    assert!(matches!(
        f.model.host_status("nowhere").await.unwrap_err(),
        MasterError::HostNotFound(_)
    ));
}

#[tokio::test]
async fn test_list_hosts() {
    let f = fixture().await;
    register_host(&f, "h2").await;
    register_host(&f, "h1").await;
    assert_eq!(f.model.list_hosts().await.unwrap(), vec!["h1", "h2"]);
}

#[tokio::test]
async fn test_job_history_requires_job() {
    let f = fixture().await;
    let id = JobId::parse("ghost:1:abc").unwrap();
    assert!(matches!(
        f.model.job_history(&id).await.unwrap_err(),
        MasterError::JobNotFound(_)
    ));
    let id = f.model.create_job(sample_job()).await.unwrap();
    assert!(f.model.job_history(&id).await.unwrap().is_empty());
}
