//! Task state machine
//!
//! One runner per deployed job. The runner drives the container runtime
//! toward the deployment goal and publishes every transition:
//!
//! ```text
//! PULLING_IMAGE* -> CREATING -> STARTING -> RUNNING -> EXITED
//!                                                  \-> STOPPING -> STOPPED
//! ```
//!
//! The pull phase only appears when the image is not already local, so a
//! task's history starts with zero or more PULLING_IMAGE events followed
//! by CREATING (no container id yet) and STARTING (container id set).
//!
//! Transient pull failures retry with backoff, each attempt appending a
//! fresh PULLING_IMAGE event. A permanently missing image fails the
//! incarnation with IMAGE_MISSING. Exits feed a restart backoff that
//! reports FLAPPING once runs start dying quickly. After an agent restart
//! or session loss the runner resumes from observed runtime state by
//! adopting the container labeled with its job id.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use helios_core::descriptors::{
    Goal, Job, PortMapping, TaskState, TaskStatus, ThrottleState,
};
use helios_store::StoreClient;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::reporter::StatusReporter;
use crate::runtime::{
    ContainerConfig, ContainerRuntime, PortBinding, RuntimeError, JOB_ID_LABEL, TASK_LABEL,
};

/// Per-runner knobs, copied from the agent configuration at spawn time.
#[derive(Debug, Clone)]
pub struct TaskRunnerConfig {
    pub host: String,
    pub history_retention: usize,
    pub pull_max_attempts: u32,
    pub pull_backoff_base: Duration,
    pub pull_backoff_max: Duration,
    pub restart_backoff_base: Duration,
    pub restart_backoff_max: Duration,
    pub healthy_run_threshold: Duration,
    pub stop_timeout: Duration,
}

/// Why one incarnation of the task ended.
enum RunOutcome {
    Exited,
    Failed,
    GoalChanged,
    Shutdown,
}

enum ImageOutcome {
    Ready,
    Missing,
    PullExhausted,
    Interrupted(RunOutcome),
}

/// Restart backoff with flapping detection.
///
/// The delay doubles while runs keep dying quickly and resets after a
/// healthy run. Two consecutive short-lived runs count as flapping.
struct RestartTracker {
    base: Duration,
    max: Duration,
    healthy: Duration,
    delay: Duration,
    consecutive_fast: u32,
}

impl RestartTracker {
    fn new(base: Duration, max: Duration, healthy: Duration) -> Self {
        Self {
            base,
            max,
            healthy,
            delay: base,
            consecutive_fast: 0,
        }
    }

    fn record_run(&mut self, ran_for: Duration) {
        if ran_for >= self.healthy {
            self.delay = self.base;
            self.consecutive_fast = 0;
        } else {
            self.consecutive_fast += 1;
        }
    }

    fn is_flapping(&self) -> bool {
        self.consecutive_fast >= 2
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.delay;
        self.delay = (self.delay * 2).min(self.max);
        delay
    }
}

/// Runner for one (job, host) task.
pub struct TaskRunner {
    job: Job,
    ports: BTreeMap<String, PortMapping>,
    runtime: Arc<dyn ContainerRuntime>,
    reporter: StatusReporter,
    goal: watch::Receiver<Goal>,
    shutdown: CancellationToken,
    config: TaskRunnerConfig,
    container_id: Option<String>,
    last_state: Option<TaskState>,
    restart: RestartTracker,
}

impl TaskRunner {
    /// Spawns a runner task. Returns the goal channel for the supervisor
    /// and the join handle used to reap the runner.
    pub fn spawn(
        job: Job,
        ports: BTreeMap<String, PortMapping>,
        runtime: Arc<dyn ContainerRuntime>,
        store: StoreClient,
        config: TaskRunnerConfig,
        goal: Goal,
        shutdown: CancellationToken,
    ) -> (watch::Sender<Goal>, JoinHandle<()>) {
        let (goal_tx, goal_rx) = watch::channel(goal);
        let handle = tokio::spawn(async move {
            let reporter = match StatusReporter::open(
                store,
                job.id.clone(),
                config.host.clone(),
                config.history_retention,
            )
            .await
            {
                Ok(reporter) => reporter,
                Err(err) => {
                    error!(job = %job.id, error = %err, "failed to open status reporter");
                    return;
                }
            };
            let restart = RestartTracker::new(
                config.restart_backoff_base,
                config.restart_backoff_max,
                config.healthy_run_threshold,
            );
            let runner = TaskRunner {
                job,
                ports,
                runtime,
                reporter,
                goal: goal_rx,
                shutdown,
                config,
                container_id: None,
                last_state: None,
                restart,
            };
            runner.run().await;
        });
        (goal_tx, handle)
    }

    async fn run(mut self) {
        self.adopt_existing().await;

        loop {
            if self.shutdown.is_cancelled() {
                // Containers are left running on agent shutdown; the next
                // incarnation adopts them by label.
                debug!(job = %self.job.id, "runner shutting down");
                return;
            }
            let goal = *self.goal.borrow();
            match goal {
                Goal::Start => match self.run_task().await {
                    RunOutcome::Exited | RunOutcome::Failed => {
                        let delay = self.restart.next_delay();
                        debug!(
                            job = %self.job.id,
                            delay_ms = delay.as_millis() as u64,
                            "restarting after backoff"
                        );
                        self.sleep_goal_aware(delay).await;
                    }
                    RunOutcome::GoalChanged => {}
                    RunOutcome::Shutdown => return,
                },
                Goal::Stop => {
                    self.ensure_stopped().await;
                    if !self.wait_for_goal_change().await {
                        return;
                    }
                }
                Goal::Undeploy => {
                    self.teardown().await;
                    return;
                }
            }
        }
    }

    /// Picks up a container created by a previous agent incarnation. A
    /// running container is adopted as-is; an exited leftover is removed
    /// so the next incarnation starts clean.
    async fn adopt_existing(&mut self) {
        let label = self.task_label();
        match self.runtime.find_labeled(TASK_LABEL, &label).await {
            Ok(Some(state)) if state.running => {
                info!(job = %self.job.id, container = %state.id, "adopted running container");
                self.container_id = Some(state.id);
                self.publish(TaskState::Running, ThrottleState::No, None).await;
            }
            Ok(Some(state)) => {
                debug!(job = %self.job.id, container = %state.id, "removing stale container");
                if let Err(err) = self.runtime.remove_container(&state.id).await {
                    warn!(job = %self.job.id, error = %err, "failed to remove stale container");
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(job = %self.job.id, error = %err, "failed to look for existing container")
            }
        }
    }

    /// Runs one incarnation: create (pulling the image if needed), start,
    /// then watch until exit, goal change or shutdown.
    async fn run_task(&mut self) -> RunOutcome {
        // Resume from observed state: an adopted container is watched, not
        // recreated.
        if let Some(id) = self.container_id.clone() {
            if let Ok(Some(state)) = self.runtime.inspect_container(&id).await {
                if state.running {
                    return self.watch_container(id).await;
                }
            }
        }

        // A fresh incarnation starts from a clean slate; the previous
        // container, if any, is gone from the runtime's point of view.
        if let Some(old) = self.container_id.take() {
            if let Err(err) = self.runtime.remove_container(&old).await {
                warn!(job = %self.job.id, error = %err, "failed to remove previous container");
            }
        }

        match self.ensure_image().await {
            ImageOutcome::Ready => {}
            ImageOutcome::Missing => {
                error!(job = %self.job.id, image = %self.job.image, "image does not exist");
                self.publish(TaskState::Failed, ThrottleState::ImageMissing, None)
                    .await;
                return RunOutcome::Failed;
            }
            ImageOutcome::PullExhausted => {
                error!(job = %self.job.id, image = %self.job.image, "image pull budget exhausted");
                self.publish(TaskState::Failed, ThrottleState::ImagePullFailed, None)
                    .await;
                return RunOutcome::Failed;
            }
            ImageOutcome::Interrupted(outcome) => return outcome,
        }

        self.publish(TaskState::Creating, ThrottleState::No, None).await;

        let container_config = self.container_config();
        let id = match self.runtime.create_container(&container_config).await {
            Ok(id) => id,
            Err(err) => {
                warn!(job = %self.job.id, error = %err, "failed to create container");
                self.publish(TaskState::Failed, ThrottleState::No, None).await;
                return RunOutcome::Failed;
            }
        };
        self.container_id = Some(id.clone());
        self.publish(TaskState::Starting, ThrottleState::No, None).await;

        if let Err(err) = self.runtime.start_container(&id).await {
            warn!(job = %self.job.id, error = %err, "failed to start container");
            self.publish(TaskState::Failed, ThrottleState::No, None).await;
            return RunOutcome::Failed;
        }
        self.publish(TaskState::Running, ThrottleState::No, None).await;

        self.watch_container(id).await
    }

    /// Waits for the container to exit, the goal to leave START, or
    /// shutdown, and settles the resulting state.
    async fn watch_container(&mut self, id: String) -> RunOutcome {
        let started = Instant::now();
        let runtime = Arc::clone(&self.runtime);
        let wait_id = id.clone();
        let mut goal_rx = self.goal.clone();
        let shutdown = self.shutdown.clone();

        tokio::select! {
            result = async move { runtime.wait_container(&wait_id).await } => match result {
                Ok(code) => {
                    self.restart.record_run(started.elapsed());
                    let throttled = if self.restart.is_flapping() {
                        ThrottleState::Flapping
                    } else {
                        ThrottleState::No
                    };
                    info!(job = %self.job.id, exit_code = code, "container exited");
                    self.publish(TaskState::Exited, throttled, Some(code)).await;
                    RunOutcome::Exited
                }
                Err(err) => {
                    warn!(job = %self.job.id, error = %err, "lost track of container");
                    self.restart.record_run(started.elapsed());
                    self.publish(TaskState::Failed, ThrottleState::No, None).await;
                    RunOutcome::Failed
                }
            },
            goal = goal_left_start(&mut goal_rx) => {
                if goal == Goal::Stop {
                    self.stop_and_publish(&id).await;
                }
                // UNDEPLOY is settled by teardown in the outer loop.
                RunOutcome::GoalChanged
            }
            _ = shutdown.cancelled() => RunOutcome::Shutdown,
        }
    }

    /// Makes the image available locally, retrying transient pull failures
    /// with capped exponential backoff. Every attempt publishes a fresh
    /// PULLING_IMAGE status.
    async fn ensure_image(&mut self) -> ImageOutcome {
        match self.runtime.image_present(&self.job.image).await {
            Ok(true) => return ImageOutcome::Ready,
            Ok(false) => {}
            Err(err) => {
                warn!(job = %self.job.id, error = %err, "failed to check local image, pulling")
            }
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.publish(TaskState::PullingImage, ThrottleState::No, None).await;
            match self.runtime.pull_image(&self.job.image).await {
                Ok(()) => return ImageOutcome::Ready,
                Err(RuntimeError::ImageNotFound(_)) => return ImageOutcome::Missing,
                Err(err) if err.is_transient() && attempt < self.config.pull_max_attempts => {
                    let exp = attempt.saturating_sub(1).min(16);
                    let delay = self
                        .config
                        .pull_backoff_base
                        .saturating_mul(1u32 << exp)
                        .min(self.config.pull_backoff_max);
                    warn!(
                        job = %self.job.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "image pull failed, retrying"
                    );
                    let mut goal_rx = self.goal.clone();
                    let shutdown = self.shutdown.clone();
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = goal_left_start(&mut goal_rx) => {
                            return ImageOutcome::Interrupted(RunOutcome::GoalChanged);
                        }
                        _ = shutdown.cancelled() => {
                            return ImageOutcome::Interrupted(RunOutcome::Shutdown);
                        }
                    }
                }
                Err(err) => {
                    warn!(job = %self.job.id, error = %err, "image pull failed permanently");
                    return ImageOutcome::PullExhausted;
                }
            }
        }
    }

    /// Settles a STOP goal regardless of where the task currently is.
    async fn ensure_stopped(&mut self) {
        if self.last_state == Some(TaskState::Stopped) {
            return;
        }
        if let Some(id) = self.container_id.clone() {
            let running = matches!(
                self.runtime.inspect_container(&id).await,
                Ok(Some(ref state)) if state.running
            );
            if running {
                self.stop_and_publish(&id).await;
                return;
            }
        }
        self.publish(TaskState::Stopped, ThrottleState::No, None).await;
    }

    async fn stop_and_publish(&mut self, id: &str) {
        self.publish(TaskState::Stopping, ThrottleState::No, None).await;
        if let Err(err) = self
            .runtime
            .stop_container(id, self.config.stop_timeout)
            .await
        {
            warn!(job = %self.job.id, error = %err, "failed to stop container");
        }
        self.publish(TaskState::Stopped, ThrottleState::No, None).await;
    }

    /// Garbage-collects the task on UNDEPLOY: stop the container if it is
    /// still running, remove it, and clear the status node. History stays.
    async fn teardown(&mut self) {
        if let Some(id) = self.container_id.clone() {
            let running = matches!(
                self.runtime.inspect_container(&id).await,
                Ok(Some(ref state)) if state.running
            );
            if running {
                self.publish(TaskState::Stopping, ThrottleState::No, None).await;
                if let Err(err) = self
                    .runtime
                    .stop_container(&id, self.config.stop_timeout)
                    .await
                {
                    warn!(job = %self.job.id, error = %err, "failed to stop container");
                }
            }
            if let Err(err) = self.runtime.remove_container(&id).await {
                warn!(job = %self.job.id, error = %err, "failed to remove container");
            }
        }
        self.reporter.clear().await;
        info!(job = %self.job.id, "task garbage-collected");
    }

    /// Sleeps through a restart delay but wakes early on goal change or
    /// shutdown.
    async fn sleep_goal_aware(&mut self, delay: Duration) {
        let mut goal_rx = self.goal.clone();
        let shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = goal_left_start(&mut goal_rx) => {}
            _ = shutdown.cancelled() => {}
        }
    }

    /// Blocks until the goal changes or shutdown. Returns false when the
    /// runner should exit.
    async fn wait_for_goal_change(&mut self) -> bool {
        let mut goal_rx = self.goal.clone();
        let shutdown = self.shutdown.clone();
        tokio::select! {
            changed = goal_rx.changed() => changed.is_ok(),
            _ = shutdown.cancelled() => false,
        }
    }

    async fn publish(&mut self, state: TaskState, throttled: ThrottleState, exit_code: Option<i64>) {
        let status = TaskStatus {
            state,
            container_id: self.container_id.clone(),
            throttled,
            ports: self.ports.clone(),
            env: self.job.env.clone(),
            exit_code,
            job: self.job.clone(),
        };
        self.reporter.publish(status).await;
        self.last_state = Some(state);
    }

    fn task_label(&self) -> String {
        format!("{}:{}", self.config.host, self.job.id)
    }

    fn container_config(&self) -> ContainerConfig {
        let mut labels = BTreeMap::new();
        labels.insert(JOB_ID_LABEL.to_string(), self.job.id.to_string());
        labels.insert(TASK_LABEL.to_string(), self.task_label());
        let port_bindings = self
            .ports
            .values()
            .filter_map(|mapping| {
                mapping.external_port.map(|external| PortBinding {
                    internal: mapping.internal_port,
                    external,
                    protocol: mapping.protocol,
                })
            })
            .collect();
        ContainerConfig {
            name: container_name(&self.job),
            image: self.job.image.clone(),
            command: self.job.command.clone(),
            env: self.job.env.clone(),
            port_bindings,
            labels,
        }
    }
}

/// Resolves once the goal is anything other than START. Treats a closed
/// channel as STOP so an orphaned runner winds down.
async fn goal_left_start(rx: &mut watch::Receiver<Goal>) -> Goal {
    loop {
        let current = *rx.borrow_and_update();
        if current != Goal::Start {
            return current;
        }
        if rx.changed().await.is_err() {
            return Goal::Stop;
        }
    }
}

fn container_name(job: &Job) -> String {
    let sanitize = |s: &str| {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect::<String>()
    };
    format!(
        "helios-{}-{}-{}",
        sanitize(job.name()),
        sanitize(job.version()),
        Uuid::new_v4().simple()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_tracker_backoff_and_reset() {
        let mut tracker = RestartTracker::new(
            Duration::from_secs(1),
            Duration::from_secs(8),
            Duration::from_secs(60),
        );
        assert_eq!(tracker.next_delay(), Duration::from_secs(1));
        assert_eq!(tracker.next_delay(), Duration::from_secs(2));
        assert_eq!(tracker.next_delay(), Duration::from_secs(4));
        assert_eq!(tracker.next_delay(), Duration::from_secs(8));
        assert_eq!(tracker.next_delay(), Duration::from_secs(8));

        tracker.record_run(Duration::from_secs(120));
        assert_eq!(tracker.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_flapping_needs_two_fast_runs() {
        let mut tracker = RestartTracker::new(
            Duration::from_secs(1),
            Duration::from_secs(8),
            Duration::from_secs(60),
        );
        tracker.record_run(Duration::from_secs(1));
        assert!(!tracker.is_flapping());
        tracker.record_run(Duration::from_secs(2));
        assert!(tracker.is_flapping());
        tracker.record_run(Duration::from_secs(90));
        assert!(!tracker.is_flapping());
    }

    #[test]
    fn test_container_name_is_sanitized() {
        let job = Job::builder()
            .name("my.web")
            .version("1-rc")
            .image("img")
            .build()
            .unwrap();
        let name = container_name(&job);
        assert!(name.starts_with("helios-my_web-1_rc-"));
        assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
