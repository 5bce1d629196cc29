//! Scripted in-memory container runtime
//!
//! Test double for [`ContainerRuntime`]. Images, pull outcomes and
//! container exits are controlled by the test; everything else behaves
//! like a well-behaved daemon. Used by the unit and system test suites.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use helios_core::descriptors::RuntimeInfo;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{ContainerConfig, ContainerRuntime, ContainerState, Result, RuntimeError};

#[derive(Debug, Clone)]
struct FakeContainer {
    config: ContainerConfig,
    running: bool,
    exit_code: Option<i64>,
}

#[derive(Default)]
struct Inner {
    images: HashSet<String>,
    /// Images that do not exist in any registry.
    missing_images: HashSet<String>,
    /// Transient failures to serve before pulls start succeeding.
    pull_failures: VecDeque<String>,
    pull_attempts: u64,
    containers: HashMap<String, FakeContainer>,
    next_id: u64,
    /// Exit code applied as soon as a container starts.
    auto_exit: Option<i64>,
}

/// In-memory runtime with scripted behavior.
pub struct FakeRuntime {
    inner: Mutex<Inner>,
    exited: Notify,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            exited: Notify::new(),
        })
    }

    /// Marks an image as already present locally, skipping the pull.
    pub fn add_local_image(&self, image: &str) {
        self.inner.lock().images.insert(image.to_string());
    }

    /// Makes pulls of this image fail permanently.
    pub fn set_missing_image(&self, image: &str) {
        self.inner.lock().missing_images.insert(image.to_string());
    }

    /// Queues `n` transient pull failures before pulls succeed again.
    pub fn fail_next_pulls(&self, n: usize) {
        let mut inner = self.inner.lock();
        for _ in 0..n {
            inner.pull_failures.push_back("registry timeout".to_string());
        }
    }

    /// Containers exit with this code immediately after starting.
    pub fn set_auto_exit(&self, code: i64) {
        self.inner.lock().auto_exit = Some(code);
    }

    /// Terminates a running container with the given exit code.
    pub fn finish_container(&self, id: &str, code: i64) {
        {
            let mut inner = self.inner.lock();
            if let Some(container) = inner.containers.get_mut(id) {
                container.running = false;
                container.exit_code = Some(code);
            }
        }
        self.exited.notify_waiters();
    }

    pub fn pull_attempts(&self) -> u64 {
        self.inner.lock().pull_attempts
    }

    pub fn running_containers(&self) -> Vec<String> {
        self.inner
            .lock()
            .containers
            .iter()
            .filter(|(_, c)| c.running)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn container_count(&self) -> usize {
        self.inner.lock().containers.len()
    }

    /// External port bindings of a container, keyed by internal port.
    pub fn port_bindings(&self, id: &str) -> Option<BTreeMap<u16, u16>> {
        self.inner.lock().containers.get(id).map(|c| {
            c.config
                .port_bindings
                .iter()
                .map(|b| (b.internal, b.external))
                .collect()
        })
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn info(&self) -> Result<RuntimeInfo> {
        Ok(RuntimeInfo {
            name: "fake".to_string(),
            version: "0".to_string(),
        })
    }

    async fn image_present(&self, image: &str) -> Result<bool> {
        Ok(self.inner.lock().images.contains(image))
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.pull_attempts += 1;
        if inner.missing_images.contains(image) {
            return Err(RuntimeError::ImageNotFound(image.to_string()));
        }
        if let Some(reason) = inner.pull_failures.pop_front() {
            return Err(RuntimeError::Transient(reason));
        }
        inner.images.insert(image.to_string());
        Ok(())
    }

    async fn create_container(&self, config: &ContainerConfig) -> Result<String> {
        let mut inner = self.inner.lock();
        if !inner.images.contains(&config.image) {
            return Err(RuntimeError::Other(format!(
                "image not present locally: {}",
                config.image
            )));
        }
        inner.next_id += 1;
        let id = format!("fake-{:08x}", inner.next_id);
        inner.containers.insert(
            id.clone(),
            FakeContainer {
                config: config.clone(),
                running: false,
                exit_code: None,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        let auto_exit = {
            let mut inner = self.inner.lock();
            let auto_exit = inner.auto_exit;
            let container = inner
                .containers
                .get_mut(id)
                .ok_or_else(|| RuntimeError::ContainerNotFound(id.to_string()))?;
            match auto_exit {
                Some(code) => {
                    container.running = false;
                    container.exit_code = Some(code);
                }
                None => container.running = true,
            }
            auto_exit
        };
        if auto_exit.is_some() {
            self.exited.notify_waiters();
        }
        Ok(())
    }

    async fn stop_container(&self, id: &str, _timeout: Duration) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if let Some(container) = inner.containers.get_mut(id) {
                if container.running {
                    container.running = false;
                    container.exit_code = Some(137);
                }
            }
        }
        self.exited.notify_waiters();
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.inner.lock().containers.remove(id);
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<i64> {
        loop {
            // Arm the notification before checking state so an exit racing
            // with the check is not missed.
            let notified = self.exited.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let inner = self.inner.lock();
                match inner.containers.get(id) {
                    Some(container) => {
                        if let Some(code) = container.exit_code {
                            return Ok(code);
                        }
                    }
                    None => return Err(RuntimeError::ContainerNotFound(id.to_string())),
                }
            }
            notified.await;
        }
    }

    async fn inspect_container(&self, id: &str) -> Result<Option<ContainerState>> {
        Ok(self.inner.lock().containers.get(id).map(|c| ContainerState {
            id: id.to_string(),
            running: c.running,
            exit_code: c.exit_code,
        }))
    }

    async fn find_labeled(&self, key: &str, value: &str) -> Result<Option<ContainerState>> {
        let inner = self.inner.lock();
        let mut found: Option<ContainerState> = None;
        for (id, container) in &inner.containers {
            if container.config.labels.get(key).map(String::as_str) == Some(value) {
                let state = ContainerState {
                    id: id.clone(),
                    running: container.running,
                    exit_code: container.exit_code,
                };
                // Prefer a running container over an exited leftover.
                if state.running {
                    return Ok(Some(state));
                }
                found.get_or_insert(state);
            }
        }
        Ok(found)
    }
}
