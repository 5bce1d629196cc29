//! Docker CLI runtime driver
//!
//! Drives the local Docker daemon through the `docker` binary. Every call
//! shells out, captures stdout/stderr, and classifies failures into the
//! runtime error taxonomy by exit status and stderr contents.

use std::time::Duration;

use async_trait::async_trait;
use helios_core::descriptors::RuntimeInfo;
use tokio::process::Command;
use tracing::{debug, error};

use super::{ContainerConfig, ContainerRuntime, ContainerState, Result, RuntimeError};

/// Stderr fragments that identify a permanently missing image.
const IMAGE_MISSING_MARKERS: &[&str] = &[
    "not found",
    "manifest unknown",
    "repository does not exist",
    "pull access denied",
];

/// Bound on ordinary daemon calls. A hung daemon reads as transient.
const OP_TIMEOUT: Duration = Duration::from_secs(60);

/// Registry pulls of large images take a while.
const PULL_TIMEOUT: Duration = Duration::from_secs(600);

/// Container runtime backed by the `docker` command line client.
pub struct DockerCli {
    /// Daemon endpoint passed as `docker -H`, or `None` for the default.
    endpoint: Option<String>,
}

impl DockerCli {
    pub fn new(endpoint: Option<String>) -> Self {
        Self { endpoint }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("docker");
        // A cancelled call (goal change racing a long `docker wait`) must
        // not leave the CLI process behind.
        cmd.kill_on_drop(true);
        if let Some(endpoint) = &self.endpoint {
            cmd.arg("-H").arg(endpoint);
        }
        cmd
    }

    /// Runs a docker command, returning trimmed stdout on success.
    async fn run(&self, args: &[&str]) -> Result<String> {
        self.run_with_timeout(args, Some(OP_TIMEOUT)).await
    }

    /// Like `run` with an explicit bound; `None` only for `docker wait`,
    /// which legitimately blocks for the life of the container.
    async fn run_with_timeout(&self, args: &[&str], timeout: Option<Duration>) -> Result<String> {
        let mut cmd = self.command();
        cmd.args(args);
        debug!(?args, "running docker command");

        let output = cmd.output();
        let output = match timeout {
            Some(bound) => tokio::time::timeout(bound, output).await.map_err(|_| {
                RuntimeError::Transient(format!(
                    "docker {} timed out after {}s",
                    args.first().unwrap_or(&""),
                    bound.as_secs()
                ))
            })?,
            None => output.await,
        }
        .map_err(|e| RuntimeError::Transient(format!("failed to execute docker: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if output.status.success() {
            Ok(stdout)
        } else {
            debug!(
                exit_code = output.status.code().unwrap_or(-1),
                stderr = %stderr, "docker command failed"
            );
            Err(classify_failure(args, &stderr))
        }
    }
}

fn classify_failure(args: &[&str], stderr: &str) -> RuntimeError {
    let lowered = stderr.to_lowercase();
    if lowered.contains("no such container") || lowered.contains("no such object") {
        return RuntimeError::ContainerNotFound(stderr.to_string());
    }
    if args.first() == Some(&"pull")
        && IMAGE_MISSING_MARKERS.iter().any(|m| lowered.contains(m))
    {
        return RuntimeError::ImageNotFound(stderr.to_string());
    }
    if lowered.contains("cannot connect to the docker daemon")
        || lowered.contains("i/o timeout")
        || lowered.contains("connection refused")
        || lowered.contains("tls handshake timeout")
    {
        return RuntimeError::Transient(stderr.to_string());
    }
    // Registry pulls fail transiently far more often than permanently;
    // anything unclassified on a pull stays retryable.
    if args.first() == Some(&"pull") {
        return RuntimeError::Transient(stderr.to_string());
    }
    RuntimeError::Other(stderr.to_string())
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn info(&self) -> Result<RuntimeInfo> {
        let version = self
            .run(&["version", "--format", "{{.Server.Version}}"])
            .await?;
        Ok(RuntimeInfo {
            name: "docker".to_string(),
            version,
        })
    }

    async fn image_present(&self, image: &str) -> Result<bool> {
        match self.run(&["image", "inspect", "--format", "{{.Id}}", image]).await {
            Ok(_) => Ok(true),
            // `image inspect` reports a locally absent image as a missing
            // object.
            Err(RuntimeError::ContainerNotFound(_)) => Ok(false),
            Err(RuntimeError::Other(msg)) if msg.to_lowercase().contains("no such image") => {
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        self.run_with_timeout(&["pull", image], Some(PULL_TIMEOUT)).await?;
        Ok(())
    }

    async fn create_container(&self, config: &ContainerConfig) -> Result<String> {
        let mut args: Vec<String> = vec![
            "create".to_string(),
            "--name".to_string(),
            config.name.clone(),
        ];
        for (key, value) in &config.labels {
            args.push("--label".to_string());
            args.push(format!("{key}={value}"));
        }
        for (key, value) in &config.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        for binding in &config.port_bindings {
            args.push("-p".to_string());
            args.push(format!(
                "{}:{}/{}",
                binding.external, binding.internal, binding.protocol
            ));
        }
        args.push(config.image.clone());
        args.extend(config.command.iter().cloned());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let id = self.run(&arg_refs).await?;
        if id.is_empty() {
            error!(name = %config.name, "docker create returned no container id");
            return Err(RuntimeError::Other(
                "docker create returned no container id".to_string(),
            ));
        }
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.run(&["start", id]).await?;
        Ok(())
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<()> {
        let secs = timeout.as_secs().max(1).to_string();
        match self.run(&["stop", "-t", &secs, id]).await {
            Ok(_) => Ok(()),
            Err(RuntimeError::ContainerNotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        match self.run(&["rm", "-f", id]).await {
            Ok(_) => Ok(()),
            Err(RuntimeError::ContainerNotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn wait_container(&self, id: &str) -> Result<i64> {
        let output = self.run_with_timeout(&["wait", id], None).await?;
        output
            .parse::<i64>()
            .map_err(|_| RuntimeError::Other(format!("unparseable exit code: {output}")))
    }

    async fn inspect_container(&self, id: &str) -> Result<Option<ContainerState>> {
        let result = self
            .run(&[
                "inspect",
                "--format",
                "{{.Id}} {{.State.Running}} {{.State.ExitCode}}",
                id,
            ])
            .await;
        match result {
            Ok(line) => Ok(parse_inspect_line(&line)),
            Err(RuntimeError::ContainerNotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn find_labeled(&self, key: &str, value: &str) -> Result<Option<ContainerState>> {
        let filter = format!("label={key}={value}");
        let ids = self
            .run(&["ps", "-a", "--filter", &filter, "--format", "{{.ID}}"])
            .await?;
        match ids.lines().next() {
            Some(id) => self.inspect_container(id.trim()).await,
            None => Ok(None),
        }
    }
}

fn parse_inspect_line(line: &str) -> Option<ContainerState> {
    let mut parts = line.split_whitespace();
    let id = parts.next()?.to_string();
    let running = parts.next()? == "true";
    let exit_code = parts.next()?.parse::<i64>().ok();
    Some(ContainerState {
        id,
        running,
        exit_code: if running { None } else { exit_code },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inspect_line() {
        let state = parse_inspect_line("abc123 true 0").unwrap();
        assert_eq!(state.id, "abc123");
        assert!(state.running);
        assert_eq!(state.exit_code, None);

        let state = parse_inspect_line("abc123 false 137").unwrap();
        assert!(!state.running);
        assert_eq!(state.exit_code, Some(137));

        assert!(parse_inspect_line("").is_none());
    }

    #[test]
    fn test_classify_pull_failures() {
        let err = classify_failure(&["pull"], "manifest unknown: manifest unknown");
        assert!(matches!(err, RuntimeError::ImageNotFound(_)));

        let err = classify_failure(&["pull"], "dial tcp: i/o timeout");
        assert!(err.is_transient());

        let err = classify_failure(&["pull"], "unexpected registry error");
        assert!(err.is_transient());
    }

    #[test]
    fn test_classify_daemon_down_is_transient() {
        let err = classify_failure(
            &["start", "x"],
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock",
        );
        assert!(err.is_transient());
    }

    #[test]
    fn test_classify_missing_container() {
        let err = classify_failure(&["inspect", "x"], "Error: No such container: x");
        assert!(matches!(err, RuntimeError::ContainerNotFound(_)));
    }
}
