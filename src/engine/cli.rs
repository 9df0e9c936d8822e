//! Container engine client driving the `docker` CLI.
//!
//! Shells out to the docker binary rather than speaking the engine API
//! directly. Each operation runs one subprocess and maps a non-zero exit to
//! the corresponding [`EngineError`] variant with the captured stderr.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

use crate::core::container::{Container, HealthCheck, ImageSource};
use crate::core::types::{ContainerHandle, ImageReference};

use super::{ContainerCreationSpec, ContainerEngine, EngineError};

/// Engine client that invokes the `docker` command-line binary.
pub struct CliEngine {
    binary: String,
    /// Health check settings recorded at create time, keyed by handle, so
    /// `wait_for_healthy` knows how to poll.
    health_checks: Mutex<HashMap<ContainerHandle, HealthCheck>>,
}

impl CliEngine {
    /// Create a client using the `docker` binary from PATH.
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Create a client using a specific binary (e.g. `podman`).
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            health_checks: Mutex::new(HashMap::new()),
        }
    }

    /// Run the engine binary with the given arguments, returning trimmed
    /// stdout on success and the combined error output on failure.
    async fn run(&self, args: &[String]) -> Result<String, String> {
        debug!(binary = %self.binary, args = ?args, "invoking container engine");

        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| format!("failed to execute '{}': {}", self.binary, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if output.status.success() {
            Ok(stdout)
        } else {
            let message = if stderr.is_empty() { stdout } else { stderr };
            Err(format!(
                "'{} {}' exited with {}: {}",
                self.binary,
                args.first().map(String::as_str).unwrap_or(""),
                output.status.code().unwrap_or(-1),
                message
            ))
        }
    }
}

impl Default for CliEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate a unique engine-side name for a container instance, so repeated
/// runs of the same task never collide.
fn instance_name(spec: &ContainerCreationSpec) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("caravan-{}-{}", spec.name, &suffix[..8])
}

/// Assemble the argument list for `docker create`.
fn creation_args(spec: &ContainerCreationSpec, instance: &str) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "--name".to_string(),
        instance.to_string(),
    ];

    if let Some(user) = &spec.user {
        args.push("--user".to_string());
        args.push(format!("{}:{}", user.uid, user.gid));
    }

    if let Some(health) = &spec.health_check {
        args.push("--health-interval".to_string());
        args.push(format!("{}s", health.interval.as_secs().max(1)));
        args.push("--health-retries".to_string());
        args.push(health.retries.to_string());
    }

    for (key, value) in &spec.environment {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }

    for mount in &spec.volume_mounts {
        args.push("-v".to_string());
        let mut mapping = format!(
            "{}:{}",
            mount.local_path.display(),
            mount.container_path
        );
        if let Some(options) = &mount.options {
            mapping.push(':');
            mapping.push_str(options);
        }
        args.push(mapping);
    }

    args.push(spec.image.as_str().to_string());

    if let Some(command) = &spec.command {
        args.push(command.clone());
        args.extend(spec.args.iter().cloned());
    }

    args
}

/// Health state as reported by `docker inspect`.
#[derive(Debug, Deserialize)]
struct HealthState {
    #[serde(rename = "Status")]
    status: String,
}

#[async_trait]
impl ContainerEngine for CliEngine {
    async fn build_image(&self, container: &Container) -> Result<ImageReference, EngineError> {
        let directory = match container.image() {
            ImageSource::Build(directory) => directory,
            ImageSource::Image(reference) => {
                // Nothing to build; callers normally don't get here.
                return Ok(ImageReference::new(reference));
            }
        };

        let args = vec![
            "build".to_string(),
            "-q".to_string(),
            directory.display().to_string(),
        ];

        let stdout = self.run(&args).await.map_err(EngineError::BuildFailed)?;
        Ok(ImageReference::new(stdout))
    }

    async fn create_container(
        &self,
        spec: &ContainerCreationSpec,
    ) -> Result<ContainerHandle, EngineError> {
        let instance = instance_name(spec);
        let args = creation_args(spec, &instance);

        let stdout = self.run(&args).await.map_err(EngineError::CreateFailed)?;
        let handle = ContainerHandle::new(stdout);

        if let Some(health) = &spec.health_check {
            self.health_checks
                .lock()
                .expect("health check map lock poisoned")
                .insert(handle.clone(), health.clone());
        }

        Ok(handle)
    }

    async fn start_container(&self, handle: &ContainerHandle) -> Result<(), EngineError> {
        let args = vec!["start".to_string(), handle.as_str().to_string()];
        self.run(&args).await.map_err(EngineError::StartFailed)?;
        Ok(())
    }

    async fn wait_for_healthy(&self, handle: &ContainerHandle) -> Result<(), EngineError> {
        let health = self
            .health_checks
            .lock()
            .expect("health check map lock poisoned")
            .get(handle)
            .cloned()
            .unwrap_or_default();

        let args = vec![
            "inspect".to_string(),
            "--format".to_string(),
            "{{json .State.Health}}".to_string(),
            handle.as_str().to_string(),
        ];

        for _ in 0..health.retries.max(1) {
            let stdout = self
                .run(&args)
                .await
                .map_err(EngineError::HealthCheckFailed)?;

            let state: Option<HealthState> = serde_json::from_str(&stdout)
                .map_err(|e| EngineError::HealthCheckFailed(e.to_string()))?;

            match state {
                None => {
                    return Err(EngineError::HealthCheckFailed(
                        "the image does not define a health check".to_string(),
                    ));
                }
                Some(state) if state.status == "healthy" => return Ok(()),
                Some(state) if state.status == "unhealthy" => {
                    return Err(EngineError::HealthCheckFailed(
                        "the container reported unhealthy".to_string(),
                    ));
                }
                Some(_) => {}
            }

            tokio::time::sleep(health.interval).await;
        }

        Err(EngineError::HealthCheckFailed(format!(
            "the container did not become healthy within {} checks",
            health.retries
        )))
    }

    async fn wait_for_exit(&self, handle: &ContainerHandle) -> Result<i64, EngineError> {
        let args = vec!["wait".to_string(), handle.as_str().to_string()];
        let stdout = self.run(&args).await.map_err(EngineError::WaitFailed)?;

        stdout
            .parse::<i64>()
            .map_err(|_| EngineError::WaitFailed(format!("unexpected wait output '{}'", stdout)))
    }

    async fn stop_container(&self, handle: &ContainerHandle) -> Result<(), EngineError> {
        let args = vec!["stop".to_string(), handle.as_str().to_string()];
        self.run(&args).await.map_err(EngineError::StopFailed)?;
        Ok(())
    }

    async fn remove_container(&self, handle: &ContainerHandle) -> Result<(), EngineError> {
        let args = vec!["rm".to_string(), handle.as_str().to_string()];
        self.run(&args).await.map_err(EngineError::RemoveFailed)?;
        Ok(())
    }
}
