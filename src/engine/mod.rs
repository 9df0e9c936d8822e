//! Container engine abstraction.
//!
//! The orchestration core drives containers through this trait and never
//! talks to an engine directly; every call is assumed to be network-latency
//! bound and allowed to fail. The step executor turns each failure into the
//! corresponding failure event rather than propagating it.

pub mod cli;

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

use crate::core::container::{Container, HealthCheck, VolumeMount};
use crate::core::types::{ContainerHandle, ContainerName, ImageReference};

/// Errors from container engine operations. Each variant corresponds to a
/// failure event posted by the step executor.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("image build failed: {0}")]
    BuildFailed(String),

    #[error("container creation failed: {0}")]
    CreateFailed(String),

    #[error("container start failed: {0}")]
    StartFailed(String),

    #[error("health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("waiting for container exit failed: {0}")]
    WaitFailed(String),

    #[error("container stop failed: {0}")]
    StopFailed(String),

    #[error("container removal failed: {0}")]
    RemoveFailed(String),
}

/// Host user and group identity a container should run as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserAndGroup {
    pub uid: u32,
    pub gid: u32,
}

/// Everything the engine needs to create one container.
///
/// Assembled by the step executor from the container definition plus the
/// extra mounts and identity contributed by the run-as-current-user
/// provider.
#[derive(Debug, Clone)]
pub struct ContainerCreationSpec {
    pub name: ContainerName,
    pub image: ImageReference,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub environment: HashMap<String, String>,
    pub volume_mounts: Vec<VolumeMount>,
    pub health_check: Option<HealthCheck>,
    pub user: Option<UserAndGroup>,
}

impl ContainerCreationSpec {
    /// Build a spec from a container definition and an image reference,
    /// with no extra mounts or identity.
    pub fn for_container(container: &Container, image: ImageReference) -> Self {
        Self {
            name: container.name().clone(),
            image,
            command: container.command().map(str::to_string),
            args: container.args().to_vec(),
            environment: container.environment().clone(),
            volume_mounts: container.volume_mounts().to_vec(),
            health_check: container.health_check().cloned(),
            user: None,
        }
    }
}

/// Client for a container engine.
///
/// Implementations must be safe to call concurrently; independent steps for
/// unrelated containers run in parallel.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Build the image for a container defined by a build directory.
    async fn build_image(&self, container: &Container) -> Result<ImageReference, EngineError>;

    /// Create a container, returning the engine's handle for it.
    async fn create_container(
        &self,
        spec: &ContainerCreationSpec,
    ) -> Result<ContainerHandle, EngineError>;

    /// Start a created container.
    async fn start_container(&self, handle: &ContainerHandle) -> Result<(), EngineError>;

    /// Wait until a started container's health check reports healthy.
    async fn wait_for_healthy(&self, handle: &ContainerHandle) -> Result<(), EngineError>;

    /// Wait until a started container exits, returning its exit code.
    async fn wait_for_exit(&self, handle: &ContainerHandle) -> Result<i64, EngineError>;

    /// Stop a running container.
    async fn stop_container(&self, handle: &ContainerHandle) -> Result<(), EngineError>;

    /// Remove a container.
    async fn remove_container(&self, handle: &ContainerHandle) -> Result<(), EngineError>;
}
