//! Configuration type definitions.
//!
//! These types mirror the YAML task file and convert into the core
//! container model. A task file names the task and lists its containers;
//! dependency names are validated later, when the graph is built.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::container::{Container, HealthCheck, ImageSource, RunAsUser, VolumeMount};

use super::error::ConfigError;

/// A task definition loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Task name, for display only.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// The containers making up the task.
    pub containers: Vec<ContainerConfig>,
}

impl TaskConfig {
    /// Parse a task definition from a YAML string.
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Convert into core container definitions, validating per-container
    /// constraints that the schema alone can't express.
    pub fn to_containers(&self) -> Result<Vec<Container>, ConfigError> {
        self.containers.iter().map(|c| c.to_container()).collect()
    }
}

/// One container in a task file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Container name, unique within the task.
    pub name: String,
    /// Existing image reference. Exactly one of `image` and
    /// `build_directory` must be set.
    pub image: Option<String>,
    /// Directory to build the image from.
    pub build_directory: Option<PathBuf>,
    /// Names of containers this one depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Command override.
    pub command: Option<String>,
    /// Arguments for the command override.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables.
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// Volume mounts.
    #[serde(default)]
    pub volumes: Vec<VolumeMountConfig>,
    /// Health check settings; present means the container must report
    /// healthy before its dependents are created.
    pub health_check: Option<HealthCheckConfig>,
    /// Run as the invoking host user instead of the image's default user.
    pub run_as_current_user: Option<RunAsCurrentUserConfig>,
}

impl ContainerConfig {
    fn to_container(&self) -> Result<Container, ConfigError> {
        let image = match (&self.image, &self.build_directory) {
            (Some(image), None) => ImageSource::Image(image.clone()),
            (None, Some(directory)) => ImageSource::Build(directory.clone()),
            (Some(_), Some(_)) => {
                return Err(ConfigError::InvalidConfig(format!(
                    "container '{}' has both 'image' and 'build_directory'",
                    self.name
                )));
            }
            (None, None) => {
                return Err(ConfigError::InvalidConfig(format!(
                    "container '{}' has neither 'image' nor 'build_directory'",
                    self.name
                )));
            }
        };

        let mut container = Container::new(self.name.as_str(), image)
            .with_dependencies(self.dependencies.iter().map(String::as_str))
            .with_environment(self.environment.clone())
            .with_volume_mounts(self.volumes.iter().map(VolumeMountConfig::to_mount).collect());

        if let Some(command) = &self.command {
            container = container.with_command(command, self.args.clone());
        }

        if let Some(health_check) = &self.health_check {
            container = container.with_health_check(health_check.to_health_check());
        }

        if let Some(run_as) = &self.run_as_current_user {
            container = container.with_run_as(RunAsUser::CurrentUser {
                home_directory: run_as.home_directory.clone(),
            });
        }

        Ok(container)
    }
}

/// A volume mount in a task file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeMountConfig {
    /// Path on the host.
    pub local: PathBuf,
    /// Path inside the container.
    pub container: String,
    /// Mount options (e.g. `ro`).
    pub options: Option<String>,
}

impl VolumeMountConfig {
    fn to_mount(&self) -> VolumeMount {
        VolumeMount {
            local_path: self.local.clone(),
            container_path: self.container.clone(),
            options: self.options.clone(),
        }
    }
}

/// Health check settings in a task file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Seconds between health check polls.
    pub interval_seconds: u64,
    /// Failed polls before the container counts as unhealthy.
    pub retries: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        let defaults = HealthCheck::default();
        Self {
            interval_seconds: defaults.interval.as_secs(),
            retries: defaults.retries,
        }
    }
}

impl HealthCheckConfig {
    fn to_health_check(&self) -> HealthCheck {
        HealthCheck {
            interval: Duration::from_secs(self.interval_seconds),
            retries: self.retries,
        }
    }
}

/// Run-as-current-user settings in a task file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunAsCurrentUserConfig {
    /// Home directory path inside the container.
    pub home_directory: String,
}
