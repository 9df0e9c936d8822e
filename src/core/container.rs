//! Container definitions.
//!
//! A [`Container`] describes one containerized process in a task: its image,
//! the containers it depends on, and how it should be run. Definitions are
//! immutable once the task starts; everything that happens to a container at
//! runtime is recorded as events, never as mutable state on the definition.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use super::types::ContainerName;

/// Where a container's image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Use an existing image by reference (e.g. `postgres:16`).
    Image(String),
    /// Build an image from the given directory before creating the container.
    Build(PathBuf),
}

/// A volume mount attaching a host path to a container path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumeMount {
    /// Path on the host.
    pub local_path: PathBuf,
    /// Path inside the container.
    pub container_path: String,
    /// Mount options (e.g. `ro`, `delegated`).
    pub options: Option<String>,
}

impl VolumeMount {
    /// Create a mount without options.
    pub fn new(local_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            container_path: container_path.into(),
            options: None,
        }
    }

    /// Create a mount with options.
    pub fn with_options(
        local_path: impl Into<PathBuf>,
        container_path: impl Into<String>,
        options: impl Into<String>,
    ) -> Self {
        Self {
            local_path: local_path.into(),
            container_path: container_path.into(),
            options: Some(options.into()),
        }
    }
}

/// Health check settings for a container.
///
/// The health check command itself comes from the image; these settings
/// control how the engine polls it. A container with a health check only
/// satisfies its dependents once it reports healthy; a container without
/// one satisfies them as soon as it has started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    /// Time between health check polls.
    pub interval: Duration,
    /// Number of failed polls before the container is considered unhealthy.
    pub retries: u32,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            retries: 30,
        }
    }
}

/// How the container's process user is determined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunAsUser {
    /// Run as whatever user the image defines (the default).
    DefaultContainerUser,
    /// Run as the invoking host user, with passwd/group files and a home
    /// directory generated on the fly and mounted into the container.
    CurrentUser {
        /// Home directory path inside the container.
        home_directory: String,
    },
}

/// Definition of one container in a task.
#[derive(Debug, Clone)]
pub struct Container {
    name: ContainerName,
    image: ImageSource,
    dependencies: HashSet<ContainerName>,
    command: Option<String>,
    args: Vec<String>,
    environment: HashMap<String, String>,
    volume_mounts: Vec<VolumeMount>,
    health_check: Option<HealthCheck>,
    run_as: RunAsUser,
}

impl Container {
    /// Create a container definition with no dependencies and defaults for
    /// everything else.
    pub fn new(name: impl Into<ContainerName>, image: ImageSource) -> Self {
        Self {
            name: name.into(),
            image,
            dependencies: HashSet::new(),
            command: None,
            args: Vec::new(),
            environment: HashMap::new(),
            volume_mounts: Vec::new(),
            health_check: None,
            run_as: RunAsUser::DefaultContainerUser,
        }
    }

    /// Declare the containers this one depends on.
    pub fn with_dependencies<I, N>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<ContainerName>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    /// Set the command to run, overriding the image's default.
    pub fn with_command(mut self, command: impl Into<String>, args: Vec<String>) -> Self {
        self.command = Some(command.into());
        self.args = args;
        self
    }

    /// Set environment variables.
    pub fn with_environment(mut self, environment: HashMap<String, String>) -> Self {
        self.environment = environment;
        self
    }

    /// Add declared volume mounts.
    pub fn with_volume_mounts(mut self, mounts: Vec<VolumeMount>) -> Self {
        self.volume_mounts = mounts;
        self
    }

    /// Enable a health check with the given settings.
    pub fn with_health_check(mut self, health_check: HealthCheck) -> Self {
        self.health_check = Some(health_check);
        self
    }

    /// Set the run-as-user variant.
    pub fn with_run_as(mut self, run_as: RunAsUser) -> Self {
        self.run_as = run_as;
        self
    }

    /// The container's unique name.
    pub fn name(&self) -> &ContainerName {
        &self.name
    }

    /// Where the container's image comes from.
    pub fn image(&self) -> &ImageSource {
        &self.image
    }

    /// Names of the containers this one depends on.
    pub fn dependencies(&self) -> &HashSet<ContainerName> {
        &self.dependencies
    }

    /// The command override, if any.
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    /// Arguments for the command override.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Environment variables for the container.
    pub fn environment(&self) -> &HashMap<String, String> {
        &self.environment
    }

    /// Declared volume mounts.
    pub fn volume_mounts(&self) -> &[VolumeMount] {
        &self.volume_mounts
    }

    /// Health check settings, if the container has a health check.
    pub fn health_check(&self) -> Option<&HealthCheck> {
        self.health_check.as_ref()
    }

    /// The run-as-user variant.
    pub fn run_as(&self) -> &RunAsUser {
        &self.run_as
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_defaults() {
        let container = Container::new("db", ImageSource::Image("postgres:16".to_string()));

        assert_eq!(container.name().as_str(), "db");
        assert!(container.dependencies().is_empty());
        assert!(container.command().is_none());
        assert!(container.health_check().is_none());
        assert_eq!(container.run_as(), &RunAsUser::DefaultContainerUser);
    }

    #[test]
    fn test_container_with_dependencies() {
        let container = Container::new("api", ImageSource::Image("api:latest".to_string()))
            .with_dependencies(["db", "cache"]);

        assert_eq!(container.dependencies().len(), 2);
        assert!(container.dependencies().contains(&ContainerName::new("db")));
        assert!(
            container
                .dependencies()
                .contains(&ContainerName::new("cache"))
        );
    }

    #[test]
    fn test_container_with_command() {
        let container = Container::new("task", ImageSource::Build(PathBuf::from("./task")))
            .with_command("sh", vec!["-c".to_string(), "make test".to_string()]);

        assert_eq!(container.command(), Some("sh"));
        assert_eq!(container.args(), &["-c", "make test"]);
    }

    #[test]
    fn test_health_check_defaults() {
        let check = HealthCheck::default();

        assert_eq!(check.interval, Duration::from_secs(1));
        assert_eq!(check.retries, 30);
    }

    #[test]
    fn test_volume_mount_with_options() {
        let mount = VolumeMount::with_options("/tmp/passwd", "/etc/passwd", "ro");

        assert_eq!(mount.local_path, PathBuf::from("/tmp/passwd"));
        assert_eq!(mount.container_path, "/etc/passwd");
        assert_eq!(mount.options.as_deref(), Some("ro"));
    }
}
