//! Steps: instructions to perform externally-visible actions.
//!
//! A [`Step`] carries everything needed to perform one action against the
//! container engine or the filesystem, and nothing else; results arrive
//! later as events. Steps are value types with `Eq`/`Hash` so the executor
//! queue can recognize one it has already dispatched.

pub mod rules;

use std::fmt;
use std::path::PathBuf;

use crate::core::types::{ContainerHandle, ContainerName, ImageReference};

/// An instruction to perform one externally-visible action.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Step {
    /// Build the image for a container defined by a build directory.
    BuildImage { container: ContainerName },

    /// Create a container from its image. Generating the container's
    /// run-as-current-user configuration happens as part of executing
    /// this step, before the engine call.
    CreateContainer {
        container: ContainerName,
        image: ImageReference,
    },

    /// Start a created container.
    StartContainer {
        container: ContainerName,
        handle: ContainerHandle,
    },

    /// Wait for a started container's health check to report healthy.
    WaitForHealthy {
        container: ContainerName,
        handle: ContainerHandle,
    },

    /// Wait for the task container to exit, yielding its exit code.
    WaitForExit {
        container: ContainerName,
        handle: ContainerHandle,
    },

    /// Stop a running container.
    StopContainer {
        container: ContainerName,
        handle: ContainerHandle,
    },

    /// Remove a stopped (or never-started) container.
    RemoveContainer {
        container: ContainerName,
        handle: ContainerHandle,
    },

    /// Delete a temporary file created for a run-as-current-user
    /// configuration.
    DeleteTemporaryFile { path: PathBuf },

    /// Delete a temporary directory created for a run-as-current-user
    /// configuration.
    DeleteTemporaryDirectory { path: PathBuf },

    /// Tell the user how to clean up a container the run couldn't.
    DisplayCleanupInstructions {
        container: ContainerName,
        handle: ContainerHandle,
    },
}

impl Step {
    /// The container this step acts on, if it acts on one.
    pub fn container(&self) -> Option<&ContainerName> {
        match self {
            Step::BuildImage { container }
            | Step::CreateContainer { container, .. }
            | Step::StartContainer { container, .. }
            | Step::WaitForHealthy { container, .. }
            | Step::WaitForExit { container, .. }
            | Step::StopContainer { container, .. }
            | Step::RemoveContainer { container, .. }
            | Step::DisplayCleanupInstructions { container, .. } => Some(container),
            Step::DeleteTemporaryFile { .. } | Step::DeleteTemporaryDirectory { .. } => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::BuildImage { container } => write!(f, "build image for '{}'", container),
            Step::CreateContainer { container, image } => {
                write!(f, "create container '{}' from '{}'", container, image)
            }
            Step::StartContainer { container, .. } => {
                write!(f, "start container '{}'", container)
            }
            Step::WaitForHealthy { container, .. } => {
                write!(f, "wait for container '{}' to become healthy", container)
            }
            Step::WaitForExit { container, .. } => {
                write!(f, "wait for container '{}' to exit", container)
            }
            Step::StopContainer { container, .. } => {
                write!(f, "stop container '{}'", container)
            }
            Step::RemoveContainer { container, .. } => {
                write!(f, "remove container '{}'", container)
            }
            Step::DeleteTemporaryFile { path } => {
                write!(f, "delete temporary file '{}'", path.display())
            }
            Step::DeleteTemporaryDirectory { path } => {
                write!(f, "delete temporary directory '{}'", path.display())
            }
            Step::DisplayCleanupInstructions { container, .. } => {
                write!(f, "display cleanup instructions for '{}'", container)
            }
        }
    }
}
