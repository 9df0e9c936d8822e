//! Step derivation rules.
//!
//! [`eligible_steps`] is a pure function from an event-log snapshot and the
//! dependency graph to the set of steps whose preconditions currently hold.
//! The same snapshot always produces the same set; the executor's queue
//! filters out steps already dispatched, so re-deriving after every batch of
//! completions never double-enqueues anything.
//!
//! Startup rules drive containers through build → create → start → healthy,
//! with create gated on every dependency being satisfied. Once a stop
//! trigger appears (the task container exited, the user cancelled, or a
//! startup operation failed), startup rules are suppressed and teardown
//! rules take over, stopping containers in reverse dependency order and
//! cleaning up whatever was created, best-effort.

use crate::core::container::ImageSource;
use crate::core::graph::{ContainerGraph, ContainerNode};
use crate::core::types::{ContainerName, ImageReference};
use crate::events::log::LogSnapshot;
use crate::events::{EventKind, TaskEvent};

use super::Step;

/// Whether teardown has been triggered: the task container exited, the user
/// cancelled, or something failed while bringing the task up.
pub fn stop_triggered(snapshot: &LogSnapshot) -> bool {
    snapshot.has_any(EventKind::RunningContainerExited)
        || snapshot.has_any(EventKind::TaskCancelled)
        || snapshot.events().iter().any(TaskEvent::is_startup_failure)
}

/// Derive every step whose preconditions hold in the given snapshot.
///
/// Pure and idempotent: no ordering or dispatch state is consulted, so the
/// result depends only on the snapshot and the graph.
pub fn eligible_steps(snapshot: &LogSnapshot, graph: &ContainerGraph) -> Vec<Step> {
    let stopping = stop_triggered(snapshot);
    let mut steps = Vec::new();

    for node in graph.nodes() {
        if stopping {
            teardown_steps(node, snapshot, graph, &mut steps);
        } else {
            startup_steps(node, snapshot, graph, &mut steps);
        }
    }

    steps
}

fn startup_steps(
    node: &ContainerNode,
    snapshot: &LogSnapshot,
    graph: &ContainerGraph,
    steps: &mut Vec<Step>,
) {
    let container = node.container();
    let name = container.name();

    let image = match image_ready(node, snapshot) {
        ImageReadiness::Ready(image) => Some(image),
        ImageReadiness::NeedsBuild => {
            steps.push(Step::BuildImage {
                container: name.clone(),
            });
            None
        }
        ImageReadiness::Concluded => None,
    };

    if let Some(image) = image {
        if !snapshot.has(EventKind::ContainerCreated, name)
            && !snapshot.has(EventKind::ContainerCreationFailed, name)
            && dependencies_satisfied(node, snapshot, graph)
        {
            steps.push(Step::CreateContainer {
                container: name.clone(),
                image,
            });
        }
    }

    if let Some(handle) = snapshot.created_handle(name) {
        if !snapshot.has(EventKind::ContainerStarted, name)
            && !snapshot.has(EventKind::ContainerStartFailed, name)
        {
            steps.push(Step::StartContainer {
                container: name.clone(),
                handle: handle.clone(),
            });
        }

        // The task container's health gates nothing (it has no dependents),
        // so only its exit is observed.
        if container.health_check().is_some()
            && !graph.is_task_container(name)
            && snapshot.has(EventKind::ContainerStarted, name)
            && !snapshot.has(EventKind::ContainerBecameHealthy, name)
            && !snapshot.has(EventKind::ContainerHealthCheckFailed, name)
        {
            steps.push(Step::WaitForHealthy {
                container: name.clone(),
                handle: handle.clone(),
            });
        }

        if graph.is_task_container(name)
            && snapshot.has(EventKind::ContainerStarted, name)
            && !snapshot.has(EventKind::RunningContainerExited, name)
            && !snapshot.has(EventKind::ContainerRunFailed, name)
        {
            steps.push(Step::WaitForExit {
                container: name.clone(),
                handle: handle.clone(),
            });
        }
    }
}

fn teardown_steps(
    node: &ContainerNode,
    snapshot: &LogSnapshot,
    graph: &ContainerGraph,
    steps: &mut Vec<Step>,
) {
    let name = node.container().name();
    let handle = snapshot.created_handle(name);

    if let Some(handle) = handle {
        // Reverse topological order: a container is only stopped once every
        // container depending on it is accounted for.
        if snapshot.is_running(name) && dependents_accounted_for(node, snapshot) {
            steps.push(Step::StopContainer {
                container: name.clone(),
                handle: handle.clone(),
            });
        }

        if removal_ready(name, snapshot)
            && !snapshot.has(EventKind::ContainerRemoved, name)
            && !snapshot.has(EventKind::ContainerRemovalFailed, name)
        {
            steps.push(Step::RemoveContainer {
                container: name.clone(),
                handle: handle.clone(),
            });
        }

        if (snapshot.has(EventKind::ContainerStopFailed, name)
            || snapshot.has(EventKind::ContainerRemovalFailed, name))
            && !snapshot.has(EventKind::CleanupInstructionsDisplayed, name)
        {
            steps.push(Step::DisplayCleanupInstructions {
                container: name.clone(),
                handle: handle.clone(),
            });
        }
    }

    if temporary_resources_releasable(name, snapshot) {
        for event in snapshot.for_container(name) {
            match event {
                TaskEvent::TemporaryFileCreated { path, .. }
                    if !temporary_file_concluded(path, snapshot) =>
                {
                    steps.push(Step::DeleteTemporaryFile { path: path.clone() });
                }
                TaskEvent::TemporaryDirectoryCreated { path, .. }
                    if !temporary_directory_concluded(path, snapshot) =>
                {
                    steps.push(Step::DeleteTemporaryDirectory { path: path.clone() });
                }
                _ => {}
            }
        }
    }
}

enum ImageReadiness {
    /// An image reference is available for the create step.
    Ready(ImageReference),
    /// The image must be built and no build outcome is recorded yet.
    NeedsBuild,
    /// The build already failed; nothing further to do.
    Concluded,
}

fn image_ready(node: &ContainerNode, snapshot: &LogSnapshot) -> ImageReadiness {
    let name = node.container().name();

    match node.container().image() {
        ImageSource::Image(reference) => ImageReadiness::Ready(ImageReference::new(reference)),
        ImageSource::Build(_) => {
            let built = snapshot.for_container(name).into_iter().find_map(|event| {
                if let TaskEvent::ImageBuilt { image, .. } = event {
                    Some(image.clone())
                } else {
                    None
                }
            });

            match built {
                Some(image) => ImageReadiness::Ready(image),
                None if snapshot.has(EventKind::ImageBuildFailed, name) => {
                    ImageReadiness::Concluded
                }
                None => ImageReadiness::NeedsBuild,
            }
        }
    }
}

fn dependencies_satisfied(
    node: &ContainerNode,
    snapshot: &LogSnapshot,
    graph: &ContainerGraph,
) -> bool {
    node.dependencies().iter().all(|dependency| {
        graph
            .node(dependency)
            .map(|dep_node| snapshot.satisfies_dependents(dep_node.container()))
            .unwrap_or(false)
    })
}

/// A dependent is accounted for once it is no longer running and never will
/// be: it exited, stopped (a failed stop also counts, since teardown must
/// not wedge behind it), or it never started and startup rules are no
/// longer active.
fn dependents_accounted_for(node: &ContainerNode, snapshot: &LogSnapshot) -> bool {
    node.dependents().iter().all(|dependent| {
        !snapshot.has(EventKind::ContainerStarted, dependent)
            || snapshot.has(EventKind::RunningContainerExited, dependent)
            || snapshot.has(EventKind::ContainerStopped, dependent)
            || snapshot.has(EventKind::ContainerStopFailed, dependent)
    })
}

/// A created container can be removed once it is not running anymore: its
/// stop succeeded, it exited by itself (the task container), or it never
/// started. A failed stop leaves it running, so removal is not attempted;
/// the cleanup-instructions step covers it instead.
fn removal_ready(name: &ContainerName, snapshot: &LogSnapshot) -> bool {
    if snapshot.has(EventKind::ContainerStopFailed, name) {
        return false;
    }

    snapshot.has(EventKind::ContainerStopped, name)
        || snapshot.has(EventKind::RunningContainerExited, name)
        || !snapshot.has(EventKind::ContainerStarted, name)
}

/// Temporary files and directories are only deleted once the engine no
/// longer references them: their container was removed, or was never
/// created in the first place (its create step failed after the files were
/// generated). After a failed removal they may still be mount targets, so
/// they are left for the manual-cleanup path.
fn temporary_resources_releasable(name: &ContainerName, snapshot: &LogSnapshot) -> bool {
    snapshot.has(EventKind::ContainerRemoved, name)
        || snapshot.has(EventKind::ContainerCreationFailed, name)
}

fn temporary_file_concluded(path: &std::path::Path, snapshot: &LogSnapshot) -> bool {
    snapshot.events().iter().any(|event| match event {
        TaskEvent::TemporaryFileDeleted { path: p }
        | TaskEvent::TemporaryFileDeletionFailed { path: p, .. } => p == path,
        _ => false,
    })
}

fn temporary_directory_concluded(path: &std::path::Path, snapshot: &LogSnapshot) -> bool {
    snapshot.events().iter().any(|event| match event {
        TaskEvent::TemporaryDirectoryDeleted { path: p }
        | TaskEvent::TemporaryDirectoryDeletionFailed { path: p, .. } => p == path,
        _ => false,
    })
}
