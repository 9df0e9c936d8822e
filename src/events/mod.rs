//! Run events and event distribution.
//!
//! Everything that happens during a task run is recorded as a [`TaskEvent`]:
//! an immutable fact about a completed external operation. Events are the
//! only record of run state; container status is always recomputed from
//! them, never stored in mutable fields. The [`EventBus`] forwards every
//! posted event to registered handlers for user-facing rendering.

pub mod log;

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::core::types::{ContainerHandle, ContainerName, ImageReference};

/// An immutable fact about something that has occurred during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    /// An image was built for a container.
    ImageBuilt {
        container: ContainerName,
        image: ImageReference,
    },

    /// Building a container's image failed.
    ImageBuildFailed {
        container: ContainerName,
        message: String,
    },

    /// A container was created by the engine.
    ContainerCreated {
        container: ContainerName,
        handle: ContainerHandle,
    },

    /// Creating a container failed.
    ContainerCreationFailed {
        container: ContainerName,
        message: String,
    },

    /// A container was started.
    ContainerStarted { container: ContainerName },

    /// Starting a container failed.
    ContainerStartFailed {
        container: ContainerName,
        message: String,
    },

    /// A container's health check reported healthy.
    ContainerBecameHealthy { container: ContainerName },

    /// A container's health check reported unhealthy or could not be run.
    ContainerHealthCheckFailed {
        container: ContainerName,
        message: String,
    },

    /// The running task container exited.
    RunningContainerExited {
        container: ContainerName,
        exit_code: i64,
    },

    /// Observing the task container's exit failed.
    ContainerRunFailed {
        container: ContainerName,
        message: String,
    },

    /// A container was stopped.
    ContainerStopped { container: ContainerName },

    /// Stopping a container failed.
    ContainerStopFailed {
        container: ContainerName,
        message: String,
    },

    /// A container was removed.
    ContainerRemoved { container: ContainerName },

    /// Removing a container failed.
    ContainerRemovalFailed {
        container: ContainerName,
        message: String,
    },

    /// A temporary file was created for a container's run-as-current-user
    /// configuration.
    TemporaryFileCreated {
        container: ContainerName,
        path: PathBuf,
    },

    /// A temporary directory was created for a container's
    /// run-as-current-user configuration.
    TemporaryDirectoryCreated {
        container: ContainerName,
        path: PathBuf,
    },

    /// A temporary file was deleted.
    TemporaryFileDeleted { path: PathBuf },

    /// Deleting a temporary file failed.
    TemporaryFileDeletionFailed { path: PathBuf, message: String },

    /// A temporary directory was deleted.
    TemporaryDirectoryDeleted { path: PathBuf },

    /// Deleting a temporary directory failed.
    TemporaryDirectoryDeletionFailed { path: PathBuf, message: String },

    /// Manual cleanup instructions were shown for a container that could
    /// not be cleaned up.
    CleanupInstructionsDisplayed { container: ContainerName },

    /// The user requested cancellation. Treated as if the task container
    /// had exited: teardown begins immediately.
    TaskCancelled,
}

/// Fieldless mirror of [`TaskEvent`], used to query the log by variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ImageBuilt,
    ImageBuildFailed,
    ContainerCreated,
    ContainerCreationFailed,
    ContainerStarted,
    ContainerStartFailed,
    ContainerBecameHealthy,
    ContainerHealthCheckFailed,
    RunningContainerExited,
    ContainerRunFailed,
    ContainerStopped,
    ContainerStopFailed,
    ContainerRemoved,
    ContainerRemovalFailed,
    TemporaryFileCreated,
    TemporaryDirectoryCreated,
    TemporaryFileDeleted,
    TemporaryFileDeletionFailed,
    TemporaryDirectoryDeleted,
    TemporaryDirectoryDeletionFailed,
    CleanupInstructionsDisplayed,
    TaskCancelled,
}

impl TaskEvent {
    /// The variant tag of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            TaskEvent::ImageBuilt { .. } => EventKind::ImageBuilt,
            TaskEvent::ImageBuildFailed { .. } => EventKind::ImageBuildFailed,
            TaskEvent::ContainerCreated { .. } => EventKind::ContainerCreated,
            TaskEvent::ContainerCreationFailed { .. } => EventKind::ContainerCreationFailed,
            TaskEvent::ContainerStarted { .. } => EventKind::ContainerStarted,
            TaskEvent::ContainerStartFailed { .. } => EventKind::ContainerStartFailed,
            TaskEvent::ContainerBecameHealthy { .. } => EventKind::ContainerBecameHealthy,
            TaskEvent::ContainerHealthCheckFailed { .. } => EventKind::ContainerHealthCheckFailed,
            TaskEvent::RunningContainerExited { .. } => EventKind::RunningContainerExited,
            TaskEvent::ContainerRunFailed { .. } => EventKind::ContainerRunFailed,
            TaskEvent::ContainerStopped { .. } => EventKind::ContainerStopped,
            TaskEvent::ContainerStopFailed { .. } => EventKind::ContainerStopFailed,
            TaskEvent::ContainerRemoved { .. } => EventKind::ContainerRemoved,
            TaskEvent::ContainerRemovalFailed { .. } => EventKind::ContainerRemovalFailed,
            TaskEvent::TemporaryFileCreated { .. } => EventKind::TemporaryFileCreated,
            TaskEvent::TemporaryDirectoryCreated { .. } => EventKind::TemporaryDirectoryCreated,
            TaskEvent::TemporaryFileDeleted { .. } => EventKind::TemporaryFileDeleted,
            TaskEvent::TemporaryFileDeletionFailed { .. } => {
                EventKind::TemporaryFileDeletionFailed
            }
            TaskEvent::TemporaryDirectoryDeleted { .. } => EventKind::TemporaryDirectoryDeleted,
            TaskEvent::TemporaryDirectoryDeletionFailed { .. } => {
                EventKind::TemporaryDirectoryDeletionFailed
            }
            TaskEvent::CleanupInstructionsDisplayed { .. } => {
                EventKind::CleanupInstructionsDisplayed
            }
            TaskEvent::TaskCancelled => EventKind::TaskCancelled,
        }
    }

    /// The container this event is about, if it is about one.
    pub fn container(&self) -> Option<&ContainerName> {
        match self {
            TaskEvent::ImageBuilt { container, .. }
            | TaskEvent::ImageBuildFailed { container, .. }
            | TaskEvent::ContainerCreated { container, .. }
            | TaskEvent::ContainerCreationFailed { container, .. }
            | TaskEvent::ContainerStarted { container }
            | TaskEvent::ContainerStartFailed { container, .. }
            | TaskEvent::ContainerBecameHealthy { container }
            | TaskEvent::ContainerHealthCheckFailed { container, .. }
            | TaskEvent::RunningContainerExited { container, .. }
            | TaskEvent::ContainerRunFailed { container, .. }
            | TaskEvent::ContainerStopped { container }
            | TaskEvent::ContainerStopFailed { container, .. }
            | TaskEvent::ContainerRemoved { container }
            | TaskEvent::ContainerRemovalFailed { container, .. }
            | TaskEvent::TemporaryFileCreated { container, .. }
            | TaskEvent::TemporaryDirectoryCreated { container, .. }
            | TaskEvent::CleanupInstructionsDisplayed { container } => Some(container),
            TaskEvent::TemporaryFileDeleted { .. }
            | TaskEvent::TemporaryFileDeletionFailed { .. }
            | TaskEvent::TemporaryDirectoryDeleted { .. }
            | TaskEvent::TemporaryDirectoryDeletionFailed { .. }
            | TaskEvent::TaskCancelled => None,
        }
    }

    /// Whether this event records a failure. Any failure event in the log
    /// makes the run's final state `Failed`.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TaskEvent::ImageBuildFailed { .. }
                | TaskEvent::ContainerCreationFailed { .. }
                | TaskEvent::ContainerStartFailed { .. }
                | TaskEvent::ContainerHealthCheckFailed { .. }
                | TaskEvent::ContainerRunFailed { .. }
                | TaskEvent::ContainerStopFailed { .. }
                | TaskEvent::ContainerRemovalFailed { .. }
                | TaskEvent::TemporaryFileDeletionFailed { .. }
                | TaskEvent::TemporaryDirectoryDeletionFailed { .. }
        )
    }

    /// Whether this event records a failure while bringing the task up.
    /// Such a failure forces teardown of everything already running.
    pub fn is_startup_failure(&self) -> bool {
        matches!(
            self,
            TaskEvent::ImageBuildFailed { .. }
                | TaskEvent::ContainerCreationFailed { .. }
                | TaskEvent::ContainerStartFailed { .. }
                | TaskEvent::ContainerHealthCheckFailed { .. }
                | TaskEvent::ContainerRunFailed { .. }
        )
    }
}

impl fmt::Display for TaskEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskEvent::ImageBuilt { container, image } => {
                write!(f, "image '{}' built for container '{}'", image, container)
            }
            TaskEvent::ImageBuildFailed { container, message } => write!(
                f,
                "the image for container '{}' couldn't be built: {}",
                container, message
            ),
            TaskEvent::ContainerCreated { container, .. } => {
                write!(f, "container '{}' created", container)
            }
            TaskEvent::ContainerCreationFailed { container, message } => write!(
                f,
                "the container '{}' couldn't be created: {}",
                container, message
            ),
            TaskEvent::ContainerStarted { container } => {
                write!(f, "container '{}' started", container)
            }
            TaskEvent::ContainerStartFailed { container, message } => write!(
                f,
                "the container '{}' couldn't be started: {}",
                container, message
            ),
            TaskEvent::ContainerBecameHealthy { container } => {
                write!(f, "container '{}' became healthy", container)
            }
            TaskEvent::ContainerHealthCheckFailed { container, message } => write!(
                f,
                "the container '{}' didn't become healthy: {}",
                container, message
            ),
            TaskEvent::RunningContainerExited {
                container,
                exit_code,
            } => write!(
                f,
                "container '{}' exited with code {}",
                container, exit_code
            ),
            TaskEvent::ContainerRunFailed { container, message } => write!(
                f,
                "waiting for container '{}' to exit failed: {}",
                container, message
            ),
            TaskEvent::ContainerStopped { container } => {
                write!(f, "container '{}' stopped", container)
            }
            TaskEvent::ContainerStopFailed { container, message } => write!(
                f,
                "the container '{}' couldn't be stopped: {}",
                container, message
            ),
            TaskEvent::ContainerRemoved { container } => {
                write!(f, "container '{}' removed", container)
            }
            TaskEvent::ContainerRemovalFailed { container, message } => write!(
                f,
                "the container '{}' couldn't be removed: {}",
                container, message
            ),
            TaskEvent::TemporaryFileCreated { path, .. } => {
                write!(f, "temporary file '{}' created", path.display())
            }
            TaskEvent::TemporaryDirectoryCreated { path, .. } => {
                write!(f, "temporary directory '{}' created", path.display())
            }
            TaskEvent::TemporaryFileDeleted { path } => {
                write!(f, "temporary file '{}' deleted", path.display())
            }
            TaskEvent::TemporaryFileDeletionFailed { path, message } => write!(
                f,
                "the temporary file '{}' couldn't be deleted: {}",
                path.display(),
                message
            ),
            TaskEvent::TemporaryDirectoryDeleted { path } => {
                write!(f, "temporary directory '{}' deleted", path.display())
            }
            TaskEvent::TemporaryDirectoryDeletionFailed { path, message } => write!(
                f,
                "the temporary directory '{}' couldn't be deleted: {}",
                path.display(),
                message
            ),
            TaskEvent::CleanupInstructionsDisplayed { container } => write!(
                f,
                "manual cleanup instructions shown for container '{}'",
                container
            ),
            TaskEvent::TaskCancelled => write!(f, "task cancelled by user"),
        }
    }
}

/// Handler for receiving run events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &TaskEvent);
}

/// Event bus distributing every posted event to registered handlers.
///
/// The orchestration core posts events here as a side effect of appending
/// them to the log; it has no dependency on what handlers do with them.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: &TaskEvent) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;

    /// Test handler that records received events.
    struct RecordingHandler {
        events: Mutex<Vec<TaskEvent>>,
    }

    impl RecordingHandler {
        fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }

        async fn events(&self) -> Vec<TaskEvent> {
            self.events.lock().await.clone()
        }
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle(&self, event: &TaskEvent) {
            self.events.lock().await.push(event.clone());
        }
    }

    /// Test handler that counts events.
    struct CountingHandler {
        count: AtomicU32,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _event: &TaskEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_event_kind_matches_variant() {
        let event = TaskEvent::ContainerStarted {
            container: ContainerName::new("db"),
        };
        assert_eq!(event.kind(), EventKind::ContainerStarted);

        let event = TaskEvent::TaskCancelled;
        assert_eq!(event.kind(), EventKind::TaskCancelled);
    }

    #[test]
    fn test_event_container_accessor() {
        let event = TaskEvent::ContainerStopped {
            container: ContainerName::new("api"),
        };
        assert_eq!(event.container().unwrap().as_str(), "api");

        assert!(TaskEvent::TaskCancelled.container().is_none());
    }

    #[test]
    fn test_failure_classification() {
        let stop_failed = TaskEvent::ContainerStopFailed {
            container: ContainerName::new("db"),
            message: "engine error".to_string(),
        };
        assert!(stop_failed.is_failure());
        assert!(!stop_failed.is_startup_failure());

        let create_failed = TaskEvent::ContainerCreationFailed {
            container: ContainerName::new("db"),
            message: "engine error".to_string(),
        };
        assert!(create_failed.is_failure());
        assert!(create_failed.is_startup_failure());

        let started = TaskEvent::ContainerStarted {
            container: ContainerName::new("db"),
        };
        assert!(!started.is_failure());

        assert!(!TaskEvent::TaskCancelled.is_failure());
    }

    #[test]
    fn test_stop_failed_display() {
        let event = TaskEvent::ContainerStopFailed {
            container: ContainerName::new("some-container"),
            message: "Something went wrong".to_string(),
        };

        assert_eq!(
            event.to_string(),
            "the container 'some-container' couldn't be stopped: Something went wrong"
        );
    }

    #[test]
    fn test_exited_display() {
        let event = TaskEvent::RunningContainerExited {
            container: ContainerName::new("task"),
            exit_code: 123,
        };

        assert_eq!(event.to_string(), "container 'task' exited with code 123");
    }

    #[tokio::test]
    async fn test_emit_reaches_registered_handler() {
        let handler = Arc::new(RecordingHandler::new());
        let bus = EventBus::new();
        bus.register(handler.clone()).await;

        bus.emit(&TaskEvent::ContainerStarted {
            container: ContainerName::new("db"),
        })
        .await;

        let events = handler.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), EventKind::ContainerStarted);
    }

    #[tokio::test]
    async fn test_multiple_handlers_receive_same_event() {
        let handler1 = Arc::new(CountingHandler {
            count: AtomicU32::new(0),
        });
        let handler2 = Arc::new(CountingHandler {
            count: AtomicU32::new(0),
        });

        let bus = EventBus::new();
        bus.register(handler1.clone()).await;
        bus.register(handler2.clone()).await;

        bus.emit(&TaskEvent::TaskCancelled).await;

        assert_eq!(handler1.count.load(Ordering::SeqCst), 1);
        assert_eq!(handler2.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_handlers_does_not_panic() {
        let bus = EventBus::new();
        bus.emit(&TaskEvent::TaskCancelled).await;
        assert_eq!(bus.handler_count().await, 0);
    }
}
