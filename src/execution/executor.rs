//! Step executor.
//!
//! Executes one step at a time against the container engine (or the
//! filesystem, for temporary resources) and posts exactly one success or
//! failure event when the operation concludes. Errors never cross this
//! boundary: every failure becomes an event so the orchestration loop can
//! keep deriving cleanup for everything else.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::graph::ContainerGraph;
use crate::core::types::ContainerName;
use crate::engine::{ContainerCreationSpec, ContainerEngine};
use crate::events::TaskEvent;
use crate::events::log::EventLog;
use crate::steps::Step;

use super::user::RunAsCurrentUserProvider;

/// Executes dispatched steps against the engine and posts their outcomes.
pub struct StepExecutor {
    graph: Arc<ContainerGraph>,
    engine: Arc<dyn ContainerEngine>,
    user_provider: Arc<RunAsCurrentUserProvider>,
}

impl StepExecutor {
    /// Create an executor for one run.
    pub fn new(
        graph: Arc<ContainerGraph>,
        engine: Arc<dyn ContainerEngine>,
        user_provider: Arc<RunAsCurrentUserProvider>,
    ) -> Self {
        Self {
            graph,
            engine,
            user_provider,
        }
    }

    /// Execute one step to completion, posting its concluding event.
    pub async fn execute(&self, step: Step, log: &EventLog) {
        debug!(%step, "executing step");

        match step {
            Step::BuildImage { container } => self.build_image(container, log).await,
            Step::CreateContainer { container, image } => {
                self.create_container(container, image, log).await
            }
            Step::StartContainer { container, handle } => {
                let event = match self.engine.start_container(&handle).await {
                    Ok(()) => TaskEvent::ContainerStarted { container },
                    Err(e) => TaskEvent::ContainerStartFailed {
                        container,
                        message: e.to_string(),
                    },
                };
                log.post_event(event).await;
            }
            Step::WaitForHealthy { container, handle } => {
                let event = match self.engine.wait_for_healthy(&handle).await {
                    Ok(()) => TaskEvent::ContainerBecameHealthy { container },
                    Err(e) => TaskEvent::ContainerHealthCheckFailed {
                        container,
                        message: e.to_string(),
                    },
                };
                log.post_event(event).await;
            }
            Step::WaitForExit { container, handle } => {
                let event = match self.engine.wait_for_exit(&handle).await {
                    Ok(exit_code) => TaskEvent::RunningContainerExited {
                        container,
                        exit_code,
                    },
                    Err(e) => TaskEvent::ContainerRunFailed {
                        container,
                        message: e.to_string(),
                    },
                };
                log.post_event(event).await;
            }
            Step::StopContainer { container, handle } => {
                let event = match self.engine.stop_container(&handle).await {
                    Ok(()) => TaskEvent::ContainerStopped { container },
                    Err(e) => TaskEvent::ContainerStopFailed {
                        container,
                        message: e.to_string(),
                    },
                };
                log.post_event(event).await;
            }
            Step::RemoveContainer { container, handle } => {
                let event = match self.engine.remove_container(&handle).await {
                    Ok(()) => TaskEvent::ContainerRemoved { container },
                    Err(e) => TaskEvent::ContainerRemovalFailed {
                        container,
                        message: e.to_string(),
                    },
                };
                log.post_event(event).await;
            }
            Step::DeleteTemporaryFile { path } => {
                let event = match tokio::fs::remove_file(&path).await {
                    Ok(()) => TaskEvent::TemporaryFileDeleted { path },
                    Err(e) => TaskEvent::TemporaryFileDeletionFailed {
                        path,
                        message: e.to_string(),
                    },
                };
                log.post_event(event).await;
            }
            Step::DeleteTemporaryDirectory { path } => {
                let event = match tokio::fs::remove_dir_all(&path).await {
                    Ok(()) => TaskEvent::TemporaryDirectoryDeleted { path },
                    Err(e) => TaskEvent::TemporaryDirectoryDeletionFailed {
                        path,
                        message: e.to_string(),
                    },
                };
                log.post_event(event).await;
            }
            Step::DisplayCleanupInstructions { container, handle } => {
                warn!(
                    container = %container,
                    handle = %handle,
                    "container was not cleaned up; remove it manually, e.g. 'docker rm -f {}'",
                    handle
                );
                log.post_event(TaskEvent::CleanupInstructionsDisplayed { container })
                    .await;
            }
        }
    }

    async fn build_image(&self, container: ContainerName, log: &EventLog) {
        let definition = match self.graph.node(&container) {
            Ok(node) => node.container(),
            Err(e) => {
                log.post_event(TaskEvent::ImageBuildFailed {
                    container,
                    message: e.to_string(),
                })
                .await;
                return;
            }
        };

        let event = match self.engine.build_image(definition).await {
            Ok(image) => TaskEvent::ImageBuilt { container, image },
            Err(e) => TaskEvent::ImageBuildFailed {
                container,
                message: e.to_string(),
            },
        };
        log.post_event(event).await;
    }

    async fn create_container(
        &self,
        container: ContainerName,
        image: crate::core::types::ImageReference,
        log: &EventLog,
    ) {
        let definition = match self.graph.node(&container) {
            Ok(node) => node.container(),
            Err(e) => {
                log.post_event(TaskEvent::ContainerCreationFailed {
                    container,
                    message: e.to_string(),
                })
                .await;
                return;
            }
        };

        // The run-as-current-user configuration is generated here, once per
        // container, immediately before the engine call. Temporary file and
        // directory events are posted by the provider as it works.
        let user_config = match self
            .user_provider
            .generate_configuration(definition, log)
            .await
        {
            Ok(config) => config,
            Err(e) => {
                log.post_event(TaskEvent::ContainerCreationFailed {
                    container,
                    message: e.to_string(),
                })
                .await;
                return;
            }
        };

        let mut spec = ContainerCreationSpec::for_container(definition, image);
        spec.volume_mounts.extend(user_config.volume_mounts);
        spec.user = user_config.user;

        let event = match self.engine.create_container(&spec).await {
            Ok(handle) => TaskEvent::ContainerCreated { container, handle },
            Err(e) => TaskEvent::ContainerCreationFailed {
                container,
                message: e.to_string(),
            },
        };
        log.post_event(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::container::{Container, ImageSource, RunAsUser};
    use crate::core::types::{ContainerHandle, ImageReference};
    use crate::events::{EventBus, EventKind};
    use crate::execution::user::SystemInfo;
    use crate::testing::{EngineOp, FakeEngine};
    use uuid::Uuid;

    fn system_info() -> SystemInfo {
        SystemInfo {
            user_id: 1000,
            group_id: 1000,
            user_name: "dev".to_string(),
            group_name: "dev".to_string(),
        }
    }

    struct Fixture {
        executor: StepExecutor,
        engine: Arc<FakeEngine>,
        log: EventLog,
    }

    fn fixture(containers: Vec<Container>) -> Fixture {
        let graph = Arc::new(ContainerGraph::build(containers).unwrap());
        let engine = Arc::new(FakeEngine::new());
        let provider = Arc::new(RunAsCurrentUserProvider::new(system_info()));
        let log = EventLog::new(Arc::clone(&graph), Arc::new(EventBus::new()));
        let executor = StepExecutor::new(graph, engine.clone() as Arc<dyn ContainerEngine>, provider);

        Fixture {
            executor,
            engine,
            log,
        }
    }

    fn plain_container(name: &str) -> Container {
        Container::new(name, ImageSource::Image("app:latest".to_string()))
    }

    #[tokio::test]
    async fn test_create_posts_created_event_with_handle() {
        let f = fixture(vec![plain_container("task")]);

        f.executor
            .execute(
                Step::CreateContainer {
                    container: ContainerName::new("task"),
                    image: ImageReference::new("app:latest"),
                },
                &f.log,
            )
            .await;

        let snapshot = f.log.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.created_handle(&ContainerName::new("task")).is_some());
        assert_eq!(f.engine.calls_of(EngineOp::Create), vec!["task"]);
    }

    #[tokio::test]
    async fn test_engine_failure_becomes_failure_event() {
        let f = fixture(vec![plain_container("task")]);
        f.engine.fail_on(EngineOp::Stop, "task", "engine exploded");

        f.executor
            .execute(
                Step::StopContainer {
                    container: ContainerName::new("task"),
                    handle: ContainerHandle::new("task-ctr"),
                },
                &f.log,
            )
            .await;

        let snapshot = f.log.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(
            snapshot.events()[0].kind(),
            EventKind::ContainerStopFailed
        );
        assert!(snapshot.events()[0].to_string().contains("engine exploded"));
    }

    #[tokio::test]
    async fn test_create_for_run_as_user_container_posts_temp_events_first() {
        let f = fixture(vec![
            plain_container("task").with_run_as(RunAsUser::CurrentUser {
                home_directory: "/home/dev".to_string(),
            }),
        ]);

        f.executor
            .execute(
                Step::CreateContainer {
                    container: ContainerName::new("task"),
                    image: ImageReference::new("app:latest"),
                },
                &f.log,
            )
            .await;

        let snapshot = f.log.snapshot();
        let kinds: Vec<EventKind> = snapshot.events().iter().map(TaskEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::TemporaryFileCreated,
                EventKind::TemporaryFileCreated,
                EventKind::TemporaryDirectoryCreated,
                EventKind::ContainerCreated,
            ]
        );

        // The engine saw the extra mounts and the host identity.
        let specs = f.engine.created_specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].volume_mounts.len(), 3);
        assert_eq!(specs[0].user.map(|u| u.uid), Some(1000));

        // Clean up what the provider wrote to the real temp dir.
        for event in snapshot.events() {
            match event {
                TaskEvent::TemporaryFileCreated { path, .. } => {
                    let _ = tokio::fs::remove_file(path).await;
                }
                TaskEvent::TemporaryDirectoryCreated { path, .. } => {
                    let _ = tokio::fs::remove_dir_all(path).await;
                }
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn test_delete_temporary_file_step() {
        let f = fixture(vec![plain_container("task")]);

        let path = std::env::temp_dir().join(format!("caravan-test-{}", Uuid::new_v4()));
        tokio::fs::write(&path, "x").await.unwrap();

        f.executor
            .execute(Step::DeleteTemporaryFile { path: path.clone() }, &f.log)
            .await;

        assert!(!path.exists());
        let snapshot = f.log.snapshot();
        assert_eq!(snapshot.events()[0].kind(), EventKind::TemporaryFileDeleted);
    }

    #[tokio::test]
    async fn test_delete_missing_temporary_file_posts_failure() {
        let f = fixture(vec![plain_container("task")]);

        let path = std::env::temp_dir().join(format!("caravan-missing-{}", Uuid::new_v4()));
        f.executor
            .execute(Step::DeleteTemporaryFile { path }, &f.log)
            .await;

        let snapshot = f.log.snapshot();
        assert_eq!(
            snapshot.events()[0].kind(),
            EventKind::TemporaryFileDeletionFailed
        );
    }

    #[tokio::test]
    async fn test_wait_for_exit_posts_exit_code() {
        let f = fixture(vec![plain_container("task")]);
        f.engine.exit_code_for("task", 3);

        // Create first so the fake engine knows the handle.
        f.executor
            .execute(
                Step::CreateContainer {
                    container: ContainerName::new("task"),
                    image: ImageReference::new("app:latest"),
                },
                &f.log,
            )
            .await;
        let handle = f
            .log
            .snapshot()
            .created_handle(&ContainerName::new("task"))
            .unwrap()
            .clone();

        f.executor
            .execute(
                Step::WaitForExit {
                    container: ContainerName::new("task"),
                    handle,
                },
                &f.log,
            )
            .await;

        let snapshot = f.log.snapshot();
        assert_eq!(snapshot.exit_code_of(&ContainerName::new("task")), Some(3));
    }
}
