//! Append-only event log for one task run.
//!
//! The log is the single shared mutable resource of a run. Appending takes
//! one mutex covering the push and the index update; everything else reads
//! from a [`LogSnapshot`] taken atomically, so a derivation pass always sees
//! a consistent view: events appended by steps still in flight only become
//! visible once the loop re-derives.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::core::container::Container;
use crate::core::graph::{ContainerGraph, GraphError};
use crate::core::types::{ContainerHandle, ContainerName};

use super::{EventBus, EventKind, TaskEvent};

#[derive(Default)]
struct LogInner {
    events: Vec<TaskEvent>,
    by_kind: HashMap<EventKind, Vec<usize>>,
    by_container: HashMap<ContainerName, Vec<usize>>,
}

/// The append-only record of everything that has happened in one run.
///
/// Owned by the orchestration loop for the duration of the run and
/// discarded afterwards. Safe for concurrent appends from step workers.
pub struct EventLog {
    graph: Arc<ContainerGraph>,
    bus: Arc<EventBus>,
    inner: Mutex<LogInner>,
}

impl EventLog {
    /// Create an empty log for a run over the given graph.
    pub fn new(graph: Arc<ContainerGraph>, bus: Arc<EventBus>) -> Self {
        Self {
            graph,
            bus,
            inner: Mutex::new(LogInner::default()),
        }
    }

    /// Append an event and forward it to the event bus.
    ///
    /// The append itself holds the lock only long enough to push the event
    /// and update the indices; handlers run after the lock is released.
    pub async fn post_event(&self, event: TaskEvent) {
        {
            let mut inner = self.inner.lock().expect("event log lock poisoned");
            let index = inner.events.len();
            inner.by_kind.entry(event.kind()).or_default().push(index);
            if let Some(container) = event.container() {
                inner
                    .by_container
                    .entry(container.clone())
                    .or_default()
                    .push(index);
            }
            inner.events.push(event.clone());
        }

        self.bus.emit(&event).await;
    }

    /// Take a consistent snapshot of the log for one derivation pass.
    pub fn snapshot(&self) -> LogSnapshot {
        let inner = self.inner.lock().expect("event log lock poisoned");
        LogSnapshot {
            events: inner.events.clone(),
            by_kind: inner.by_kind.clone(),
            by_container: inner.by_container.clone(),
        }
    }

    /// The dependency graph this run executes.
    pub fn graph(&self) -> &ContainerGraph {
        &self.graph
    }

    /// Whether the given container is the task container.
    pub fn is_task_container(&self, name: &ContainerName) -> bool {
        self.graph.is_task_container(name)
    }

    /// Direct dependencies of a container, delegating to the graph.
    pub fn dependencies_of(
        &self,
        name: &ContainerName,
    ) -> Result<&std::collections::HashSet<ContainerName>, GraphError> {
        self.graph.dependencies_of(name)
    }

    /// Direct dependents of a container, delegating to the graph.
    pub fn dependents_of(
        &self,
        name: &ContainerName,
    ) -> Result<&std::collections::HashSet<ContainerName>, GraphError> {
        self.graph.dependents_of(name)
    }
}

/// A consistent, immutable view of the log at one point in time.
#[derive(Debug, Clone)]
pub struct LogSnapshot {
    events: Vec<TaskEvent>,
    by_kind: HashMap<EventKind, Vec<usize>>,
    by_container: HashMap<ContainerName, Vec<usize>>,
}

impl LogSnapshot {
    /// An empty snapshot, as seen at the very start of a run.
    pub fn empty() -> Self {
        Self::from_events(Vec::new())
    }

    /// Build a snapshot directly from a sequence of events.
    ///
    /// Useful for exercising derivation rules against a hand-written
    /// history without going through a live log.
    pub fn from_events(events: Vec<TaskEvent>) -> Self {
        let mut by_kind: HashMap<EventKind, Vec<usize>> = HashMap::new();
        let mut by_container: HashMap<ContainerName, Vec<usize>> = HashMap::new();

        for (index, event) in events.iter().enumerate() {
            by_kind.entry(event.kind()).or_default().push(index);
            if let Some(container) = event.container() {
                by_container
                    .entry(container.clone())
                    .or_default()
                    .push(index);
            }
        }

        Self {
            events,
            by_kind,
            by_container,
        }
    }

    /// All events in append order.
    pub fn events(&self) -> &[TaskEvent] {
        &self.events
    }

    /// Number of events recorded.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether no events have been recorded.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// All events of the given kind, in append order.
    pub fn of_kind(&self, kind: EventKind) -> Vec<&TaskEvent> {
        self.by_kind
            .get(&kind)
            .map(|indices| indices.iter().map(|&i| &self.events[i]).collect())
            .unwrap_or_default()
    }

    /// All events about the given container, in append order.
    pub fn for_container(&self, name: &ContainerName) -> Vec<&TaskEvent> {
        self.by_container
            .get(name)
            .map(|indices| indices.iter().map(|&i| &self.events[i]).collect())
            .unwrap_or_default()
    }

    /// Whether an event of the given kind has been posted for a container.
    pub fn has(&self, kind: EventKind, name: &ContainerName) -> bool {
        self.by_container
            .get(name)
            .map(|indices| {
                indices
                    .iter()
                    .any(|&i| self.events[i].kind() == kind)
            })
            .unwrap_or(false)
    }

    /// Whether any event of the given kind has been posted.
    pub fn has_any(&self, kind: EventKind) -> bool {
        self.by_kind
            .get(&kind)
            .map(|indices| !indices.is_empty())
            .unwrap_or(false)
    }

    /// The engine handle recorded by a container's create event, if any.
    pub fn created_handle(&self, name: &ContainerName) -> Option<&ContainerHandle> {
        self.for_container(name).into_iter().find_map(|event| {
            if let TaskEvent::ContainerCreated { handle, .. } = event {
                Some(handle)
            } else {
                None
            }
        })
    }

    /// Whether a container is currently running: started, and neither
    /// exited nor stopped (a failed stop still counts as no longer running
    /// for scheduling purposes; it is recorded as a run failure instead).
    pub fn is_running(&self, name: &ContainerName) -> bool {
        self.has(EventKind::ContainerStarted, name)
            && !self.has(EventKind::RunningContainerExited, name)
            && !self.has(EventKind::ContainerStopped, name)
            && !self.has(EventKind::ContainerStopFailed, name)
    }

    /// Whether a container has done everything its dependents wait for:
    /// became healthy if it has a health check, started otherwise.
    pub fn satisfies_dependents(&self, container: &Container) -> bool {
        if container.health_check().is_some() {
            self.has(EventKind::ContainerBecameHealthy, container.name())
        } else {
            self.has(EventKind::ContainerStarted, container.name())
        }
    }

    /// The task container's exit code, if it has exited.
    pub fn exit_code_of(&self, name: &ContainerName) -> Option<i64> {
        self.for_container(name).into_iter().find_map(|event| {
            if let TaskEvent::RunningContainerExited { exit_code, .. } = event {
                Some(*exit_code)
            } else {
                None
            }
        })
    }

    /// All failure events recorded so far, in append order.
    pub fn failures(&self) -> Vec<&TaskEvent> {
        self.events.iter().filter(|e| e.is_failure()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::container::ImageSource;

    fn test_graph() -> Arc<ContainerGraph> {
        let db = Container::new("db", ImageSource::Image("postgres:16".to_string()));
        let task = Container::new("task", ImageSource::Image("app:latest".to_string()))
            .with_dependencies(["db"]);
        Arc::new(ContainerGraph::build(vec![db, task]).unwrap())
    }

    fn test_log() -> EventLog {
        EventLog::new(test_graph(), Arc::new(EventBus::new()))
    }

    fn started(name: &str) -> TaskEvent {
        TaskEvent::ContainerStarted {
            container: ContainerName::new(name),
        }
    }

    #[tokio::test]
    async fn test_events_kept_in_append_order() {
        let log = test_log();

        log.post_event(started("db")).await;
        log.post_event(started("task")).await;

        let snapshot = log.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(
            snapshot.events()[0].container().unwrap().as_str(),
            "db"
        );
        assert_eq!(
            snapshot.events()[1].container().unwrap().as_str(),
            "task"
        );
    }

    #[tokio::test]
    async fn test_of_kind_filters_and_preserves_order() {
        let log = test_log();

        log.post_event(started("db")).await;
        log.post_event(TaskEvent::ContainerBecameHealthy {
            container: ContainerName::new("db"),
        })
        .await;
        log.post_event(started("task")).await;

        let snapshot = log.snapshot();
        let starts = snapshot.of_kind(EventKind::ContainerStarted);
        assert_eq!(starts.len(), 2);
        assert_eq!(starts[0].container().unwrap().as_str(), "db");
        assert_eq!(starts[1].container().unwrap().as_str(), "task");
    }

    #[tokio::test]
    async fn test_for_container_filters() {
        let log = test_log();

        log.post_event(started("db")).await;
        log.post_event(started("task")).await;

        let snapshot = log.snapshot();
        let db_events = snapshot.for_container(&ContainerName::new("db"));
        assert_eq!(db_events.len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_is_isolated_from_later_appends() {
        let log = test_log();

        log.post_event(started("db")).await;
        let snapshot = log.snapshot();
        log.post_event(started("task")).await;

        assert_eq!(snapshot.len(), 1);
        assert_eq!(log.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_all_recorded() {
        let log = Arc::new(test_log());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let log = Arc::clone(&log);
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    log.post_event(started("db")).await;
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(log.snapshot().len(), 200);
    }

    #[tokio::test]
    async fn test_created_handle_lookup() {
        let log = test_log();

        log.post_event(TaskEvent::ContainerCreated {
            container: ContainerName::new("db"),
            handle: ContainerHandle::new("abc123"),
        })
        .await;

        let snapshot = log.snapshot();
        assert_eq!(
            snapshot
                .created_handle(&ContainerName::new("db"))
                .unwrap()
                .as_str(),
            "abc123"
        );
        assert!(snapshot.created_handle(&ContainerName::new("task")).is_none());
    }

    #[tokio::test]
    async fn test_is_running_lifecycle() {
        let log = test_log();
        let db = ContainerName::new("db");

        assert!(!log.snapshot().is_running(&db));

        log.post_event(started("db")).await;
        assert!(log.snapshot().is_running(&db));

        log.post_event(TaskEvent::ContainerStopped {
            container: db.clone(),
        })
        .await;
        assert!(!log.snapshot().is_running(&db));
    }

    #[tokio::test]
    async fn test_satisfies_dependents_depends_on_health_check() {
        let log = test_log();

        let plain = Container::new("db", ImageSource::Image("postgres:16".to_string()));
        let checked = Container::new("db", ImageSource::Image("postgres:16".to_string()))
            .with_health_check(Default::default());

        log.post_event(started("db")).await;
        let snapshot = log.snapshot();

        assert!(snapshot.satisfies_dependents(&plain));
        assert!(!snapshot.satisfies_dependents(&checked));

        log.post_event(TaskEvent::ContainerBecameHealthy {
            container: ContainerName::new("db"),
        })
        .await;
        assert!(log.snapshot().satisfies_dependents(&checked));
    }

    #[tokio::test]
    async fn test_graph_delegation() {
        let log = test_log();

        assert!(log.is_task_container(&ContainerName::new("task")));
        assert!(!log.is_task_container(&ContainerName::new("db")));

        let deps = log.dependencies_of(&ContainerName::new("task")).unwrap();
        assert!(deps.contains(&ContainerName::new("db")));

        let dependents = log.dependents_of(&ContainerName::new("db")).unwrap();
        assert!(dependents.contains(&ContainerName::new("task")));
    }

    #[tokio::test]
    async fn test_failures_collects_failure_events_in_order() {
        let log = test_log();

        log.post_event(started("db")).await;
        log.post_event(TaskEvent::ContainerStopFailed {
            container: ContainerName::new("db"),
            message: "first".to_string(),
        })
        .await;
        log.post_event(TaskEvent::ContainerRemovalFailed {
            container: ContainerName::new("db"),
            message: "second".to_string(),
        })
        .await;

        let snapshot = log.snapshot();
        let failures = snapshot.failures();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].kind(), EventKind::ContainerStopFailed);
        assert_eq!(failures[1].kind(), EventKind::ContainerRemovalFailed);
    }
}
