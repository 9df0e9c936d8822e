//! Common test utilities shared across integration tests.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use caravan::testing::FakeEngine;
use caravan::{
    Container, ContainerEngine, ContainerGraph, ContainerName, EventBus, EventHandler, EventKind,
    ImageSource, RunAsCurrentUserProvider, SystemInfo, TaskEvent, TaskRun,
};

/// Event handler that records every event it receives.
pub struct RecordingHandler {
    events: Mutex<Vec<TaskEvent>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub async fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().await.clone()
    }

    /// The kinds of the events received for one container, in order.
    pub async fn kinds_for(&self, name: &str) -> Vec<EventKind> {
        let name = ContainerName::new(name);
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.container() == Some(&name))
            .map(TaskEvent::kind)
            .collect()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &TaskEvent) {
        self.events.lock().await.push(event.clone());
    }
}

pub fn system_info() -> SystemInfo {
    SystemInfo {
        user_id: 1000,
        group_id: 1000,
        user_name: "dev".to_string(),
        group_name: "dev".to_string(),
    }
}

pub fn image_container(name: &str) -> Container {
    Container::new(name, ImageSource::Image(format!("{}:latest", name)))
}

/// Assemble a run over the given containers, returning the pieces a test
/// needs to drive and observe it.
pub async fn build_run(
    containers: Vec<Container>,
    engine: Arc<FakeEngine>,
) -> (TaskRun, Arc<RecordingHandler>) {
    let graph = ContainerGraph::build(containers).unwrap();

    let bus = Arc::new(EventBus::new());
    let recorder = Arc::new(RecordingHandler::new());
    bus.register(recorder.clone()).await;

    let run = TaskRun::new(
        graph,
        engine as Arc<dyn ContainerEngine>,
        RunAsCurrentUserProvider::new(system_info()),
        bus,
    );

    (run, recorder)
}

/// Index of the first call matching (op, container) in the engine's call
/// record, panicking if absent.
pub fn call_position(
    calls: &[(caravan::testing::EngineOp, String)],
    op: caravan::testing::EngineOp,
    container: &str,
) -> usize {
    calls
        .iter()
        .position(|(o, n)| *o == op && n == container)
        .unwrap_or_else(|| panic!("no {:?} call for '{}' in {:?}", op, container, calls))
}
