//! Testing utilities for users of the caravan library.
//!
//! [`FakeEngine`] is an in-memory [`ContainerEngine`] for exercising the
//! orchestration loop without a real container engine. It records every
//! call it receives, can be scripted to fail or delay specific operations,
//! and can hold the task container "running" until it is released or
//! stopped.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::core::container::Container;
use crate::core::types::{ContainerHandle, ImageReference};
use crate::engine::{ContainerCreationSpec, ContainerEngine, EngineError};

/// The engine operations a [`FakeEngine`] can be scripted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOp {
    Build,
    Create,
    Start,
    WaitHealthy,
    WaitExit,
    Stop,
    Remove,
}

#[derive(Default)]
struct FakeEngineState {
    calls: Vec<(EngineOp, String)>,
    failures: HashMap<(EngineOp, String), String>,
    delays: HashMap<(EngineOp, String), Duration>,
    exit_codes: HashMap<String, i64>,
    held_exits: HashMap<String, Arc<Notify>>,
    handles: HashMap<ContainerHandle, String>,
    specs: Vec<ContainerCreationSpec>,
}

/// A scriptable in-memory container engine.
///
/// By default every operation succeeds immediately and `wait_for_exit`
/// returns exit code 0, so a whole run completes without further setup.
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<FakeEngineState>,
}

impl FakeEngine {
    /// Create an engine where every operation succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the given operation on the given container to fail.
    pub fn fail_on(&self, op: EngineOp, container: &str, message: &str) {
        self.lock()
            .failures
            .insert((op, container.to_string()), message.to_string());
    }

    /// Script the given operation on the given container to take this long.
    pub fn delay_on(&self, op: EngineOp, container: &str, delay: Duration) {
        self.lock().delays.insert((op, container.to_string()), delay);
    }

    /// Set the exit code `wait_for_exit` reports for a container.
    pub fn exit_code_for(&self, container: &str, exit_code: i64) {
        self.lock()
            .exit_codes
            .insert(container.to_string(), exit_code);
    }

    /// Keep a container "running": `wait_for_exit` blocks until
    /// [`FakeEngine::release_exit`] is called or the container is stopped.
    pub fn hold_exit(&self, container: &str) {
        self.lock()
            .held_exits
            .insert(container.to_string(), Arc::new(Notify::new()));
    }

    /// Release a held container with the given exit code.
    pub fn release_exit(&self, container: &str, exit_code: i64) {
        let mut state = self.lock();
        state.exit_codes.insert(container.to_string(), exit_code);
        if let Some(notify) = state.held_exits.get(container) {
            notify.notify_one();
        }
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<(EngineOp, String)> {
        self.lock().calls.clone()
    }

    /// The containers a given operation was called for, in order.
    pub fn calls_of(&self, op: EngineOp) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter(|(o, _)| *o == op)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// The creation specs received so far, in order.
    pub fn created_specs(&self) -> Vec<ContainerCreationSpec> {
        self.lock().specs.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeEngineState> {
        self.state.lock().expect("fake engine lock poisoned")
    }

    /// Record the call, apply any scripted delay, then return any scripted
    /// failure.
    async fn begin(&self, op: EngineOp, container: &str) -> Result<(), String> {
        let (delay, failure) = {
            let mut state = self.lock();
            state.calls.push((op, container.to_string()));
            (
                state.delays.get(&(op, container.to_string())).copied(),
                state.failures.get(&(op, container.to_string())).cloned(),
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match failure {
            Some(message) => Err(message),
            None => Ok(()),
        }
    }

    fn container_for(&self, handle: &ContainerHandle) -> String {
        self.lock()
            .handles
            .get(handle)
            .cloned()
            .unwrap_or_else(|| handle.as_str().to_string())
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn build_image(&self, container: &Container) -> Result<ImageReference, EngineError> {
        let name = container.name().as_str().to_string();
        self.begin(EngineOp::Build, &name)
            .await
            .map_err(EngineError::BuildFailed)?;
        Ok(ImageReference::new(format!("{}:built", name)))
    }

    async fn create_container(
        &self,
        spec: &ContainerCreationSpec,
    ) -> Result<ContainerHandle, EngineError> {
        let name = spec.name.as_str().to_string();
        self.begin(EngineOp::Create, &name)
            .await
            .map_err(EngineError::CreateFailed)?;

        let handle = ContainerHandle::new(format!("{}-ctr", name));
        let mut state = self.lock();
        state.handles.insert(handle.clone(), name);
        state.specs.push(spec.clone());
        Ok(handle)
    }

    async fn start_container(&self, handle: &ContainerHandle) -> Result<(), EngineError> {
        let name = self.container_for(handle);
        self.begin(EngineOp::Start, &name)
            .await
            .map_err(EngineError::StartFailed)?;
        Ok(())
    }

    async fn wait_for_healthy(&self, handle: &ContainerHandle) -> Result<(), EngineError> {
        let name = self.container_for(handle);
        self.begin(EngineOp::WaitHealthy, &name)
            .await
            .map_err(EngineError::HealthCheckFailed)?;
        Ok(())
    }

    async fn wait_for_exit(&self, handle: &ContainerHandle) -> Result<i64, EngineError> {
        let name = self.container_for(handle);
        self.begin(EngineOp::WaitExit, &name)
            .await
            .map_err(EngineError::WaitFailed)?;

        let held = self.lock().held_exits.get(&name).cloned();
        if let Some(notify) = held {
            notify.notified().await;
        }

        Ok(self.lock().exit_codes.get(&name).copied().unwrap_or(0))
    }

    async fn stop_container(&self, handle: &ContainerHandle) -> Result<(), EngineError> {
        let name = self.container_for(handle);
        self.begin(EngineOp::Stop, &name)
            .await
            .map_err(EngineError::StopFailed)?;

        // Stopping a held container makes its wait_for_exit return, the way
        // a real engine's stop terminates the process being waited on.
        let mut state = self.lock();
        state.exit_codes.entry(name.clone()).or_insert(137);
        if let Some(notify) = state.held_exits.get(&name) {
            notify.notify_one();
        }
        Ok(())
    }

    async fn remove_container(&self, handle: &ContainerHandle) -> Result<(), EngineError> {
        let name = self.container_for(handle);
        self.begin(EngineOp::Remove, &name)
            .await
            .map_err(EngineError::RemoveFailed)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::container::ImageSource;
    use crate::core::types::ContainerName;

    fn spec(name: &str) -> ContainerCreationSpec {
        let container = Container::new(name, ImageSource::Image("app:latest".to_string()));
        ContainerCreationSpec::for_container(&container, ImageReference::new("app:latest"))
    }

    #[tokio::test]
    async fn test_calls_are_recorded_in_order() {
        let engine = FakeEngine::new();

        let handle = engine.create_container(&spec("db")).await.unwrap();
        engine.start_container(&handle).await.unwrap();

        assert_eq!(
            engine.calls(),
            vec![
                (EngineOp::Create, "db".to_string()),
                (EngineOp::Start, "db".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let engine = FakeEngine::new();
        engine.fail_on(EngineOp::Start, "db", "boom");

        let handle = engine.create_container(&spec("db")).await.unwrap();
        let result = engine.start_container(&handle).await;

        assert!(matches!(result, Err(EngineError::StartFailed(m)) if m == "boom"));
    }

    #[tokio::test]
    async fn test_default_exit_code_is_zero() {
        let engine = FakeEngine::new();

        let handle = engine.create_container(&spec("task")).await.unwrap();
        assert_eq!(engine.wait_for_exit(&handle).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_held_exit_released_by_stop() {
        let engine = Arc::new(FakeEngine::new());
        engine.hold_exit("task");

        let handle = engine.create_container(&spec("task")).await.unwrap();

        let waiter = {
            let engine = Arc::clone(&engine);
            let handle = handle.clone();
            tokio::spawn(async move { engine.wait_for_exit(&handle).await })
        };

        // Give the waiter a chance to block, then stop the container.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        engine.stop_container(&handle).await.unwrap();
        let exit_code = waiter.await.unwrap().unwrap();
        assert_eq!(exit_code, 137);
    }

    #[tokio::test]
    async fn test_release_exit_with_code() {
        let engine = Arc::new(FakeEngine::new());
        engine.hold_exit("task");

        let handle = engine.create_container(&spec("task")).await.unwrap();

        let waiter = {
            let engine = Arc::clone(&engine);
            let handle = handle.clone();
            tokio::spawn(async move { engine.wait_for_exit(&handle).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.release_exit("task", 42);

        assert_eq!(waiter.await.unwrap().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_created_specs_are_recorded() {
        let engine = FakeEngine::new();
        engine.create_container(&spec("db")).await.unwrap();

        let specs = engine.created_specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, ContainerName::new("db"));
    }
}
