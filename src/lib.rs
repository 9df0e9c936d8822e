//! caravan - a dependency-ordered container task runner.
//!
//! A task is a set of interdependent containers: dependencies are brought
//! up first (in parallel where independent), the task container runs to
//! exit, and everything is torn down in reverse order, best-effort, even
//! when parts of the run fail.
//!
//! The engine is event-sourced: an append-only [`events::log::EventLog`]
//! records every completed operation, pure rules in [`steps::rules`] derive
//! the next eligible steps from it, and the [`execution::run::TaskRun`]
//! loop dispatches those steps concurrently until the run reaches a
//! terminal state.

pub mod config;
pub mod core;
pub mod engine;
pub mod events;
pub mod execution;
pub mod steps;
pub mod testing;

pub use config::{ConfigError, TaskConfig, load_task_from_file};
pub use core::container::{Container, HealthCheck, ImageSource, RunAsUser, VolumeMount};
pub use core::graph::{ContainerGraph, ContainerNode, GraphError};
pub use core::types::{ContainerHandle, ContainerName, ImageReference};
pub use engine::cli::CliEngine;
pub use engine::{ContainerCreationSpec, ContainerEngine, EngineError, UserAndGroup};
pub use events::log::{EventLog, LogSnapshot};
pub use events::{EventBus, EventHandler, EventKind, TaskEvent};
pub use execution::run::{RunHandle, RunOutcome, TaskRun};
pub use execution::state::RunState;
pub use execution::user::{RunAsCurrentUserProvider, SystemInfo};
pub use steps::Step;
