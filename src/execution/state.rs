//! Run state machine.
//!
//! The state is never stored: it is recomputed from the event log on every
//! pass of the orchestration loop, so concurrent step completions can never
//! leave it stale. The loop itself assigns the terminal states when it
//! reaches quiescence.

use std::fmt;

use crate::core::graph::ContainerGraph;
use crate::events::EventKind;
use crate::events::log::LogSnapshot;
use crate::steps::rules;

/// Lifecycle state of one task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Bringing up dependency-ordered containers.
    Starting,
    /// The task container is active and its dependencies are up.
    Running,
    /// Tearing down in reverse dependency order.
    Stopping,
    /// The run completed without any recorded failure.
    Finished,
    /// The run recorded at least one failure.
    Failed,
}

impl RunState {
    /// Whether no further steps will be derived in this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Finished | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Starting => "starting",
            RunState::Running => "running",
            RunState::Stopping => "stopping",
            RunState::Finished => "finished",
            RunState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Derive the current non-terminal state from the log.
pub fn current_state(snapshot: &LogSnapshot, graph: &ContainerGraph) -> RunState {
    if rules::stop_triggered(snapshot) {
        RunState::Stopping
    } else if snapshot.has(EventKind::ContainerStarted, graph.task_container()) {
        RunState::Running
    } else {
        RunState::Starting
    }
}
