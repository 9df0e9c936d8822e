//! The orchestration loop.
//!
//! A [`TaskRun`] owns one run of one task: the event log, the dispatch
//! queue, and the worker pool. The loop itself is single-threaded: it
//! snapshots the log, derives eligible steps, dispatches the new ones, and
//! waits for the next completion. Step execution and event posting
//! happen concurrently on spawned workers. Nothing is retried; a wedged
//! external operation is the caller's timeout concern.

use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::graph::ContainerGraph;
use crate::engine::ContainerEngine;
use crate::events::log::EventLog;
use crate::events::{EventBus, TaskEvent};
use crate::steps::rules;

use super::executor::StepExecutor;
use super::queue::StepQueue;
use super::state::{RunState, current_state};
use super::user::RunAsCurrentUserProvider;

/// Default number of steps executing concurrently.
const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Buffer size for the step-completion channel.
const COMPLETION_CHANNEL_BUFFER: usize = 64;

/// Final result of a task run.
#[derive(Debug)]
pub struct RunOutcome {
    /// Terminal state: `Finished` if no failure was recorded, `Failed`
    /// otherwise.
    pub state: RunState,
    /// Every failure event recorded during the run, in order.
    pub failures: Vec<TaskEvent>,
    /// The first failure recorded, the one that forced teardown when the
    /// run failed during startup.
    pub primary_failure: Option<TaskEvent>,
    /// The task container's exit code, if it ran to exit.
    pub exit_code: Option<i64>,
    /// Whether the run was cancelled by the user.
    pub cancelled: bool,
}

impl RunOutcome {
    /// Whether the run finished without any recorded failure.
    pub fn success(&self) -> bool {
        self.state == RunState::Finished
    }
}

/// Handle for requesting cancellation of a running task.
#[derive(Clone)]
pub struct RunHandle {
    cancel_tx: mpsc::Sender<()>,
}

impl RunHandle {
    /// Request cancellation. Teardown begins immediately, treating all
    /// running containers as if the task container had exited. Safe to
    /// call more than once; requests after the first are ignored.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.try_send(());
    }
}

/// One run of one task: brings the containers up in dependency order, waits
/// for the task container to exit, and tears everything down in reverse
/// order, best-effort.
pub struct TaskRun {
    graph: Arc<ContainerGraph>,
    log: Arc<EventLog>,
    executor: Arc<StepExecutor>,
    queue: StepQueue,
    semaphore: Arc<Semaphore>,
    cancel_tx: mpsc::Sender<()>,
    cancel_rx: mpsc::Receiver<()>,
}

impl TaskRun {
    /// Create a run over the given graph and collaborators.
    pub fn new(
        graph: ContainerGraph,
        engine: Arc<dyn ContainerEngine>,
        user_provider: RunAsCurrentUserProvider,
        bus: Arc<EventBus>,
    ) -> Self {
        let graph = Arc::new(graph);
        let log = Arc::new(EventLog::new(Arc::clone(&graph), bus));
        let executor = Arc::new(StepExecutor::new(
            Arc::clone(&graph),
            engine,
            Arc::new(user_provider),
        ));
        let (cancel_tx, cancel_rx) = mpsc::channel(1);

        Self {
            graph,
            log,
            executor,
            queue: StepQueue::new(),
            semaphore: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENCY)),
            cancel_tx,
            cancel_rx,
        }
    }

    /// Set the maximum number of steps executing concurrently.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.semaphore = Arc::new(Semaphore::new(max_concurrency));
        self
    }

    /// A handle for cancelling this run.
    pub fn handle(&self) -> RunHandle {
        RunHandle {
            cancel_tx: self.cancel_tx.clone(),
        }
    }

    /// Spawn the run onto the runtime, returning a cancellation handle and
    /// the join handle for its outcome.
    pub fn start(self) -> (RunHandle, JoinHandle<RunOutcome>) {
        let handle = self.handle();
        (handle, tokio::spawn(self.run()))
    }

    /// Drive the run to completion.
    pub async fn run(mut self) -> RunOutcome {
        info!(
            task_container = %self.graph.task_container(),
            containers = self.graph.len(),
            "starting task run"
        );

        let (done_tx, mut done_rx) = mpsc::channel::<()>(COMPLETION_CHANNEL_BUFFER);
        let mut in_flight: usize = 0;
        let mut cancelled = false;
        let mut state = RunState::Starting;

        loop {
            let snapshot = self.log.snapshot();

            let derived_state = current_state(&snapshot, &self.graph);
            if derived_state != state {
                debug!(from = %state, to = %derived_state, "run state changed");
                state = derived_state;
            }

            let new_steps = self
                .queue
                .enqueue_new(rules::eligible_steps(&snapshot, &self.graph));

            for step in new_steps {
                in_flight += 1;

                let executor = Arc::clone(&self.executor);
                let log = Arc::clone(&self.log);
                let semaphore = Arc::clone(&self.semaphore);
                let done_tx = done_tx.clone();

                tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .expect("step semaphore closed");
                    executor.execute(step, &log).await;
                    let _ = done_tx.send(()).await;
                });
            }

            if in_flight == 0 {
                if rules::stop_triggered(&snapshot) {
                    // Quiescent after teardown: the run is over.
                    break;
                }
                // Nothing in flight and nothing derivable before teardown
                // ever started: no progress is possible.
                warn!("no steps in flight and none derivable; ending run");
                break;
            }

            tokio::select! {
                completion = done_rx.recv() => {
                    if completion.is_some() {
                        in_flight -= 1;
                    }
                }
                _ = self.cancel_rx.recv(), if !cancelled => {
                    cancelled = true;
                    info!("cancellation requested");
                    self.log.post_event(TaskEvent::TaskCancelled).await;
                }
            }
        }

        let snapshot = self.log.snapshot();
        let failures: Vec<TaskEvent> = snapshot.failures().into_iter().cloned().collect();
        let exit_code = snapshot.exit_code_of(self.graph.task_container());

        let state = if failures.is_empty() && rules::stop_triggered(&snapshot) {
            RunState::Finished
        } else {
            RunState::Failed
        };

        info!(
            state = %state,
            failures = failures.len(),
            exit_code = ?exit_code,
            "task run ended"
        );

        RunOutcome {
            state,
            primary_failure: failures.first().cloned(),
            failures,
            exit_code,
            cancelled,
        }
    }
}
