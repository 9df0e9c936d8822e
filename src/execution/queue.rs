//! Step queue: dispatch bookkeeping for the orchestration loop.
//!
//! Derivation rules are pure and return every step whose preconditions
//! hold, including steps already running or finished. The queue remembers
//! what has been dispatched so re-deriving after each batch of completions
//! never double-enqueues anything.

use std::collections::HashSet;

use crate::steps::Step;

/// Tracks which steps have already been dispatched in this run.
#[derive(Default)]
pub struct StepQueue {
    dispatched: HashSet<Step>,
}

impl StepQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter the given steps down to those not yet dispatched, marking
    /// them dispatched in the process.
    pub fn enqueue_new(&mut self, eligible: Vec<Step>) -> Vec<Step> {
        eligible
            .into_iter()
            .filter(|step| self.dispatched.insert(step.clone()))
            .collect()
    }

    /// Whether a step has already been dispatched.
    pub fn has_dispatched(&self, step: &Step) -> bool {
        self.dispatched.contains(step)
    }

    /// Number of steps dispatched so far.
    pub fn dispatched_count(&self) -> usize {
        self.dispatched.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::container::{Container, ImageSource};
    use crate::core::graph::ContainerGraph;
    use crate::core::types::ContainerName;
    use crate::events::log::LogSnapshot;
    use crate::steps::rules;

    fn build_step(name: &str) -> Step {
        Step::BuildImage {
            container: ContainerName::new(name),
        }
    }

    #[test]
    fn test_new_steps_pass_through_once() {
        let mut queue = StepQueue::new();

        let first = queue.enqueue_new(vec![build_step("a"), build_step("b")]);
        assert_eq!(first.len(), 2);

        let second = queue.enqueue_new(vec![build_step("a"), build_step("b")]);
        assert!(second.is_empty());

        assert_eq!(queue.dispatched_count(), 2);
    }

    #[test]
    fn test_partial_overlap_only_enqueues_fresh_steps() {
        let mut queue = StepQueue::new();

        queue.enqueue_new(vec![build_step("a")]);
        let second = queue.enqueue_new(vec![build_step("a"), build_step("b")]);

        assert_eq!(second, vec![build_step("b")]);
    }

    #[test]
    fn test_rederiving_unchanged_snapshot_enqueues_nothing() {
        let graph = ContainerGraph::build(vec![Container::new(
            "task",
            ImageSource::Image("app:latest".to_string()),
        )])
        .unwrap();
        let snapshot = LogSnapshot::empty();
        let mut queue = StepQueue::new();

        let first = queue.enqueue_new(rules::eligible_steps(&snapshot, &graph));
        assert!(!first.is_empty());

        let second = queue.enqueue_new(rules::eligible_steps(&snapshot, &graph));
        assert!(second.is_empty());
    }
}
