// src/dag/execution.rs

//! Per-instance execution state layered over the immutable DAG.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::dag::WorkflowDag;
use crate::engine::TaskExecutionRunnable;
use crate::types::{TaskInstanceId, TaskState, WorkflowState};

/// Result of asking whether a node may be triggered now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Triggerability {
    /// The node was reserved for triggering by this call.
    Ready { skip: bool },
    UnknownTask,
    AlreadyTriggered,
    /// A predecessor has not finished successfully yet.
    WaitingOn(String),
}

/// The DAG of one workflow instance plus everything that changes while it
/// runs: which nodes were triggered, how finished nodes ended, and the active
/// task runnables.
///
/// Invariant: at most one active runnable per task-instance id and per task
/// name. Retry and failover replace the previous runnable of the same task.
#[derive(Debug)]
pub struct WorkflowExecutionGraph {
    dag: WorkflowDag,
    triggered: HashSet<String>,
    outcomes: HashMap<String, TaskState>,
    finished_instances: HashMap<TaskInstanceId, String>,
    active_by_name: HashMap<String, Arc<TaskExecutionRunnable>>,
    active_by_id: HashMap<TaskInstanceId, Arc<TaskExecutionRunnable>>,
}

impl WorkflowExecutionGraph {
    pub fn new(dag: WorkflowDag) -> Self {
        Self {
            dag,
            triggered: HashSet::new(),
            outcomes: HashMap::new(),
            finished_instances: HashMap::new(),
            active_by_name: HashMap::new(),
            active_by_id: HashMap::new(),
        }
    }

    pub fn dag(&self) -> &WorkflowDag {
        &self.dag
    }

    pub fn dag_mut(&mut self) -> &mut WorkflowDag {
        &mut self.dag
    }

    /// Check whether `name` may be triggered and, if so, reserve it so that no
    /// concurrent caller can trigger it a second time.
    pub fn try_reserve_trigger(&mut self, name: &str) -> Triggerability {
        let Some(node) = self.dag.node(name) else {
            return Triggerability::UnknownTask;
        };
        if self.triggered.contains(name) {
            return Triggerability::AlreadyTriggered;
        }
        if let Some(pending) = node
            .predecessors
            .iter()
            .find(|p| self.outcomes.get(p.as_str()) != Some(&TaskState::Success))
        {
            return Triggerability::WaitingOn(pending.clone());
        }
        let skip = node.skip;
        self.triggered.insert(name.to_string());
        Triggerability::Ready { skip }
    }

    /// Undo a reservation whose runnable could not be created.
    pub fn release_trigger(&mut self, name: &str) {
        self.triggered.remove(name);
    }

    pub fn store_runnable(&mut self, runnable: Arc<TaskExecutionRunnable>) {
        let name = runnable.task_name().to_string();
        if let Some(previous) = self.active_by_name.remove(&name) {
            if previous.task_instance_id() != runnable.task_instance_id() {
                debug!(
                    task = %name,
                    previous = previous.task_instance_id(),
                    replacement = runnable.task_instance_id(),
                    "replacing active runnable"
                );
            }
            self.active_by_id.remove(&previous.task_instance_id());
        }
        self.triggered.insert(name.clone());
        self.active_by_id
            .insert(runnable.task_instance_id(), Arc::clone(&runnable));
        self.active_by_name.insert(name, runnable);
    }

    pub fn runnable(&self, id: TaskInstanceId) -> Option<Arc<TaskExecutionRunnable>> {
        self.active_by_id.get(&id).cloned()
    }

    pub fn runnable_by_name(&self, name: &str) -> Option<Arc<TaskExecutionRunnable>> {
        self.active_by_name.get(name).cloned()
    }

    /// Active runnables ordered by task instance id.
    pub fn active_runnables(&self) -> Vec<Arc<TaskExecutionRunnable>> {
        let mut active: Vec<_> = self.active_by_id.values().cloned().collect();
        active.sort_by_key(|r| r.task_instance_id());
        active
    }

    pub fn has_active(&self) -> bool {
        !self.active_by_id.is_empty()
    }

    /// Remove an active runnable and record how its node ended.
    pub fn finish_runnable(
        &mut self,
        id: TaskInstanceId,
        state: TaskState,
    ) -> Option<Arc<TaskExecutionRunnable>> {
        let runnable = self.active_by_id.remove(&id)?;
        let name = runnable.task_name().to_string();
        if self
            .active_by_name
            .get(&name)
            .is_some_and(|r| r.task_instance_id() == id)
        {
            self.active_by_name.remove(&name);
        }
        self.finished_instances.insert(id, name.clone());
        self.outcomes.insert(name, state);
        Some(runnable)
    }

    /// Record a node outcome without a runnable (skipped or restored nodes).
    pub fn mark_node_finished(&mut self, name: &str, state: TaskState) {
        self.triggered.insert(name.to_string());
        self.outcomes.insert(name.to_string(), state);
    }

    pub fn outcome(&self, name: &str) -> Option<TaskState> {
        self.outcomes.get(name).copied()
    }

    pub fn finished_task_name(&self, id: TaskInstanceId) -> Option<&str> {
        self.finished_instances.get(&id).map(|s| s.as_str())
    }

    /// Terminal state of a running workflow once nothing is active anymore.
    pub fn completed_state(&self) -> WorkflowState {
        let any = |s: TaskState| self.outcomes.values().any(|o| *o == s);
        if any(TaskState::Failed) {
            WorkflowState::Failed
        } else if any(TaskState::Killed) {
            WorkflowState::Stop
        } else if any(TaskState::Paused) {
            WorkflowState::Paused
        } else if self
            .dag
            .task_names()
            .all(|name| self.outcomes.get(name) == Some(&TaskState::Success))
        {
            WorkflowState::Success
        } else {
            WorkflowState::Failed
        }
    }
}
