// src/engine/registry.rs

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::workflow_runnable::WorkflowExecutionRunnable;
use crate::types::WorkflowInstanceId;

/// Active workflow runnables by instance id.
#[derive(Debug, Default)]
pub struct WorkflowRegistry {
    workflows: RwLock<HashMap<WorkflowInstanceId, Arc<WorkflowExecutionRunnable>>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the runnable previously registered under the same id, if any.
    pub fn register(
        &self,
        workflow: Arc<WorkflowExecutionRunnable>,
    ) -> Option<Arc<WorkflowExecutionRunnable>> {
        self.workflows.write().insert(workflow.id(), workflow)
    }

    pub fn get(&self, id: WorkflowInstanceId) -> Option<Arc<WorkflowExecutionRunnable>> {
        self.workflows.read().get(&id).cloned()
    }

    pub fn remove(&self, id: WorkflowInstanceId) -> Option<Arc<WorkflowExecutionRunnable>> {
        self.workflows.write().remove(&id)
    }

    pub fn contains(&self, id: WorkflowInstanceId) -> bool {
        self.workflows.read().contains_key(&id)
    }

    /// Snapshot of all registered workflows, ordered by id.
    pub fn active_workflows(&self) -> Vec<Arc<WorkflowExecutionRunnable>> {
        let mut workflows: Vec<_> = self.workflows.read().values().cloned().collect();
        workflows.sort_by_key(|w| w.id());
        workflows
    }

    pub fn len(&self) -> usize {
        self.workflows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
