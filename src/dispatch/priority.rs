// src/dispatch/priority.rs

use std::cmp::Ordering;

use tokio::time::Instant;

use crate::types::{Code, Priority, TaskInstanceId, TaskType, WorkflowInstanceId};

/// Everything a worker needs to run one task instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskExecuteRequest {
    pub workflow_instance_id: WorkflowInstanceId,
    pub task_instance_id: TaskInstanceId,
    pub task_code: Code,
    pub task_name: String,
    pub task_type: TaskType,
    pub command: Option<String>,
    pub worker_group: String,
}

/// A queued task instance.
///
/// Ordering is by `(workflow priority, workflow instance id, task priority,
/// task instance id, worker group)` and then by insertion sequence; the
/// smallest value dispatches first.
#[derive(Debug, Clone)]
pub struct TaskPriority {
    pub workflow_priority: Priority,
    pub workflow_instance_id: WorkflowInstanceId,
    pub task_priority: Priority,
    pub task_instance_id: TaskInstanceId,
    pub worker_group: String,
    pub request: TaskExecuteRequest,
    /// Failed dispatch attempts so far.
    pub failed_times: u32,
    pub last_attempt: Option<Instant>,
    pub(crate) sequence: u64,
}

impl TaskPriority {
    pub fn new(
        workflow_priority: Priority,
        task_priority: Priority,
        request: TaskExecuteRequest,
    ) -> Self {
        Self {
            workflow_priority,
            workflow_instance_id: request.workflow_instance_id,
            task_priority,
            task_instance_id: request.task_instance_id,
            worker_group: request.worker_group.clone(),
            request,
            failed_times: 0,
            last_attempt: None,
            sequence: 0,
        }
    }

    fn key(&self) -> (Priority, WorkflowInstanceId, Priority, TaskInstanceId, &str, u64) {
        (
            self.workflow_priority,
            self.workflow_instance_id,
            self.task_priority,
            self.task_instance_id,
            self.worker_group.as_str(),
            self.sequence,
        )
    }
}

impl PartialEq for TaskPriority {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for TaskPriority {}

impl PartialOrd for TaskPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TaskPriority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}
