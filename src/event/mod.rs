// src/event/mod.rs

//! Workflow and task events.
//!
//! Every change to a running workflow goes through its event queue as an
//! [`Event`]. Events are plain data; the engine looks their [`EventType`] up in
//! a handler table to process them.

pub mod repository;

use std::fmt;

use tokio::time::Instant;

use crate::types::{TaskInstanceId, WorkflowInstanceId};

pub use repository::EventRepository;

/// Operations on a whole workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowOperation {
    Trigger,
    Pause,
    Kill,
}

/// Operations on one task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskOperation {
    Run,
    Retry,
    Failover,
    Pause,
    Kill,
}

/// Execution status reported by a worker or an async logic task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskExecutionStatus {
    Running { host: String },
    Success,
    Failed,
    Paused,
    Killed,
}

/// A status report travelling from an executor back into the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskExecutionReport {
    pub workflow_instance_id: WorkflowInstanceId,
    pub task_instance_id: TaskInstanceId,
    pub status: TaskExecutionStatus,
}

#[derive(Debug, Clone)]
pub enum Event {
    Workflow {
        workflow_instance_id: WorkflowInstanceId,
        operation: WorkflowOperation,
    },
    Task {
        workflow_instance_id: WorkflowInstanceId,
        task_instance_id: TaskInstanceId,
        operation: TaskOperation,
        /// Earliest moment the event may be handled (retry delay).
        fire_at: Option<Instant>,
    },
    TaskReport(TaskExecutionReport),
}

/// Handler-table key of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    WorkflowTrigger,
    WorkflowPause,
    WorkflowKill,
    TaskRun,
    TaskRetry,
    TaskFailover,
    TaskPause,
    TaskKill,
    TaskRunning,
    TaskSuccess,
    TaskFailure,
    TaskPaused,
    TaskKilled,
}

impl Event {
    pub fn workflow(workflow_instance_id: WorkflowInstanceId, operation: WorkflowOperation) -> Self {
        Event::Workflow {
            workflow_instance_id,
            operation,
        }
    }

    pub fn task(
        workflow_instance_id: WorkflowInstanceId,
        task_instance_id: TaskInstanceId,
        operation: TaskOperation,
    ) -> Self {
        Event::Task {
            workflow_instance_id,
            task_instance_id,
            operation,
            fire_at: None,
        }
    }

    pub fn delayed_task(
        workflow_instance_id: WorkflowInstanceId,
        task_instance_id: TaskInstanceId,
        operation: TaskOperation,
        fire_at: Instant,
    ) -> Self {
        Event::Task {
            workflow_instance_id,
            task_instance_id,
            operation,
            fire_at: Some(fire_at),
        }
    }

    pub fn workflow_instance_id(&self) -> WorkflowInstanceId {
        match self {
            Event::Workflow {
                workflow_instance_id,
                ..
            }
            | Event::Task {
                workflow_instance_id,
                ..
            } => *workflow_instance_id,
            Event::TaskReport(report) => report.workflow_instance_id,
        }
    }

    pub fn task_instance_id(&self) -> Option<TaskInstanceId> {
        match self {
            Event::Workflow { .. } => None,
            Event::Task {
                task_instance_id, ..
            } => Some(*task_instance_id),
            Event::TaskReport(report) => Some(report.task_instance_id),
        }
    }

    pub fn event_type(&self) -> EventType {
        match self {
            Event::Workflow { operation, .. } => match operation {
                WorkflowOperation::Trigger => EventType::WorkflowTrigger,
                WorkflowOperation::Pause => EventType::WorkflowPause,
                WorkflowOperation::Kill => EventType::WorkflowKill,
            },
            Event::Task { operation, .. } => match operation {
                TaskOperation::Run => EventType::TaskRun,
                TaskOperation::Retry => EventType::TaskRetry,
                TaskOperation::Failover => EventType::TaskFailover,
                TaskOperation::Pause => EventType::TaskPause,
                TaskOperation::Kill => EventType::TaskKill,
            },
            Event::TaskReport(report) => match report.status {
                TaskExecutionStatus::Running { .. } => EventType::TaskRunning,
                TaskExecutionStatus::Success => EventType::TaskSuccess,
                TaskExecutionStatus::Failed => EventType::TaskFailure,
                TaskExecutionStatus::Paused => EventType::TaskPaused,
                TaskExecutionStatus::Killed => EventType::TaskKilled,
            },
        }
    }

    /// Async events are handled on the firer pool instead of the draining
    /// path, so a delayed retry never blocks the rest of the queue.
    pub fn is_async(&self) -> bool {
        matches!(self.event_type(), EventType::TaskRetry)
    }

    pub fn fire_at(&self) -> Option<Instant> {
        match self {
            Event::Task { fire_at, .. } => *fire_at,
            _ => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.task_instance_id() {
            Some(task) => write!(
                f,
                "{:?}(workflow={}, task={})",
                self.event_type(),
                self.workflow_instance_id(),
                task
            ),
            None => write!(
                f,
                "{:?}(workflow={})",
                self.event_type(),
                self.workflow_instance_id()
            ),
        }
    }
}
