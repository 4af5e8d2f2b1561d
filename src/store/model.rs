// src/store/model.rs

//! Persisted definition and instance records.

use std::time::Duration;

use chrono::NaiveDateTime;

use crate::dependent::DependentParameters;
use crate::types::{
    Code, Priority, TaskInstanceId, TaskState, TaskType, WorkflowInstanceId, WorkflowState,
};

/// Wall-clock "now" in the engine's local time zone.
pub fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDefinition {
    pub code: Code,
    pub name: String,
}

/// One task of a workflow definition.
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    pub code: Code,
    pub name: String,
    pub task_type: TaskType,
    /// Command line for worker tasks.
    pub command: Option<String>,
    /// Direct predecessors by task name.
    pub after: Vec<String>,
    pub skip: bool,
    pub priority: Priority,
    pub worker_group: String,
    pub max_retry_times: u32,
    pub retry_interval: Duration,
    pub dependence: Option<DependentParameters>,
}

impl TaskDefinition {
    /// A shell task with defaults for everything but name, code and command.
    pub fn shell(code: Code, name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            code,
            name: name.into(),
            task_type: TaskType::Shell,
            command: Some(command.into()),
            after: Vec::new(),
            skip: false,
            priority: Priority::Medium,
            worker_group: "default".to_string(),
            max_retry_times: 0,
            retry_interval: Duration::from_secs(1),
            dependence: None,
        }
    }
}

/// Immutable, versioned DAG definition produced by the definition layer.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub code: Code,
    pub project_code: Code,
    pub name: String,
    pub version: u32,
    pub tasks: Vec<TaskDefinition>,
}

impl WorkflowDefinition {
    pub fn task(&self, name: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowInstance {
    pub id: WorkflowInstanceId,
    pub name: String,
    pub definition_code: Code,
    pub project_code: Code,
    pub state: WorkflowState,
    pub priority: Priority,
    pub schedule_time: Option<NaiveDateTime>,
    pub start_time: NaiveDateTime,
    pub end_time: Option<NaiveDateTime>,
    pub test_flag: bool,
}

impl WorkflowInstance {
    /// The date dependent tasks resolve against: the schedule time when the
    /// instance was scheduled, else the time it started.
    pub fn business_time(&self) -> NaiveDateTime {
        self.schedule_time.unwrap_or(self.start_time)
    }
}

#[derive(Debug, Clone)]
pub struct TaskInstance {
    pub id: TaskInstanceId,
    pub workflow_instance_id: WorkflowInstanceId,
    pub task_code: Code,
    pub name: String,
    pub task_type: TaskType,
    pub state: TaskState,
    pub priority: Priority,
    pub worker_group: String,
    pub host: Option<String>,
    pub retry_times: u32,
    pub max_retry_times: u32,
    pub failover: bool,
    pub submit_time: NaiveDateTime,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
}
