// src/store/mod.rs

//! Persistence collaborator.
//!
//! The engine never talks to a database directly; it goes through the
//! [`InstanceStore`] trait. Every method is a single atomic operation and
//! updates are idempotent (compare-and-set on task state, plain overwrite of
//! workflow state), so concurrent writers (event handlers, the
//! dispatch consumer, failover) cannot leave a record half-updated.
//!
//! [`MemoryStore`] is the in-process implementation used by the CLI and the
//! tests. It can simulate an outage to exercise the transient-failure path.

pub mod memory;
pub mod model;

use chrono::NaiveDateTime;

use crate::errors::Result;
use crate::types::{Code, TaskInstanceId, TaskState, WorkflowInstanceId, WorkflowState};

pub use memory::MemoryStore;
pub use model::{
    ProjectDefinition, TaskDefinition, TaskInstance, WorkflowDefinition, WorkflowInstance,
    local_now,
};

/// Task/workflow instance store with id-based CRUD and code-based batch
/// lookups. Implementations report connectivity problems as
/// [`DagflowError::StoreUnavailable`](crate::errors::DagflowError::StoreUnavailable).
pub trait InstanceStore: Send + Sync {
    fn query_projects_by_codes(&self, codes: &[Code]) -> Result<Vec<ProjectDefinition>>;

    fn query_workflow_definitions_by_codes(&self, codes: &[Code])
    -> Result<Vec<WorkflowDefinition>>;

    fn query_task_definitions_by_codes(&self, codes: &[Code]) -> Result<Vec<TaskDefinition>>;

    /// Persist a new workflow instance; the store assigns the id.
    fn insert_workflow_instance(&self, instance: WorkflowInstance) -> Result<WorkflowInstance>;

    fn workflow_instance(&self, id: WorkflowInstanceId) -> Result<Option<WorkflowInstance>>;

    /// Set the state of a workflow instance, stamping the end time when the
    /// new state is finished.
    fn update_workflow_state(&self, id: WorkflowInstanceId, state: WorkflowState) -> Result<()>;

    /// Latest instance of a definition whose business time falls inside
    /// `[start, end)`, restricted to the given test flag.
    fn latest_workflow_instance_between(
        &self,
        definition_code: Code,
        start: NaiveDateTime,
        end: NaiveDateTime,
        test_flag: bool,
    ) -> Result<Option<WorkflowInstance>>;

    /// Persist a new task instance; the store assigns the id.
    fn insert_task_instance(&self, instance: TaskInstance) -> Result<TaskInstance>;

    fn task_instance(&self, id: TaskInstanceId) -> Result<Option<TaskInstance>>;

    /// Move a task instance to `new` only if its current state is one of
    /// `expected`. Returns whether the update happened.
    fn compare_and_set_task_state(
        &self,
        id: TaskInstanceId,
        expected: &[TaskState],
        new: TaskState,
    ) -> Result<bool>;

    fn set_task_host(&self, id: TaskInstanceId, host: &str) -> Result<()>;

    fn task_instances_of_workflow(&self, workflow_id: WorkflowInstanceId)
    -> Result<Vec<TaskInstance>>;

    fn latest_task_instance_by_code(
        &self,
        workflow_id: WorkflowInstanceId,
        task_code: Code,
    ) -> Result<Option<TaskInstance>>;
}
