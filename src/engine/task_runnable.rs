// src/engine/task_runnable.rs

use std::sync::Arc;

use chrono::NaiveDateTime;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use super::workflow_runnable::WorkflowExecutionContext;
use crate::errors::Result;
use crate::store::{InstanceStore, TaskDefinition, TaskInstance, local_now};
use crate::types::{Code, TaskInstanceId, TaskState, WorkflowInstanceId};

/// In-memory handle of one task instance while its workflow runs.
#[derive(Debug)]
pub struct TaskExecutionRunnable {
    task_instance_id: TaskInstanceId,
    workflow_instance_id: WorkflowInstanceId,
    definition: Arc<TaskDefinition>,
    state: Mutex<TaskState>,
    host: Mutex<Option<String>>,
    retry_times: u32,
    failover: bool,
    submit_time: NaiveDateTime,
    cancel: watch::Sender<bool>,
}

impl TaskExecutionRunnable {
    fn from_instance(instance: &TaskInstance, definition: Arc<TaskDefinition>) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            task_instance_id: instance.id,
            workflow_instance_id: instance.workflow_instance_id,
            definition,
            state: Mutex::new(instance.state),
            host: Mutex::new(instance.host.clone()),
            retry_times: instance.retry_times,
            failover: instance.failover,
            submit_time: instance.submit_time,
            cancel,
        }
    }

    pub fn task_instance_id(&self) -> TaskInstanceId {
        self.task_instance_id
    }

    pub fn workflow_instance_id(&self) -> WorkflowInstanceId {
        self.workflow_instance_id
    }

    pub fn task_name(&self) -> &str {
        &self.definition.name
    }

    pub fn task_code(&self) -> Code {
        self.definition.code
    }

    pub fn definition(&self) -> &TaskDefinition {
        &self.definition
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TaskState) {
        *self.state.lock() = state;
    }

    pub fn host(&self) -> Option<String> {
        self.host.lock().clone()
    }

    pub fn set_host(&self, host: &str) {
        *self.host.lock() = Some(host.to_string());
    }

    pub fn retry_times(&self) -> u32 {
        self.retry_times
    }

    pub fn can_retry(&self) -> bool {
        self.retry_times < self.definition.max_retry_times
    }

    pub fn is_failover(&self) -> bool {
        self.failover
    }

    pub fn submit_time(&self) -> NaiveDateTime {
        self.submit_time
    }

    /// Stop whatever polls this task's completion.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn cancellation(&self) -> watch::Receiver<bool> {
        self.cancel.subscribe()
    }
}

/// Creates task runnables and the task instances backing them.
#[derive(Clone)]
pub struct TaskExecutionRunnableFactory {
    store: Arc<dyn InstanceStore>,
}

impl TaskExecutionRunnableFactory {
    pub fn new(store: Arc<dyn InstanceStore>) -> Self {
        Self { store }
    }

    /// First run of a task: persists a SUBMITTED task instance.
    pub fn create(
        &self,
        workflow: &WorkflowExecutionContext,
        definition: &TaskDefinition,
    ) -> Result<Arc<TaskExecutionRunnable>> {
        self.persist(workflow, Arc::new(definition.clone()), 0, false)
    }

    /// Next attempt after a failure, with the retry count incremented.
    pub fn create_retry(
        &self,
        workflow: &WorkflowExecutionContext,
        previous: &TaskExecutionRunnable,
    ) -> Result<Arc<TaskExecutionRunnable>> {
        self.persist(
            workflow,
            Arc::clone(&previous.definition),
            previous.retry_times + 1,
            false,
        )
    }

    /// Replacement of an instance whose executor was lost. The previous
    /// instance is marked NEED_FAILOVER.
    pub fn create_failover(
        &self,
        workflow: &WorkflowExecutionContext,
        previous: &TaskExecutionRunnable,
    ) -> Result<Arc<TaskExecutionRunnable>> {
        let replacement = self.persist(
            workflow,
            Arc::clone(&previous.definition),
            previous.retry_times,
            true,
        )?;
        let mut expected = TaskState::UNFINISHED.to_vec();
        expected.push(TaskState::NeedFailover);
        self.store.compare_and_set_task_state(
            previous.task_instance_id,
            &expected,
            TaskState::NeedFailover,
        )?;
        previous.set_state(TaskState::NeedFailover);
        previous.cancel();
        Ok(replacement)
    }

    /// Wrap an already persisted instance (workflow failover).
    pub fn restore(
        &self,
        instance: &TaskInstance,
        definition: &TaskDefinition,
    ) -> Arc<TaskExecutionRunnable> {
        Arc::new(TaskExecutionRunnable::from_instance(
            instance,
            Arc::new(definition.clone()),
        ))
    }

    fn persist(
        &self,
        workflow: &WorkflowExecutionContext,
        definition: Arc<TaskDefinition>,
        retry_times: u32,
        failover: bool,
    ) -> Result<Arc<TaskExecutionRunnable>> {
        let instance = self.store.insert_task_instance(TaskInstance {
            id: 0,
            workflow_instance_id: workflow.workflow_instance_id(),
            task_code: definition.code,
            name: definition.name.clone(),
            task_type: definition.task_type,
            state: TaskState::Submitted,
            priority: definition.priority,
            worker_group: definition.worker_group.clone(),
            host: None,
            retry_times,
            max_retry_times: definition.max_retry_times,
            failover,
            submit_time: local_now(),
            start_time: None,
            end_time: None,
        })?;
        debug!(
            workflow_instance_id = instance.workflow_instance_id,
            task_instance_id = instance.id,
            task = %instance.name,
            retry_times,
            failover,
            "task instance submitted"
        );
        Ok(Arc::new(TaskExecutionRunnable::from_instance(
            &instance, definition,
        )))
    }
}
