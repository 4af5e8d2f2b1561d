use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::NaiveDateTime;
use parking_lot::Mutex;
use dagflow::errors::{DagflowError, Result};
use dagflow::store::{
    InstanceStore, MemoryStore, ProjectDefinition, TaskDefinition, TaskInstance,
    WorkflowDefinition, WorkflowInstance,
};
use dagflow::types::{Code, TaskInstanceId, TaskState, WorkflowInstanceId, WorkflowState};

/// An [`InstanceStore`] over a shared [`MemoryStore`] with scripted faults:
/// - a global outage switch that counts the calls it rejected
/// - a number of task-instance inserts to fail
/// - a number of task-state transitions to fail, per target state
/// - an artificial insert latency, with the peak number of concurrent
///   inserts recorded
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    failing: AtomicBool,
    rejected: AtomicUsize,
    insert_failures: AtomicUsize,
    transition_failures: Mutex<HashMap<TaskState, usize>>,
    insert_delay: Mutex<Duration>,
    inserts_in_flight: AtomicUsize,
    peak_inserts_in_flight: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
            rejected: AtomicUsize::new(0),
            insert_failures: AtomicUsize::new(0),
            transition_failures: Mutex::new(HashMap::new()),
            insert_delay: Mutex::new(Duration::ZERO),
            inserts_in_flight: AtomicUsize::new(0),
            peak_inserts_in_flight: AtomicUsize::new(0),
        }
    }

    /// Fail every call until switched off again.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Calls rejected while failing.
    pub fn rejected_calls(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    pub fn fail_task_inserts(&self, times: usize) {
        self.insert_failures.store(times, Ordering::SeqCst);
    }

    pub fn fail_transitions_to(&self, state: TaskState, times: usize) {
        self.transition_failures.lock().insert(state, times);
    }

    /// Block the calling thread this long inside every task insert.
    pub fn set_insert_delay(&self, delay: Duration) {
        *self.insert_delay.lock() = delay;
    }

    pub fn peak_inserts_in_flight(&self) -> usize {
        self.peak_inserts_in_flight.load(Ordering::SeqCst)
    }

    fn check(&self, op: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(unavailable(op));
        }
        Ok(())
    }
}

fn unavailable(op: &str) -> DagflowError {
    DagflowError::StoreUnavailable(format!("scripted failure in {op}"))
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl InstanceStore for FlakyStore {
    fn query_projects_by_codes(&self, codes: &[Code]) -> Result<Vec<ProjectDefinition>> {
        self.check("query_projects_by_codes")?;
        self.inner.query_projects_by_codes(codes)
    }

    fn query_workflow_definitions_by_codes(
        &self,
        codes: &[Code],
    ) -> Result<Vec<WorkflowDefinition>> {
        self.check("query_workflow_definitions_by_codes")?;
        self.inner.query_workflow_definitions_by_codes(codes)
    }

    fn query_task_definitions_by_codes(&self, codes: &[Code]) -> Result<Vec<TaskDefinition>> {
        self.check("query_task_definitions_by_codes")?;
        self.inner.query_task_definitions_by_codes(codes)
    }

    fn insert_workflow_instance(&self, instance: WorkflowInstance) -> Result<WorkflowInstance> {
        self.check("insert_workflow_instance")?;
        self.inner.insert_workflow_instance(instance)
    }

    fn workflow_instance(&self, id: WorkflowInstanceId) -> Result<Option<WorkflowInstance>> {
        self.check("workflow_instance")?;
        self.inner.workflow_instance(id)
    }

    fn update_workflow_state(&self, id: WorkflowInstanceId, state: WorkflowState) -> Result<()> {
        self.check("update_workflow_state")?;
        self.inner.update_workflow_state(id, state)
    }

    fn latest_workflow_instance_between(
        &self,
        definition_code: Code,
        start: NaiveDateTime,
        end: NaiveDateTime,
        test_flag: bool,
    ) -> Result<Option<WorkflowInstance>> {
        self.check("latest_workflow_instance_between")?;
        self.inner
            .latest_workflow_instance_between(definition_code, start, end, test_flag)
    }

    fn insert_task_instance(&self, instance: TaskInstance) -> Result<TaskInstance> {
        self.check("insert_task_instance")?;
        if take_one(&self.insert_failures) {
            return Err(unavailable("insert_task_instance"));
        }

        let in_flight = self.inserts_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_inserts_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        let delay = *self.insert_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let inserted = self.inner.insert_task_instance(instance);
        self.inserts_in_flight.fetch_sub(1, Ordering::SeqCst);
        inserted
    }

    fn task_instance(&self, id: TaskInstanceId) -> Result<Option<TaskInstance>> {
        self.check("task_instance")?;
        self.inner.task_instance(id)
    }

    fn compare_and_set_task_state(
        &self,
        id: TaskInstanceId,
        expected: &[TaskState],
        new: TaskState,
    ) -> Result<bool> {
        self.check("compare_and_set_task_state")?;
        {
            let mut failures = self.transition_failures.lock();
            if let Some(left) = failures.get_mut(&new).filter(|n| **n > 0) {
                *left -= 1;
                return Err(unavailable("compare_and_set_task_state"));
            }
        }
        self.inner.compare_and_set_task_state(id, expected, new)
    }

    fn set_task_host(&self, id: TaskInstanceId, host: &str) -> Result<()> {
        self.check("set_task_host")?;
        self.inner.set_task_host(id, host)
    }

    fn task_instances_of_workflow(
        &self,
        workflow_id: WorkflowInstanceId,
    ) -> Result<Vec<TaskInstance>> {
        self.check("task_instances_of_workflow")?;
        self.inner.task_instances_of_workflow(workflow_id)
    }

    fn latest_task_instance_by_code(
        &self,
        workflow_id: WorkflowInstanceId,
        task_code: Code,
    ) -> Result<Option<TaskInstance>> {
        self.check("latest_task_instance_by_code")?;
        self.inner.latest_task_instance_by_code(workflow_id, task_code)
    }
}
