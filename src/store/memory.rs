// src/store/memory.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDateTime;
use parking_lot::Mutex;
use tracing::debug;

use super::model::{
    ProjectDefinition, TaskDefinition, TaskInstance, WorkflowDefinition, WorkflowInstance,
    local_now,
};
use super::InstanceStore;
use crate::errors::{DagflowError, Result};
use crate::types::{Code, TaskInstanceId, TaskState, WorkflowInstanceId, WorkflowState};

#[derive(Debug, Default)]
struct Tables {
    projects: HashMap<Code, ProjectDefinition>,
    workflow_definitions: HashMap<Code, WorkflowDefinition>,
    task_definitions: HashMap<Code, TaskDefinition>,
    workflow_instances: BTreeMap<WorkflowInstanceId, WorkflowInstance>,
    task_instances: BTreeMap<TaskInstanceId, TaskInstance>,
    next_workflow_id: WorkflowInstanceId,
    next_task_id: TaskInstanceId,
}

/// In-memory [`InstanceStore`].
///
/// All tables live behind a single lock, so each trait call is atomic.
/// `set_available(false)` makes every call fail with `StoreUnavailable`.
#[derive(Debug)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables {
                next_workflow_id: 1,
                next_task_id: 1,
                ..Tables::default()
            }),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle simulated connectivity.
    pub fn set_available(&self, available: bool) {
        debug!(available, "memory store availability changed");
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn register_project(&self, project: ProjectDefinition) {
        self.tables.lock().projects.insert(project.code, project);
    }

    /// Register a workflow definition and index its task definitions.
    pub fn register_workflow_definition(&self, definition: WorkflowDefinition) {
        let mut tables = self.tables.lock();
        for task in &definition.tasks {
            tables.task_definitions.insert(task.code, task.clone());
        }
        tables
            .workflow_definitions
            .insert(definition.code, definition);
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DagflowError::StoreUnavailable(
                "memory store marked unavailable".to_string(),
            ))
        }
    }
}

impl InstanceStore for MemoryStore {
    fn query_projects_by_codes(&self, codes: &[Code]) -> Result<Vec<ProjectDefinition>> {
        self.check_available()?;
        let tables = self.tables.lock();
        Ok(codes
            .iter()
            .filter_map(|c| tables.projects.get(c).cloned())
            .collect())
    }

    fn query_workflow_definitions_by_codes(
        &self,
        codes: &[Code],
    ) -> Result<Vec<WorkflowDefinition>> {
        self.check_available()?;
        let tables = self.tables.lock();
        Ok(codes
            .iter()
            .filter_map(|c| tables.workflow_definitions.get(c).cloned())
            .collect())
    }

    fn query_task_definitions_by_codes(&self, codes: &[Code]) -> Result<Vec<TaskDefinition>> {
        self.check_available()?;
        let tables = self.tables.lock();
        Ok(codes
            .iter()
            .filter_map(|c| tables.task_definitions.get(c).cloned())
            .collect())
    }

    fn insert_workflow_instance(&self, mut instance: WorkflowInstance) -> Result<WorkflowInstance> {
        self.check_available()?;
        let mut tables = self.tables.lock();
        instance.id = tables.next_workflow_id;
        tables.next_workflow_id += 1;
        tables
            .workflow_instances
            .insert(instance.id, instance.clone());
        Ok(instance)
    }

    fn workflow_instance(&self, id: WorkflowInstanceId) -> Result<Option<WorkflowInstance>> {
        self.check_available()?;
        Ok(self.tables.lock().workflow_instances.get(&id).cloned())
    }

    fn update_workflow_state(&self, id: WorkflowInstanceId, state: WorkflowState) -> Result<()> {
        self.check_available()?;
        let mut tables = self.tables.lock();
        let instance = tables
            .workflow_instances
            .get_mut(&id)
            .ok_or(DagflowError::WorkflowNotFound(id))?;
        instance.state = state;
        if state.is_finished() && instance.end_time.is_none() {
            instance.end_time = Some(local_now());
        }
        Ok(())
    }

    fn latest_workflow_instance_between(
        &self,
        definition_code: Code,
        start: NaiveDateTime,
        end: NaiveDateTime,
        test_flag: bool,
    ) -> Result<Option<WorkflowInstance>> {
        self.check_available()?;
        let tables = self.tables.lock();
        Ok(tables
            .workflow_instances
            .values()
            .rev()
            .find(|w| {
                let t = w.business_time();
                w.definition_code == definition_code
                    && w.test_flag == test_flag
                    && t >= start
                    && t < end
            })
            .cloned())
    }

    fn insert_task_instance(&self, mut instance: TaskInstance) -> Result<TaskInstance> {
        self.check_available()?;
        let mut tables = self.tables.lock();
        instance.id = tables.next_task_id;
        tables.next_task_id += 1;
        tables.task_instances.insert(instance.id, instance.clone());
        Ok(instance)
    }

    fn task_instance(&self, id: TaskInstanceId) -> Result<Option<TaskInstance>> {
        self.check_available()?;
        Ok(self.tables.lock().task_instances.get(&id).cloned())
    }

    fn compare_and_set_task_state(
        &self,
        id: TaskInstanceId,
        expected: &[TaskState],
        new: TaskState,
    ) -> Result<bool> {
        self.check_available()?;
        let mut tables = self.tables.lock();
        let Some(instance) = tables.task_instances.get_mut(&id) else {
            return Ok(false);
        };
        if !expected.contains(&instance.state) {
            return Ok(false);
        }
        instance.state = new;
        if new == TaskState::Running && instance.start_time.is_none() {
            instance.start_time = Some(local_now());
        }
        if new.is_finished() {
            instance.end_time = Some(local_now());
        }
        Ok(true)
    }

    fn set_task_host(&self, id: TaskInstanceId, host: &str) -> Result<()> {
        self.check_available()?;
        if let Some(instance) = self.tables.lock().task_instances.get_mut(&id) {
            instance.host = Some(host.to_string());
        }
        Ok(())
    }

    fn task_instances_of_workflow(
        &self,
        workflow_id: WorkflowInstanceId,
    ) -> Result<Vec<TaskInstance>> {
        self.check_available()?;
        let tables = self.tables.lock();
        Ok(tables
            .task_instances
            .values()
            .filter(|t| t.workflow_instance_id == workflow_id)
            .cloned()
            .collect())
    }

    fn latest_task_instance_by_code(
        &self,
        workflow_id: WorkflowInstanceId,
        task_code: Code,
    ) -> Result<Option<TaskInstance>> {
        self.check_available()?;
        let tables = self.tables.lock();
        Ok(tables
            .task_instances
            .values()
            .rev()
            .find(|t| t.workflow_instance_id == workflow_id && t.task_code == task_code)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Priority, TaskType};

    fn task(workflow_instance_id: WorkflowInstanceId) -> TaskInstance {
        TaskInstance {
            id: 0,
            workflow_instance_id,
            task_code: 7,
            name: "A".to_string(),
            task_type: TaskType::Shell,
            state: TaskState::Submitted,
            priority: Priority::Medium,
            worker_group: "default".to_string(),
            host: None,
            retry_times: 0,
            max_retry_times: 0,
            failover: false,
            submit_time: local_now(),
            start_time: None,
            end_time: None,
        }
    }

    #[test]
    fn compare_and_set_only_moves_from_expected_states() {
        let store = MemoryStore::new();
        let t = store.insert_task_instance(task(1)).unwrap();

        assert!(!store
            .compare_and_set_task_state(t.id, &[TaskState::Running], TaskState::Success)
            .unwrap());
        assert!(store
            .compare_and_set_task_state(t.id, &[TaskState::Submitted], TaskState::Pending)
            .unwrap());
        assert_eq!(
            store.task_instance(t.id).unwrap().unwrap().state,
            TaskState::Pending
        );
    }

    #[test]
    fn unavailable_store_reports_transient_error() {
        let store = MemoryStore::new();
        store.set_available(false);
        let err = store.task_instance(1).unwrap_err();
        assert!(err.is_store_unavailable());

        store.set_available(true);
        assert!(store.task_instance(1).unwrap().is_none());
    }

    #[test]
    fn latest_task_instance_prefers_highest_id() {
        let store = MemoryStore::new();
        let first = store.insert_task_instance(task(3)).unwrap();
        let second = store.insert_task_instance(task(3)).unwrap();
        assert!(second.id > first.id);

        let latest = store.latest_task_instance_by_code(3, 7).unwrap().unwrap();
        assert_eq!(latest.id, second.id);
    }
}
