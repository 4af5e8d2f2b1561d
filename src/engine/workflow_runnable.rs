// src/engine/workflow_runnable.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDateTime;
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::watch;

use crate::dag::{WorkflowDag, WorkflowExecutionGraph};
use crate::event::EventRepository;
use crate::store::{WorkflowDefinition, WorkflowInstance};
use crate::types::{Priority, WorkflowInstanceId, WorkflowState};

/// Identity and mutable execution state of one workflow instance.
#[derive(Debug)]
pub struct WorkflowExecutionContext {
    workflow_instance_id: WorkflowInstanceId,
    name: String,
    priority: Priority,
    schedule_time: Option<NaiveDateTime>,
    test_flag: bool,
    definition: Arc<WorkflowDefinition>,
    graph: Mutex<WorkflowExecutionGraph>,
    events: EventRepository,
}

impl WorkflowExecutionContext {
    pub fn new(instance: &WorkflowInstance, definition: Arc<WorkflowDefinition>) -> Self {
        let dag = WorkflowDag::from_definition(&definition);
        Self {
            workflow_instance_id: instance.id,
            name: instance.name.clone(),
            priority: instance.priority,
            schedule_time: instance.schedule_time,
            test_flag: instance.test_flag,
            definition,
            graph: Mutex::new(WorkflowExecutionGraph::new(dag)),
            events: EventRepository::new(),
        }
    }

    pub fn workflow_instance_id(&self) -> WorkflowInstanceId {
        self.workflow_instance_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn schedule_time(&self) -> Option<NaiveDateTime> {
        self.schedule_time
    }

    pub fn test_flag(&self) -> bool {
        self.test_flag
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    /// Lock the execution graph. Keep the guard for a single operation.
    pub fn graph(&self) -> MutexGuard<'_, WorkflowExecutionGraph> {
        self.graph.lock()
    }

    pub fn events(&self) -> &EventRepository {
        &self.events
    }
}

/// A registered, running workflow instance.
#[derive(Debug)]
pub struct WorkflowExecutionRunnable {
    context: WorkflowExecutionContext,
    state: watch::Sender<WorkflowState>,
    firing: AtomicBool,
}

impl WorkflowExecutionRunnable {
    pub fn new(context: WorkflowExecutionContext, state: WorkflowState) -> Self {
        let (state, _) = watch::channel(state);
        Self {
            context,
            state,
            firing: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> &WorkflowExecutionContext {
        &self.context
    }

    pub fn id(&self) -> WorkflowInstanceId {
        self.context.workflow_instance_id
    }

    pub fn state(&self) -> WorkflowState {
        *self.state.borrow()
    }

    pub fn set_state(&self, state: WorkflowState) {
        self.state.send_replace(state);
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkflowState> {
        self.state.subscribe()
    }

    /// Resolve once the workflow reaches a finished state.
    pub async fn wait_until_finished(&self) -> WorkflowState {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|s| s.is_finished()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    /// Claim the right to run a fire cycle. Returns false if one is running.
    pub fn try_start_firing(&self) -> bool {
        self.firing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn finish_firing(&self) {
        self.firing.store(false, Ordering::Release);
    }
}
