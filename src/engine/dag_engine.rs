// src/engine/dag_engine.rs

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info};

use super::context::EngineContext;
use super::workflow_runnable::WorkflowExecutionRunnable;
use crate::dag::Triggerability;
use crate::errors::Result;
use crate::event::{Event, TaskOperation};
use crate::types::{TaskInstanceId, TaskState, WorkflowInstanceId, WorkflowState};

/// Decides which tasks of one workflow may run next and queues the task
/// operations for them.
///
/// The graph lock is taken for single operations only; nothing here holds it
/// across a store call.
pub struct DagEngine<'a> {
    ctx: &'a EngineContext,
    workflow: &'a Arc<WorkflowExecutionRunnable>,
}

impl<'a> DagEngine<'a> {
    pub fn new(ctx: &'a EngineContext, workflow: &'a Arc<WorkflowExecutionRunnable>) -> Self {
        Self { ctx, workflow }
    }

    fn workflow_instance_id(&self) -> WorkflowInstanceId {
        self.workflow.id()
    }

    /// Trigger every task without predecessors.
    pub fn trigger_roots(&self) -> Result<()> {
        let roots = self.workflow.context().graph().dag().roots();
        for root in roots {
            self.trigger_task(&root)?;
        }
        Ok(())
    }

    /// Trigger the direct successors of `parent`. Nothing is triggered while
    /// the workflow is not running.
    pub fn trigger_next_tasks(&self, parent: &str) -> Result<()> {
        let state = self.workflow.state();
        if state != WorkflowState::Running {
            debug!(
                workflow_instance_id = self.workflow_instance_id(),
                task = %parent,
                state = ?state,
                "workflow not running; successors stay untriggered"
            );
            return Ok(());
        }

        let successors: Vec<String> = self
            .workflow
            .context()
            .graph()
            .dag()
            .successors_of(parent)
            .map(str::to_string)
            .collect();
        for successor in successors {
            self.trigger_task(&successor)?;
        }
        Ok(())
    }

    /// Trigger one task if all its predecessors succeeded and it has not
    /// been triggered before.
    pub fn trigger_task(&self, name: &str) -> Result<()> {
        let context = self.workflow.context();
        let workflow_instance_id = self.workflow_instance_id();

        let reservation = context.graph().try_reserve_trigger(name);
        match reservation {
            Triggerability::UnknownTask => {
                debug!(workflow_instance_id, task = %name, "no such task in DAG");
                Ok(())
            }
            Triggerability::AlreadyTriggered => {
                debug!(workflow_instance_id, task = %name, "task already triggered");
                Ok(())
            }
            Triggerability::WaitingOn(predecessor) => {
                debug!(
                    workflow_instance_id,
                    task = %name,
                    predecessor = %predecessor,
                    "predecessor not finished successfully"
                );
                Ok(())
            }
            Triggerability::Ready { skip: true } => {
                info!(workflow_instance_id, task = %name, "task skipped");
                context.graph().mark_node_finished(name, TaskState::Success);
                self.trigger_next_tasks(name)
            }
            Triggerability::Ready { skip: false } => {
                let Some(definition) = context.definition().task(name) else {
                    context.graph().release_trigger(name);
                    debug!(workflow_instance_id, task = %name, "task missing from definition");
                    return Ok(());
                };
                let runnable = match self.ctx.task_factory.create(context, definition) {
                    Ok(runnable) => runnable,
                    Err(err) => {
                        context.graph().release_trigger(name);
                        return Err(err);
                    }
                };
                let task_instance_id = runnable.task_instance_id();
                context.graph().store_runnable(runnable);
                context.events().store_event_to_tail(Event::task(
                    workflow_instance_id,
                    task_instance_id,
                    TaskOperation::Run,
                ));
                info!(workflow_instance_id, task_instance_id, task = %name, "task triggered");
                Ok(())
            }
        }
    }

    /// Replace a failed task with its next attempt, fired after the task's
    /// retry interval.
    pub fn retry_task(&self, task_instance_id: TaskInstanceId) -> Result<()> {
        let context = self.workflow.context();
        let Some(previous) = context.graph().runnable(task_instance_id) else {
            debug!(task_instance_id, "retry of unknown task runnable");
            return Ok(());
        };

        let next = self.ctx.task_factory.create_retry(context, &previous)?;
        let fire_at = Instant::now() + previous.definition().retry_interval;
        let next_id = next.task_instance_id();
        info!(
            workflow_instance_id = self.workflow_instance_id(),
            task = %previous.task_name(),
            previous = task_instance_id,
            task_instance_id = next_id,
            retry_times = next.retry_times(),
            "task will be retried"
        );
        context.graph().store_runnable(next);
        context.events().store_event_to_tail(Event::delayed_task(
            self.workflow_instance_id(),
            next_id,
            TaskOperation::Retry,
            fire_at,
        ));
        Ok(())
    }

    /// Replace a task whose executor was lost with a fresh instance.
    pub fn failover_task(&self, task_instance_id: TaskInstanceId) -> Result<()> {
        let context = self.workflow.context();
        let Some(previous) = context.graph().runnable(task_instance_id) else {
            debug!(task_instance_id, "failover of unknown task runnable");
            return Ok(());
        };

        let next = self.ctx.task_factory.create_failover(context, &previous)?;
        let next_id = next.task_instance_id();
        info!(
            workflow_instance_id = self.workflow_instance_id(),
            task = %previous.task_name(),
            previous = task_instance_id,
            task_instance_id = next_id,
            "task failed over"
        );
        context.graph().store_runnable(next);
        context.events().store_event_to_tail(Event::task(
            self.workflow_instance_id(),
            next_id,
            TaskOperation::Failover,
        ));
        Ok(())
    }

    pub fn pause_task(&self, task_instance_id: TaskInstanceId) {
        self.queue_task_operation(task_instance_id, TaskOperation::Pause);
    }

    pub fn kill_task(&self, task_instance_id: TaskInstanceId) {
        self.queue_task_operation(task_instance_id, TaskOperation::Kill);
    }

    pub fn pause_all_task(&self) {
        let active = self.workflow.context().graph().active_runnables();
        for runnable in active {
            self.pause_task(runnable.task_instance_id());
        }
    }

    pub fn kill_all_task(&self) {
        let active = self.workflow.context().graph().active_runnables();
        for runnable in active {
            self.kill_task(runnable.task_instance_id());
        }
    }

    fn queue_task_operation(&self, task_instance_id: TaskInstanceId, operation: TaskOperation) {
        let context = self.workflow.context();
        let known = context.graph().runnable(task_instance_id).is_some();
        if !known {
            debug!(task_instance_id, operation = ?operation, "no active runnable; nothing to do");
            return;
        }
        context.events().store_event_to_tail(Event::task(
            self.workflow_instance_id(),
            task_instance_id,
            operation,
        ));
    }
}
