// src/engine/handlers.rs

//! Event handlers and the table that maps event types to them.
//!
//! Handlers are synchronous and run on the firer pool. Each one persists a
//! state change before applying it in memory, so a handler that fails with
//! `StoreUnavailable` can be re-run from the start when its event is fired
//! again.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, error, info, warn};

use super::context::EngineContext;
use super::dag_engine::DagEngine;
use super::task_runnable::TaskExecutionRunnable;
use super::workflow_runnable::WorkflowExecutionRunnable;
use crate::dependent::DependentTaskExecutor;
use crate::dispatch::{TaskExecuteRequest, TaskPriority};
use crate::errors::{DagflowError, Result};
use crate::event::{Event, EventType, TaskExecutionReport, TaskExecutionStatus};
use crate::types::{TaskInstanceId, TaskState, WorkflowState};

pub type EventHandler =
    fn(&EngineContext, &Arc<WorkflowExecutionRunnable>, &Event) -> Result<()>;

/// Explicit `EventType → handler` lookup.
pub struct EventHandlerTable {
    handlers: HashMap<EventType, EventHandler>,
}

impl EventHandlerTable {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Handlers for every event the engine produces.
    pub fn standard() -> Self {
        let mut table = Self::empty();
        table.register(EventType::WorkflowTrigger, handle_workflow_trigger);
        table.register(EventType::WorkflowPause, handle_workflow_pause);
        table.register(EventType::WorkflowKill, handle_workflow_kill);
        table.register(EventType::TaskRun, handle_task_submit);
        table.register(EventType::TaskRetry, handle_task_submit);
        table.register(EventType::TaskFailover, handle_task_submit);
        table.register(EventType::TaskPause, handle_task_pause);
        table.register(EventType::TaskKill, handle_task_kill);
        table.register(EventType::TaskRunning, handle_task_running);
        table.register(EventType::TaskSuccess, handle_task_success);
        table.register(EventType::TaskFailure, handle_task_failure);
        table.register(EventType::TaskPaused, handle_task_paused);
        table.register(EventType::TaskKilled, handle_task_killed);
        table
    }

    pub fn register(&mut self, event_type: EventType, handler: EventHandler) {
        self.handlers.insert(event_type, handler);
    }

    pub fn handle(
        &self,
        ctx: &EngineContext,
        workflow: &Arc<WorkflowExecutionRunnable>,
        event: &Event,
    ) -> Result<()> {
        match self.handlers.get(&event.event_type()) {
            Some(handler) => {
                debug!(workflow_instance_id = workflow.id(), %event, "handling event");
                handler(ctx, workflow, event)
            }
            None => {
                warn!(workflow_instance_id = workflow.id(), %event, "no handler for event");
                Ok(())
            }
        }
    }
}

impl Default for EventHandlerTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Finish the workflow once nothing is active anymore.
pub fn refresh_workflow_state(
    ctx: &EngineContext,
    workflow: &Arc<WorkflowExecutionRunnable>,
) -> Result<()> {
    let (active, completed) = {
        let graph = workflow.context().graph();
        (graph.has_active(), graph.completed_state())
    };
    if active {
        return Ok(());
    }

    let next = match workflow.state() {
        WorkflowState::ReadyStop => WorkflowState::Stop,
        WorkflowState::ReadyPause => WorkflowState::Paused,
        WorkflowState::Running => completed,
        _ => return Ok(()),
    };
    ctx.store.update_workflow_state(workflow.id(), next)?;
    workflow.set_state(next);
    info!(workflow_instance_id = workflow.id(), state = ?next, "workflow finished");
    Ok(())
}

fn task_instance_id(event: &Event) -> Result<TaskInstanceId> {
    event
        .task_instance_id()
        .ok_or_else(|| DagflowError::Other(anyhow!("event {event} carries no task instance")))
}

fn report_of(event: &Event) -> Result<&TaskExecutionReport> {
    match event {
        Event::TaskReport(report) => Ok(report),
        other => Err(DagflowError::Other(anyhow!("event {other} is not a task report"))),
    }
}

/// Unfinished states plus `target`, so repeating a transition is harmless.
fn moving_to(target: TaskState) -> Vec<TaskState> {
    let mut expected = TaskState::UNFINISHED.to_vec();
    expected.push(target);
    expected
}

fn active_runnable(
    workflow: &WorkflowExecutionRunnable,
    task_instance_id: TaskInstanceId,
) -> Option<Arc<TaskExecutionRunnable>> {
    workflow.context().graph().runnable(task_instance_id)
}

fn handle_workflow_trigger(
    ctx: &EngineContext,
    workflow: &Arc<WorkflowExecutionRunnable>,
    _event: &Event,
) -> Result<()> {
    if workflow.state().is_finished() {
        debug!(workflow_instance_id = workflow.id(), "workflow already finished; trigger ignored");
        return Ok(());
    }

    ctx.store
        .update_workflow_state(workflow.id(), WorkflowState::Running)?;
    workflow.set_state(WorkflowState::Running);
    info!(
        workflow_instance_id = workflow.id(),
        workflow = %workflow.context().name(),
        "workflow triggered"
    );

    DagEngine::new(ctx, workflow).trigger_roots()?;
    refresh_workflow_state(ctx, workflow)
}

fn handle_workflow_pause(
    ctx: &EngineContext,
    workflow: &Arc<WorkflowExecutionRunnable>,
    _event: &Event,
) -> Result<()> {
    let state = workflow.state();
    if state != WorkflowState::Running {
        debug!(workflow_instance_id = workflow.id(), state = ?state, "only running workflows pause");
        return Ok(());
    }

    ctx.store
        .update_workflow_state(workflow.id(), WorkflowState::ReadyPause)?;
    workflow.set_state(WorkflowState::ReadyPause);
    info!(workflow_instance_id = workflow.id(), "pausing workflow");

    DagEngine::new(ctx, workflow).pause_all_task();
    refresh_workflow_state(ctx, workflow)
}

fn handle_workflow_kill(
    ctx: &EngineContext,
    workflow: &Arc<WorkflowExecutionRunnable>,
    _event: &Event,
) -> Result<()> {
    let state = workflow.state();
    if state.is_finished() || state == WorkflowState::ReadyStop {
        debug!(workflow_instance_id = workflow.id(), state = ?state, "workflow already stopping");
        return Ok(());
    }

    ctx.store
        .update_workflow_state(workflow.id(), WorkflowState::ReadyStop)?;
    workflow.set_state(WorkflowState::ReadyStop);
    info!(workflow_instance_id = workflow.id(), "killing workflow");

    DagEngine::new(ctx, workflow).kill_all_task();
    refresh_workflow_state(ctx, workflow)
}

/// RUN, RETRY and FAILOVER: hand the task to its executor.
fn handle_task_submit(
    ctx: &EngineContext,
    workflow: &Arc<WorkflowExecutionRunnable>,
    event: &Event,
) -> Result<()> {
    let task_instance_id = task_instance_id(event)?;
    let Some(task) = active_runnable(workflow, task_instance_id) else {
        debug!(task_instance_id, %event, "task runnable gone; nothing to submit");
        return Ok(());
    };
    if task.state() != TaskState::Submitted {
        debug!(task_instance_id, state = ?task.state(), "task already past submission");
        return Ok(());
    }

    if task.definition().task_type.is_logic_task() {
        return start_logic_task(ctx, workflow, &task);
    }

    let context = workflow.context();
    let definition = task.definition();
    let request = TaskExecuteRequest {
        workflow_instance_id: workflow.id(),
        task_instance_id,
        task_code: definition.code,
        task_name: definition.name.clone(),
        task_type: definition.task_type,
        command: definition.command.clone(),
        worker_group: definition.worker_group.clone(),
    };
    ctx.queue
        .push(TaskPriority::new(context.priority(), definition.priority, request));
    debug!(
        workflow_instance_id = workflow.id(),
        task_instance_id,
        task = %task.task_name(),
        "task queued for dispatch"
    );
    Ok(())
}

fn start_logic_task(
    ctx: &EngineContext,
    workflow: &Arc<WorkflowExecutionRunnable>,
    task: &Arc<TaskExecutionRunnable>,
) -> Result<()> {
    let context = workflow.context();
    let executor = match task.definition().dependence.as_ref() {
        Some(parameters) => DependentTaskExecutor::new(
            Arc::clone(&ctx.store),
            parameters,
            context.schedule_time(),
            context.test_flag(),
            ctx.settings.dependent_check_interval,
        ),
        None => Err(DagflowError::DependentConfig(format!(
            "task '{}' has no dependence",
            task.task_name()
        ))),
    };

    match executor {
        Ok(executor) => {
            ctx.poller.start(
                workflow.id(),
                task.task_instance_id(),
                Box::new(executor),
                task.cancellation(),
            );
            debug!(task_instance_id = task.task_instance_id(), "dependent task started");
            Ok(())
        }
        Err(err) if err.is_store_unavailable() => Err(err),
        Err(err) => {
            error!(
                workflow_instance_id = workflow.id(),
                task_instance_id = task.task_instance_id(),
                task = %task.task_name(),
                error = %err,
                "dependent task misconfigured; failing without retry"
            );
            finish_task(ctx, workflow, task, TaskState::Failed)
        }
    }
}

/// Persist `state`, drop the runnable from the active set and refresh the
/// workflow.
fn finish_task(
    ctx: &EngineContext,
    workflow: &Arc<WorkflowExecutionRunnable>,
    task: &TaskExecutionRunnable,
    state: TaskState,
) -> Result<()> {
    let task_instance_id = task.task_instance_id();
    ctx.store
        .compare_and_set_task_state(task_instance_id, &moving_to(state), state)?;
    task.set_state(state);
    task.cancel();
    workflow
        .context()
        .graph()
        .finish_runnable(task_instance_id, state);
    refresh_workflow_state(ctx, workflow)
}

fn handle_task_pause(
    ctx: &EngineContext,
    workflow: &Arc<WorkflowExecutionRunnable>,
    event: &Event,
) -> Result<()> {
    stop_task(ctx, workflow, event, TaskState::Paused)
}

fn handle_task_kill(
    ctx: &EngineContext,
    workflow: &Arc<WorkflowExecutionRunnable>,
    event: &Event,
) -> Result<()> {
    stop_task(ctx, workflow, event, TaskState::Killed)
}

fn stop_task(
    ctx: &EngineContext,
    workflow: &Arc<WorkflowExecutionRunnable>,
    event: &Event,
    target: TaskState,
) -> Result<()> {
    let task_instance_id = task_instance_id(event)?;
    let Some(task) = active_runnable(workflow, task_instance_id) else {
        info!(task_instance_id, %event, "task not active; nothing to stop");
        return Ok(());
    };
    if task.state().is_finished() {
        info!(task_instance_id, state = ?task.state(), "task already finished; nothing to stop");
        return Ok(());
    }

    if !task.definition().task_type.is_logic_task() {
        let host = match task.host() {
            Some(host) => Some(host),
            None => ctx
                .store
                .task_instance(task_instance_id)?
                .and_then(|t| t.host),
        };
        if let Some(host) = host {
            let transport = Arc::clone(&ctx.transport);
            tokio::spawn(async move {
                let sent = if target == TaskState::Paused {
                    transport.pause(&host, task_instance_id).await
                } else {
                    transport.kill(&host, task_instance_id).await
                };
                if let Err(err) = sent {
                    warn!(task_instance_id, host = %host, error = %err, "failed to stop task on worker");
                }
            });
        }
    }

    info!(
        workflow_instance_id = workflow.id(),
        task_instance_id,
        task = %task.task_name(),
        state = ?target,
        "stopping task"
    );
    finish_task(ctx, workflow, &task, target)
}

fn handle_task_running(
    ctx: &EngineContext,
    workflow: &Arc<WorkflowExecutionRunnable>,
    event: &Event,
) -> Result<()> {
    let report = report_of(event)?;
    let TaskExecutionStatus::Running { host } = &report.status else {
        return Ok(());
    };
    let task_instance_id = report.task_instance_id;
    let Some(task) = active_runnable(workflow, task_instance_id) else {
        debug!(task_instance_id, "running report for inactive task");
        return Ok(());
    };

    let moved = ctx.store.compare_and_set_task_state(
        task_instance_id,
        &TaskState::UNFINISHED,
        TaskState::Running,
    )?;
    if !moved {
        debug!(task_instance_id, "task no longer accepts a running report");
        return Ok(());
    }
    ctx.store.set_task_host(task_instance_id, host)?;
    task.set_host(host);
    task.set_state(TaskState::Running);
    info!(
        workflow_instance_id = workflow.id(),
        task_instance_id,
        task = %task.task_name(),
        host = %host,
        "task running"
    );
    Ok(())
}

fn handle_task_success(
    ctx: &EngineContext,
    workflow: &Arc<WorkflowExecutionRunnable>,
    event: &Event,
) -> Result<()> {
    let task_instance_id = report_of(event)?.task_instance_id;
    let Some(task) = active_runnable(workflow, task_instance_id) else {
        // A repeated success: make sure successors were triggered.
        let finished = {
            let graph = workflow.context().graph();
            graph
                .finished_task_name(task_instance_id)
                .filter(|name| graph.outcome(name) == Some(TaskState::Success))
                .map(str::to_string)
        };
        if let Some(name) = finished {
            DagEngine::new(ctx, workflow).trigger_next_tasks(&name)?;
        }
        return refresh_workflow_state(ctx, workflow);
    };

    let moved = ctx.store.compare_and_set_task_state(
        task_instance_id,
        &moving_to(TaskState::Success),
        TaskState::Success,
    )?;
    if !moved {
        debug!(task_instance_id, "task already left its running states; success ignored");
        return Ok(());
    }
    task.set_state(TaskState::Success);
    workflow
        .context()
        .graph()
        .finish_runnable(task_instance_id, TaskState::Success);
    info!(
        workflow_instance_id = workflow.id(),
        task_instance_id,
        task = %task.task_name(),
        "task succeeded"
    );

    DagEngine::new(ctx, workflow).trigger_next_tasks(task.task_name())?;
    refresh_workflow_state(ctx, workflow)
}

fn handle_task_failure(
    ctx: &EngineContext,
    workflow: &Arc<WorkflowExecutionRunnable>,
    event: &Event,
) -> Result<()> {
    let task_instance_id = report_of(event)?.task_instance_id;
    let Some(task) = active_runnable(workflow, task_instance_id) else {
        debug!(task_instance_id, "failure report for inactive task");
        return refresh_workflow_state(ctx, workflow);
    };

    let moved = ctx.store.compare_and_set_task_state(
        task_instance_id,
        &moving_to(TaskState::Failed),
        TaskState::Failed,
    )?;
    if !moved {
        debug!(task_instance_id, "task already left its running states; failure ignored");
        return Ok(());
    }
    task.set_state(TaskState::Failed);

    if task.can_retry() && workflow.state() == WorkflowState::Running {
        return DagEngine::new(ctx, workflow).retry_task(task_instance_id);
    }

    warn!(
        workflow_instance_id = workflow.id(),
        task_instance_id,
        task = %task.task_name(),
        retry_times = task.retry_times(),
        "task failed"
    );
    workflow
        .context()
        .graph()
        .finish_runnable(task_instance_id, TaskState::Failed);
    refresh_workflow_state(ctx, workflow)
}

fn handle_task_paused(
    ctx: &EngineContext,
    workflow: &Arc<WorkflowExecutionRunnable>,
    event: &Event,
) -> Result<()> {
    finish_reported(ctx, workflow, event, TaskState::Paused)
}

fn handle_task_killed(
    ctx: &EngineContext,
    workflow: &Arc<WorkflowExecutionRunnable>,
    event: &Event,
) -> Result<()> {
    finish_reported(ctx, workflow, event, TaskState::Killed)
}

fn finish_reported(
    ctx: &EngineContext,
    workflow: &Arc<WorkflowExecutionRunnable>,
    event: &Event,
    state: TaskState,
) -> Result<()> {
    let task_instance_id = report_of(event)?.task_instance_id;
    let Some(task) = active_runnable(workflow, task_instance_id) else {
        debug!(task_instance_id, state = ?state, "report for inactive task");
        return refresh_workflow_state(ctx, workflow);
    };
    info!(
        workflow_instance_id = workflow.id(),
        task_instance_id,
        task = %task.task_name(),
        state = ?state,
        "task stopped by worker"
    );
    finish_task(ctx, workflow, &task, state)
}
