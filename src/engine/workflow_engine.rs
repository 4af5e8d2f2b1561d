// src/engine/workflow_engine.rs

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::context::EngineContext;
use super::dag_engine::DagEngine;
use super::event_engine::EventEngine;
use super::firer::EventFirer;
use super::handlers::{EventHandlerTable, refresh_workflow_state};
use super::workflow_runnable::{WorkflowExecutionContext, WorkflowExecutionRunnable};
use crate::config::EngineSettings;
use crate::dispatch::{DispatchConsumer, TaskTransport, WorkerRegistry};
use crate::errors::{DagflowError, Result};
use crate::event::{Event, TaskExecutionReport, TaskOperation, WorkflowOperation};
use crate::store::{InstanceStore, TaskInstance, WorkflowDefinition, WorkflowInstance, local_now};
use crate::types::{Code, Priority, TaskState, WorkflowInstanceId, WorkflowState};

/// Capacity of the channel workers and logic tasks report on.
pub const REPORT_CHANNEL_CAPACITY: usize = 1024;

/// Channel pair for [`TaskExecutionReport`]s. Hand the sender to the
/// transport and both halves to [`WorkflowEngine::new`].
pub fn report_channel() -> (
    mpsc::Sender<TaskExecutionReport>,
    mpsc::Receiver<TaskExecutionReport>,
) {
    mpsc::channel(REPORT_CHANNEL_CAPACITY)
}

/// How a new workflow instance is started.
#[derive(Debug, Clone, Default)]
pub struct TriggerOptions {
    pub priority: Priority,
    pub schedule_time: Option<NaiveDateTime>,
    pub test_flag: bool,
}

/// Lifecycle facade over the event engine, the dispatch consumer and the
/// report intake.
pub struct WorkflowEngine {
    ctx: Arc<EngineContext>,
    event_engine: EventEngine,
    consumer: Arc<DispatchConsumer>,
    workers: Arc<WorkerRegistry>,
    report_rx: Mutex<Option<mpsc::Receiver<TaskExecutionReport>>>,
    shutdown: watch::Sender<bool>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn InstanceStore>,
        workers: Arc<WorkerRegistry>,
        transport: Arc<dyn TaskTransport>,
        settings: EngineSettings,
        reports: (
            mpsc::Sender<TaskExecutionReport>,
            mpsc::Receiver<TaskExecutionReport>,
        ),
    ) -> Self {
        let (report_tx, report_rx) = reports;
        let ctx = Arc::new(EngineContext::new(
            Arc::clone(&store),
            settings,
            Arc::clone(&transport),
            report_tx,
        ));
        let firer = Arc::new(EventFirer::new(
            Arc::clone(&ctx),
            EventHandlerTable::standard(),
        ));
        let consumer = Arc::new(DispatchConsumer::new(
            Arc::clone(&ctx.queue),
            store,
            Arc::clone(&workers),
            transport,
            settings.dispatch,
        ));
        let (shutdown, _) = watch::channel(false);

        Self {
            event_engine: EventEngine::new(Arc::clone(&ctx), firer),
            ctx,
            consumer,
            workers,
            report_rx: Mutex::new(Some(report_rx)),
            shutdown,
            background: Mutex::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub fn workflow(&self, id: WorkflowInstanceId) -> Option<Arc<WorkflowExecutionRunnable>> {
        self.ctx.registry.get(id)
    }

    /// Start the event engine, the dispatch consumer, the report intake and
    /// the pending-task resubmitter.
    pub fn start(&self) {
        self.event_engine.start();

        let mut background = self.background.lock();
        if !background.is_empty() {
            return;
        }
        background.push(Arc::clone(&self.consumer).spawn(self.shutdown.subscribe()));
        background.push(tokio::spawn(pending_resubmitter(
            Arc::clone(&self.ctx),
            Arc::clone(&self.workers),
            self.shutdown.subscribe(),
        )));

        if let Some(report_rx) = self.report_rx.lock().take() {
            background.push(tokio::spawn(report_intake(
                Arc::clone(&self.ctx),
                report_rx,
                self.shutdown.subscribe(),
            )));
        }
        info!("workflow engine started");
    }

    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.event_engine.shutdown().await;

        let handles: Vec<_> = self.background.lock().drain(..).collect();
        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "background task ended abnormally");
            }
        }
        info!("workflow engine stopped");
    }

    fn ensure_running(&self) -> Result<()> {
        if *self.shutdown.borrow() {
            return Err(DagflowError::ShutDown);
        }
        Ok(())
    }

    /// Persist a RUNNING instance of `definition` and build its runnable.
    pub fn create_workflow_instance(
        &self,
        definition: Arc<WorkflowDefinition>,
        options: TriggerOptions,
    ) -> Result<Arc<WorkflowExecutionRunnable>> {
        let instance = self.ctx.store.insert_workflow_instance(WorkflowInstance {
            id: 0,
            name: definition.name.clone(),
            definition_code: definition.code,
            project_code: definition.project_code,
            state: WorkflowState::Running,
            priority: options.priority,
            schedule_time: options.schedule_time,
            start_time: local_now(),
            end_time: None,
            test_flag: options.test_flag,
        })?;
        debug!(workflow_instance_id = instance.id, workflow = %instance.name, "workflow instance created");

        let context = WorkflowExecutionContext::new(&instance, definition);
        Ok(Arc::new(WorkflowExecutionRunnable::new(
            context,
            instance.state,
        )))
    }

    /// Register the workflow and queue its TRIGGER event.
    pub fn trigger_workflow(&self, workflow: Arc<WorkflowExecutionRunnable>) -> Result<()> {
        self.ensure_running()?;
        let id = workflow.id();
        workflow
            .context()
            .events()
            .store_event_to_tail(Event::workflow(id, WorkflowOperation::Trigger));
        if self.ctx.registry.register(workflow).is_some() {
            debug!(workflow_instance_id = id, "workflow re-registered");
        }
        info!(workflow_instance_id = id, "workflow submitted");
        self.ctx.wake();
        Ok(())
    }

    pub fn pause_workflow(&self, id: WorkflowInstanceId) -> Result<()> {
        self.queue_workflow_operation(id, WorkflowOperation::Pause)
    }

    pub fn kill_workflow(&self, id: WorkflowInstanceId) -> Result<()> {
        self.queue_workflow_operation(id, WorkflowOperation::Kill)
    }

    fn queue_workflow_operation(
        &self,
        id: WorkflowInstanceId,
        operation: WorkflowOperation,
    ) -> Result<()> {
        let workflow = self
            .ctx
            .registry
            .get(id)
            .ok_or(DagflowError::WorkflowNotFound(id))?;
        workflow
            .context()
            .events()
            .store_event_to_tail(Event::workflow(id, operation));
        info!(workflow_instance_id = id, operation = ?operation, "workflow operation queued");
        self.ctx.wake();
        Ok(())
    }

    /// Unregister a finished workflow. Unknown ids are a no-op; unfinished
    /// workflows stay registered and yield `WorkflowNotFinished`.
    pub fn finalize_workflow(&self, id: WorkflowInstanceId) -> Result<()> {
        let Some(workflow) = self.ctx.registry.get(id) else {
            debug!(workflow_instance_id = id, "finalize of unregistered workflow");
            return Ok(());
        };
        let state = workflow.state();
        if !state.is_finished() {
            return Err(DagflowError::WorkflowNotFinished { id, state });
        }
        self.ctx.registry.remove(id);
        info!(workflow_instance_id = id, state = ?state, "workflow finalized");
        Ok(())
    }

    /// Route a report into its workflow's event queue.
    pub fn report_task_execution(&self, report: TaskExecutionReport) {
        self.ctx.route_report(report);
    }

    /// Rebuild a workflow from its persisted instances, e.g. after the
    /// process owning it went away.
    ///
    /// Finished task instances restore node outcomes; unfinished ones are
    /// failed over. Roots that never ran and successors of restored
    /// successes are triggered.
    pub fn failover_workflow(
        &self,
        id: WorkflowInstanceId,
        definition: Arc<WorkflowDefinition>,
    ) -> Result<Arc<WorkflowExecutionRunnable>> {
        self.ensure_running()?;
        if let Some(existing) = self.ctx.registry.get(id) {
            return Ok(existing);
        }

        let instance = self
            .ctx
            .store
            .workflow_instance(id)?
            .ok_or(DagflowError::WorkflowNotFound(id))?;
        let workflow = Arc::new(WorkflowExecutionRunnable::new(
            WorkflowExecutionContext::new(&instance, Arc::clone(&definition)),
            instance.state,
        ));
        if instance.state.is_finished() {
            debug!(workflow_instance_id = id, state = ?instance.state, "workflow already finished");
            return Ok(workflow);
        }

        let mut latest: HashMap<Code, TaskInstance> = HashMap::new();
        for task in self.ctx.store.task_instances_of_workflow(id)? {
            let newer = latest.get(&task.task_code).is_none_or(|t| t.id < task.id);
            if newer {
                latest.insert(task.task_code, task);
            }
        }

        let mut restored = Vec::new();
        let mut succeeded = Vec::new();
        {
            let mut graph = workflow.context().graph();
            for task in latest.values() {
                let Some(task_definition) = definition.tasks.iter().find(|t| t.code == task.task_code)
                else {
                    continue;
                };
                if task.state.is_finished() && task.state != TaskState::NeedFailover {
                    graph.mark_node_finished(&task.name, task.state);
                    if task.state == TaskState::Success {
                        succeeded.push(task.name.clone());
                    }
                } else {
                    let runnable = self.ctx.task_factory.restore(task, task_definition);
                    restored.push(runnable.task_instance_id());
                    graph.store_runnable(runnable);
                }
            }
        }
        restored.sort_unstable();
        succeeded.sort();

        // Registered only once every task is failed over, so a failed
        // attempt can be retried from the store.
        let dag_engine = DagEngine::new(&self.ctx, &workflow);
        for task_instance_id in restored {
            dag_engine.failover_task(task_instance_id)?;
        }
        if instance.state == WorkflowState::Running {
            dag_engine.trigger_roots()?;
            for name in succeeded {
                dag_engine.trigger_next_tasks(&name)?;
            }
        }
        refresh_workflow_state(&self.ctx, &workflow)?;

        self.ctx.registry.register(Arc::clone(&workflow));
        info!(workflow_instance_id = id, "workflow failed over");
        self.ctx.wake();
        Ok(workflow)
    }
}

/// Re-queue RUN for active tasks the dispatcher demoted to PENDING whose
/// worker group has a live host again. Returns how many were resubmitted.
fn resubmit_pending_tasks(
    ctx: &EngineContext,
    workers: &WorkerRegistry,
    workflow: &WorkflowExecutionRunnable,
) -> Result<usize> {
    let id = workflow.id();
    let mut resubmitted = 0;
    let active = workflow.context().graph().active_runnables();
    for task in active {
        if !workers.has_workers(&task.definition().worker_group) {
            continue;
        }
        let task_instance_id = task.task_instance_id();
        let moved = ctx.store.compare_and_set_task_state(
            task_instance_id,
            &[TaskState::Pending],
            TaskState::Submitted,
        )?;
        if !moved {
            continue;
        }
        task.set_state(TaskState::Submitted);
        workflow.context().events().store_event_to_tail(Event::task(
            id,
            task_instance_id,
            TaskOperation::Run,
        ));
        resubmitted += 1;
    }

    if resubmitted > 0 {
        info!(workflow_instance_id = id, resubmitted, "pending tasks resubmitted");
        ctx.wake();
    }
    Ok(resubmitted)
}

/// Resubmits PENDING tasks whenever a worker joins and on every idle tick.
async fn pending_resubmitter(
    ctx: Arc<EngineContext>,
    workers: Arc<WorkerRegistry>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            _ = workers.worker_joined() => {}
            _ = tokio::time::sleep(ctx.settings.idle_interval) => {}
        }

        for workflow in ctx.registry.active_workflows() {
            if workflow.state() != WorkflowState::Running {
                continue;
            }
            if let Err(err) = resubmit_pending_tasks(&ctx, &workers, &workflow) {
                warn!(workflow_instance_id = workflow.id(), error = %err, "pending resubmit failed");
            }
        }
    }
    debug!("pending resubmitter stopped");
}

async fn report_intake(
    ctx: Arc<EngineContext>,
    mut reports: mpsc::Receiver<TaskExecutionReport>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            report = reports.recv() => match report {
                Some(report) => {
                    ctx.route_report(report);
                }
                None => break,
            },
        }
    }
    debug!("report intake stopped");
}
