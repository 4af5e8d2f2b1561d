// src/engine/context.rs

use std::sync::Arc;

use tokio::sync::{Notify, mpsc};
use tracing::debug;

use super::registry::WorkflowRegistry;
use super::task_runnable::TaskExecutionRunnableFactory;
use crate::config::EngineSettings;
use crate::dispatch::{TaskPriorityQueue, TaskTransport};
use crate::event::{Event, TaskExecutionReport};
use crate::exec::AsyncTaskPoller;
use crate::store::InstanceStore;

/// Collaborators shared by every event handler.
pub struct EngineContext {
    pub store: Arc<dyn InstanceStore>,
    pub settings: EngineSettings,
    pub task_factory: TaskExecutionRunnableFactory,
    pub queue: Arc<TaskPriorityQueue>,
    pub transport: Arc<dyn TaskTransport>,
    pub poller: AsyncTaskPoller,
    pub registry: Arc<WorkflowRegistry>,
    wakeup: Notify,
}

impl EngineContext {
    pub fn new(
        store: Arc<dyn InstanceStore>,
        settings: EngineSettings,
        transport: Arc<dyn TaskTransport>,
        reports: mpsc::Sender<TaskExecutionReport>,
    ) -> Self {
        Self {
            task_factory: TaskExecutionRunnableFactory::new(Arc::clone(&store)),
            store,
            settings,
            queue: Arc::new(TaskPriorityQueue::new()),
            transport,
            poller: AsyncTaskPoller::new(reports),
            registry: Arc::new(WorkflowRegistry::new()),
            wakeup: Notify::new(),
        }
    }

    /// Cut the event engine's current sleep short.
    pub fn wake(&self) {
        self.wakeup.notify_one();
    }

    pub(crate) async fn woken(&self) {
        self.wakeup.notified().await;
    }

    /// Queue a worker or logic-task report on its workflow. Reports for
    /// workflows that are not registered are dropped.
    pub fn route_report(&self, report: TaskExecutionReport) -> bool {
        let Some(workflow) = self.registry.get(report.workflow_instance_id) else {
            debug!(
                workflow_instance_id = report.workflow_instance_id,
                task_instance_id = report.task_instance_id,
                "report for unknown workflow; ignoring"
            );
            return false;
        };
        workflow
            .context()
            .events()
            .store_event_to_tail(Event::TaskReport(report));
        self.wake();
        true
    }
}
