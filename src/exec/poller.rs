// src/exec/poller.rs

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::{AsyncTaskExecutionStatus, AsyncTaskExecutor, MASTER_HOST};
use crate::event::{TaskExecutionReport, TaskExecutionStatus};
use crate::types::{TaskInstanceId, WorkflowInstanceId};

/// Drives async logic tasks to completion.
///
/// Each started task gets one tokio task that reports RUNNING, polls the
/// executor right away and then once per check interval, and reports the
/// terminal status. Cancellation ends the poll loop without a report.
#[derive(Debug, Clone)]
pub struct AsyncTaskPoller {
    reports: mpsc::Sender<TaskExecutionReport>,
}

impl AsyncTaskPoller {
    pub fn new(reports: mpsc::Sender<TaskExecutionReport>) -> Self {
        Self { reports }
    }

    pub fn start(
        &self,
        workflow_instance_id: WorkflowInstanceId,
        task_instance_id: TaskInstanceId,
        mut executor: Box<dyn AsyncTaskExecutor>,
        mut cancel: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let reports = self.reports.clone();
        tokio::spawn(async move {
            let report = |status| TaskExecutionReport {
                workflow_instance_id,
                task_instance_id,
                status,
            };

            let running = TaskExecutionStatus::Running {
                host: MASTER_HOST.to_string(),
            };
            if reports.send(report(running)).await.is_err() {
                debug!(task_instance_id, "report channel closed; poller exiting");
                return;
            }

            loop {
                if *cancel.borrow_and_update() {
                    debug!(task_instance_id, "async task cancelled");
                    return;
                }

                let polled = tokio::select! {
                    changed = cancel.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        continue;
                    }
                    polled = executor.async_task_execution_status() => polled,
                };

                let terminal = match polled {
                    Ok(AsyncTaskExecutionStatus::Running) => None,
                    Ok(AsyncTaskExecutionStatus::Success) => Some(TaskExecutionStatus::Success),
                    Ok(AsyncTaskExecutionStatus::Failed) => Some(TaskExecutionStatus::Failed),
                    Err(err) if err.is_store_unavailable() => {
                        warn!(task_instance_id, error = %err, "async task check hit store outage; retrying");
                        None
                    }
                    Err(err) => {
                        error!(task_instance_id, error = %err, "async task check failed");
                        Some(TaskExecutionStatus::Failed)
                    }
                };

                if let Some(status) = terminal {
                    debug!(task_instance_id, status = ?status, "async task finished");
                    let _ = reports.send(report(status)).await;
                    return;
                }

                let interval = executor.async_task_state_check_interval();
                tokio::select! {
                    changed = cancel.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        })
    }
}
