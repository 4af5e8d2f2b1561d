// src/exec/local.rs

//! Worker transport that runs shell commands on this machine.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::dispatch::{DispatchError, DispatchFuture, TaskExecuteRequest, TaskTransport};
use crate::event::{TaskExecutionReport, TaskExecutionStatus};
use crate::types::TaskInstanceId;

type CancelMap = Arc<Mutex<HashMap<TaskInstanceId, oneshot::Sender<()>>>>;

/// Runs each dispatched task as `sh -c <command>` and reports RUNNING and the
/// exit outcome on the report channel.
///
/// Pause and kill stop the process; a stopped task sends no completion report.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    reports: mpsc::Sender<TaskExecutionReport>,
    running: CancelMap,
}

impl LocalTransport {
    pub fn new(reports: mpsc::Sender<TaskExecutionReport>) -> Self {
        Self {
            reports,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn running_tasks(&self) -> usize {
        self.running.lock().len()
    }

    fn stop(&self, task_instance_id: TaskInstanceId) -> Result<(), DispatchError> {
        match self.running.lock().remove(&task_instance_id) {
            Some(cancel) => {
                let _ = cancel.send(());
            }
            None => debug!(task_instance_id, "stop requested for task not running locally"),
        }
        Ok(())
    }
}

impl TaskTransport for LocalTransport {
    fn dispatch<'a>(&'a self, host: &'a str, request: &'a TaskExecuteRequest) -> DispatchFuture<'a> {
        Box::pin(async move {
            let Some(command) = request.command.clone() else {
                return Err(DispatchError::Transport {
                    host: host.to_string(),
                    reason: format!("task '{}' has no command", request.task_name),
                });
            };

            let (cancel_tx, cancel_rx) = oneshot::channel();
            self.running.lock().insert(request.task_instance_id, cancel_tx);

            let reports = self.reports.clone();
            let running = Arc::clone(&self.running);
            let request = request.clone();
            let host = host.to_string();
            tokio::spawn(async move {
                let task_instance_id = request.task_instance_id;
                let report = |status| TaskExecutionReport {
                    workflow_instance_id: request.workflow_instance_id,
                    task_instance_id,
                    status,
                };

                let _ = reports
                    .send(report(TaskExecutionStatus::Running { host: host.clone() }))
                    .await;

                let outcome = match run_command(&request.task_name, &command, cancel_rx).await {
                    Ok(Some(true)) => Some(TaskExecutionStatus::Success),
                    Ok(Some(false)) => Some(TaskExecutionStatus::Failed),
                    Ok(None) => None,
                    Err(err) => {
                        error!(task = %request.task_name, error = %err, "task execution error");
                        Some(TaskExecutionStatus::Failed)
                    }
                };
                running.lock().remove(&task_instance_id);

                if let Some(status) = outcome {
                    let _ = reports.send(report(status)).await;
                }
            });
            Ok(())
        })
    }

    fn pause<'a>(&'a self, _host: &'a str, task_instance_id: TaskInstanceId) -> DispatchFuture<'a> {
        Box::pin(async move { self.stop(task_instance_id) })
    }

    fn kill<'a>(&'a self, _host: &'a str, task_instance_id: TaskInstanceId) -> DispatchFuture<'a> {
        Box::pin(async move { self.stop(task_instance_id) })
    }
}

/// Run the command to completion. `Ok(None)` means it was cancelled.
async fn run_command(
    task: &str,
    command: &str,
    cancel_rx: oneshot::Receiver<()>,
) -> anyhow::Result<Option<bool>> {
    info!(task = %task, cmd = %command, "starting task process");

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawning process for task '{task}'"))?;

    if let Some(stdout) = child.stdout.take() {
        drain_lines(task, "stdout", stdout);
    }
    if let Some(stderr) = child.stderr.take() {
        drain_lines(task, "stderr", stderr);
    }

    tokio::select! {
        status = child.wait() => {
            let status = status.with_context(|| format!("waiting for process of task '{task}'"))?;
            info!(
                task = %task,
                exit_code = status.code().unwrap_or(-1),
                success = status.success(),
                "task process exited"
            );
            Ok(Some(status.success()))
        }
        cancel = cancel_rx => {
            if cancel.is_ok() {
                info!(task = %task, "stop requested; killing process");
                if let Err(e) = child.kill().await {
                    warn!(task = %task, error = %e, "failed to kill child process");
                }
            }
            Ok(None)
        }
    }
}

/// Consume a child pipe so its buffer never fills; lines are logged at debug.
fn drain_lines<R>(task: &str, stream: &'static str, pipe: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let task = task.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(task = %task, stream, "{}", line);
        }
    });
}
