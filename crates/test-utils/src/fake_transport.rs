use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use dagflow::dispatch::{DispatchError, DispatchFuture, TaskExecuteRequest, TaskTransport};
use dagflow::event::{TaskExecutionReport, TaskExecutionStatus};
use dagflow::types::TaskInstanceId;

/// What the fake worker does with a dispatched task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeBehaviour {
    /// Report RUNNING, then SUCCESS.
    Succeed,
    /// Report RUNNING, then FAILED.
    Fail,
    /// Report RUNNING and never finish.
    Hold,
    /// Refuse the dispatch itself.
    Reject,
}

/// A fake worker fleet that:
/// - records every dispatched request, pause and kill
/// - reports task outcomes on the engine's report channel according to a
///   per-task (or default) [`FakeBehaviour`].
pub struct FakeTransport {
    reports: mpsc::Sender<TaskExecutionReport>,
    default: FakeBehaviour,
    per_task: Mutex<HashMap<String, FakeBehaviour>>,
    dispatched: Mutex<Vec<TaskExecuteRequest>>,
    paused: Mutex<Vec<TaskInstanceId>>,
    killed: Mutex<Vec<TaskInstanceId>>,
    attempts: AtomicUsize,
}

impl FakeTransport {
    pub fn new(reports: mpsc::Sender<TaskExecutionReport>) -> Self {
        Self::with_default(reports, FakeBehaviour::Succeed)
    }

    pub fn with_default(reports: mpsc::Sender<TaskExecutionReport>, default: FakeBehaviour) -> Self {
        Self {
            reports,
            default,
            per_task: Mutex::new(HashMap::new()),
            dispatched: Mutex::new(Vec::new()),
            paused: Mutex::new(Vec::new()),
            killed: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn set_behaviour(&self, task_name: &str, behaviour: FakeBehaviour) {
        self.per_task.lock().insert(task_name.to_string(), behaviour);
    }

    /// Names of dispatched tasks, in dispatch order.
    pub fn dispatched_names(&self) -> Vec<String> {
        self.dispatched
            .lock()
            .iter()
            .map(|r| r.task_name.clone())
            .collect()
    }

    pub fn dispatched(&self) -> Vec<TaskExecuteRequest> {
        self.dispatched.lock().clone()
    }

    /// Dispatch calls, including rejected ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn paused(&self) -> Vec<TaskInstanceId> {
        self.paused.lock().clone()
    }

    pub fn killed(&self) -> Vec<TaskInstanceId> {
        self.killed.lock().clone()
    }

    fn behaviour(&self, task_name: &str) -> FakeBehaviour {
        self.per_task
            .lock()
            .get(task_name)
            .copied()
            .unwrap_or(self.default)
    }
}

impl TaskTransport for FakeTransport {
    fn dispatch<'a>(&'a self, host: &'a str, request: &'a TaskExecuteRequest) -> DispatchFuture<'a> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let behaviour = self.behaviour(&request.task_name);
            if behaviour == FakeBehaviour::Reject {
                return Err(DispatchError::Transport {
                    host: host.to_string(),
                    reason: "fake worker rejected the task".to_string(),
                });
            }
            self.dispatched.lock().push(request.clone());

            let report = |status| TaskExecutionReport {
                workflow_instance_id: request.workflow_instance_id,
                task_instance_id: request.task_instance_id,
                status,
            };
            let mut statuses = vec![TaskExecutionStatus::Running {
                host: host.to_string(),
            }];
            match behaviour {
                FakeBehaviour::Succeed => statuses.push(TaskExecutionStatus::Success),
                FakeBehaviour::Fail => statuses.push(TaskExecutionStatus::Failed),
                FakeBehaviour::Hold | FakeBehaviour::Reject => {}
            }
            for status in statuses {
                self.reports
                    .send(report(status))
                    .await
                    .map_err(|e| DispatchError::Transport {
                        host: host.to_string(),
                        reason: e.to_string(),
                    })?;
            }
            Ok(())
        })
    }

    fn pause<'a>(&'a self, _host: &'a str, task_instance_id: TaskInstanceId) -> DispatchFuture<'a> {
        Box::pin(async move {
            self.paused.lock().push(task_instance_id);
            Ok(())
        })
    }

    fn kill<'a>(&'a self, _host: &'a str, task_instance_id: TaskInstanceId) -> DispatchFuture<'a> {
        Box::pin(async move {
            self.killed.lock().push(task_instance_id);
            Ok(())
        })
    }
}
