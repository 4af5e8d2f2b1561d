// src/dispatch/consumer.rs

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::failed::DispatchFailedQueue;
use super::priority::TaskPriority;
use super::queue::TaskPriorityQueue;
use super::worker::{DispatchError, TaskTransport, WorkerRegistry};
use crate::config::DispatchSettings;
use crate::store::InstanceStore;
use crate::types::{TaskInstanceId, TaskState};

/// What happened to one queue item in a dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched { host: String },
    /// Task instance missing or no longer submitted.
    Stale,
    /// Parked in the failed queue for another attempt.
    Deferred,
    /// Gave up; the task instance went back to pending.
    Demoted,
}

/// Moves task instances from the priority queue to worker hosts.
pub struct DispatchConsumer {
    queue: Arc<TaskPriorityQueue>,
    failed: DispatchFailedQueue,
    store: Arc<dyn InstanceStore>,
    workers: Arc<WorkerRegistry>,
    transport: Arc<dyn TaskTransport>,
    settings: DispatchSettings,
}

impl DispatchConsumer {
    pub fn new(
        queue: Arc<TaskPriorityQueue>,
        store: Arc<dyn InstanceStore>,
        workers: Arc<WorkerRegistry>,
        transport: Arc<dyn TaskTransport>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            queue,
            failed: DispatchFailedQueue::new(),
            store,
            workers,
            transport,
            settings,
        }
    }

    pub fn failed_len(&self) -> usize {
        self.failed.len()
    }

    /// One consumer cycle over at most `batch_size` items: due failed items
    /// first, then new items from the queue. Returns the outcome of every
    /// attempt.
    pub async fn run_cycle(&self) -> Vec<DispatchOutcome> {
        let budget = self.settings.batch_size;
        let mut outcomes = Vec::with_capacity(budget);

        for item in self
            .failed
            .take_due(Instant::now(), self.settings.retry_backoff, budget)
        {
            outcomes.push(self.dispatch_one(item).await);
        }

        while outcomes.len() < budget {
            let next = if outcomes.is_empty() {
                self.queue.poll(self.settings.poll_timeout).await
            } else {
                self.queue.try_poll()
            };
            let Some(item) = next else {
                break;
            };
            outcomes.push(self.dispatch_one(item).await);
        }

        outcomes
    }

    async fn dispatch_one(&self, mut item: TaskPriority) -> DispatchOutcome {
        let task_instance_id = item.task_instance_id;

        let instance = match self.store.task_instance(task_instance_id) {
            Ok(instance) => instance,
            Err(err) => {
                warn!(task_instance_id, error = %err, "task lookup failed; deferring dispatch");
                item.last_attempt = Some(Instant::now());
                self.failed.push(item);
                return DispatchOutcome::Deferred;
            }
        };
        if instance.is_none_or(|i| i.state != TaskState::Submitted) {
            debug!(task_instance_id, "dropping stale dispatch item");
            return DispatchOutcome::Stale;
        }

        let host = match self.workers.select_host(&item.worker_group) {
            Ok(host) => host,
            Err(err) => return self.record_failure(item, err),
        };

        if let Err(err) = self.transport.dispatch(&host, &item.request).await {
            return self.record_failure(item, err);
        }

        match self.store.compare_and_set_task_state(
            task_instance_id,
            &[TaskState::Submitted],
            TaskState::Dispatched,
        ) {
            Ok(true) => {
                if let Err(err) = self.store.set_task_host(task_instance_id, &host) {
                    warn!(task_instance_id, error = %err, "failed to persist task host");
                }
                info!(
                    task_instance_id,
                    task = %item.request.task_name,
                    host = %host,
                    "task dispatched"
                );
            }
            Ok(false) => {
                // Either the worker reported first or the engine stopped the
                // task while it was in flight. Only the latter needs a kill.
                if self.stopped_in_flight(task_instance_id) {
                    debug!(task_instance_id, host = %host, "task stopped during dispatch; killing");
                    if let Err(err) = self.transport.kill(&host, task_instance_id).await {
                        warn!(task_instance_id, error = %err, "failed to kill stray dispatch");
                    }
                    return DispatchOutcome::Stale;
                }
            }
            Err(err) => {
                warn!(task_instance_id, error = %err, "failed to persist dispatched state");
            }
        }
        DispatchOutcome::Dispatched { host }
    }

    fn stopped_in_flight(&self, task_instance_id: TaskInstanceId) -> bool {
        match self.store.task_instance(task_instance_id) {
            Ok(Some(instance)) => matches!(
                instance.state,
                TaskState::Paused | TaskState::Killed | TaskState::NeedFailover | TaskState::Pending
            ),
            Ok(None) => true,
            Err(err) => {
                warn!(task_instance_id, error = %err, "could not re-read task after dispatch");
                false
            }
        }
    }

    fn record_failure(&self, mut item: TaskPriority, err: DispatchError) -> DispatchOutcome {
        item.failed_times += 1;
        item.last_attempt = Some(Instant::now());
        let task_instance_id = item.task_instance_id;

        if item.failed_times > self.settings.max_retry_times {
            warn!(
                task_instance_id,
                failed_times = item.failed_times,
                error = %err,
                "dispatch retries exhausted; task goes back to pending"
            );
            if let Err(store_err) = self.store.compare_and_set_task_state(
                task_instance_id,
                &[TaskState::Submitted],
                TaskState::Pending,
            ) {
                warn!(task_instance_id, error = %store_err, "failed to demote task to pending; keeping it queued");
                self.failed.push(item);
                return DispatchOutcome::Deferred;
            }
            return DispatchOutcome::Demoted;
        }

        debug!(
            task_instance_id,
            failed_times = item.failed_times,
            error = %err,
            "dispatch failed; will retry"
        );
        self.failed.push(item);
        DispatchOutcome::Deferred
    }

    /// Run cycles until `shutdown` turns true.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("dispatch consumer started");
            loop {
                if *shutdown.borrow_and_update() {
                    break;
                }
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = self.run_cycle() => {}
                }
            }
            info!("dispatch consumer stopped");
        })
    }
}
