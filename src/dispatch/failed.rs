// src/dispatch/failed.rs

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::priority::TaskPriority;

/// Items whose last dispatch attempt failed, waiting for their backoff.
#[derive(Debug, Default)]
pub struct DispatchFailedQueue {
    items: Mutex<Vec<TaskPriority>>,
}

impl DispatchFailedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: TaskPriority) {
        self.items.lock().push(item);
    }

    /// Remove and return at most `limit` items whose backoff has elapsed at
    /// `now`, most urgent first. Due items beyond the limit stay queued.
    pub fn take_due(&self, now: Instant, backoff: Duration, limit: usize) -> Vec<TaskPriority> {
        let mut items = self.items.lock();
        let (mut due, mut waiting): (Vec<_>, Vec<_>) = items.drain(..).partition(|item| {
            item.last_attempt
                .is_none_or(|at| now.saturating_duration_since(at) >= backoff)
        });
        due.sort();
        if due.len() > limit {
            waiting.extend(due.drain(limit..));
        }
        *items = waiting;
        due
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::TaskExecuteRequest;
    use crate::types::{Priority, TaskType};

    fn failed_item(task: i64, last_attempt: Instant) -> TaskPriority {
        let mut item = TaskPriority::new(
            Priority::Medium,
            Priority::Medium,
            TaskExecuteRequest {
                workflow_instance_id: 1,
                task_instance_id: task,
                task_code: task,
                task_name: format!("t{task}"),
                task_type: TaskType::Shell,
                command: None,
                worker_group: "default".to_string(),
            },
        );
        item.failed_times = 1;
        item.last_attempt = Some(last_attempt);
        item
    }

    #[test]
    fn take_due_respects_backoff_and_limit() {
        let queue = DispatchFailedQueue::new();
        let now = Instant::now();
        let backoff = Duration::from_millis(100);
        let long_ago = now - Duration::from_secs(1);

        queue.push(failed_item(3, long_ago));
        queue.push(failed_item(1, long_ago));
        queue.push(failed_item(2, long_ago));
        queue.push(failed_item(4, now));

        let first: Vec<_> = queue
            .take_due(now, backoff, 2)
            .iter()
            .map(|i| i.task_instance_id)
            .collect();
        assert_eq!(first, vec![1, 2]);
        assert_eq!(queue.len(), 2);

        let second: Vec<_> = queue
            .take_due(now, backoff, 10)
            .iter()
            .map(|i| i.task_instance_id)
            .collect();
        assert_eq!(second, vec![3]);
        assert_eq!(queue.len(), 1);
    }
}
