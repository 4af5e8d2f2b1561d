// src/dispatch/queue.rs

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::priority::TaskPriority;

/// Priority queue of task instances waiting for dispatch.
#[derive(Debug, Default)]
pub struct TaskPriorityQueue {
    heap: Mutex<BinaryHeap<Reverse<TaskPriority>>>,
    sequence: AtomicU64,
    available: Notify,
}

impl TaskPriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, mut item: TaskPriority) {
        item.sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.heap.lock().push(Reverse(item));
        self.available.notify_one();
    }

    /// Pop the most urgent item without waiting.
    pub fn try_poll(&self) -> Option<TaskPriority> {
        self.heap.lock().pop().map(|Reverse(item)| item)
    }

    /// Pop the most urgent item, waiting up to `timeout` for one to arrive.
    pub async fn poll(&self, timeout: Duration) -> Option<TaskPriority> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.available.notified();
            if let Some(item) = self.try_poll() {
                return Some(item);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_poll();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
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

    fn item(task: i64, priority: Priority) -> TaskPriority {
        TaskPriority::new(
            Priority::Medium,
            priority,
            TaskExecuteRequest {
                workflow_instance_id: 1,
                task_instance_id: task,
                task_code: task,
                task_name: format!("t{task}"),
                task_type: TaskType::Shell,
                command: None,
                worker_group: "default".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn polls_most_urgent_first() {
        let queue = TaskPriorityQueue::new();
        queue.push(item(1, Priority::Low));
        queue.push(item(2, Priority::Highest));
        queue.push(item(3, Priority::Medium));

        let order: Vec<_> = std::iter::from_fn(|| queue.try_poll())
            .map(|i| i.task_instance_id)
            .collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[tokio::test]
    async fn poll_times_out_on_empty_queue() {
        let queue = TaskPriorityQueue::new();
        assert!(queue.poll(Duration::from_millis(20)).await.is_none());
    }

    #[tokio::test]
    async fn poll_wakes_on_push() {
        let queue = std::sync::Arc::new(TaskPriorityQueue::new());
        let pusher = std::sync::Arc::clone(&queue);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            pusher.push(item(7, Priority::Medium));
        });
        let polled = queue.poll(Duration::from_secs(5)).await.unwrap();
        assert_eq!(polled.task_instance_id, 7);
    }
}
