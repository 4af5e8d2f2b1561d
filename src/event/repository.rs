// src/event/repository.rs

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::debug;

use super::Event;

/// Ordered event queue of one workflow instance.
///
/// Events come out in the order they were stored at the tail. An event put
/// back at the head (its handling hit a transient store error) comes out
/// before everything already queued.
#[derive(Debug, Default)]
pub struct EventRepository {
    events: Mutex<VecDeque<Event>>,
}

impl EventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store_event_to_tail(&self, event: Event) {
        debug!(%event, "event stored to tail");
        self.events.lock().push_back(event);
    }

    pub fn store_event_to_head(&self, event: Event) {
        debug!(%event, "event stored to head");
        self.events.lock().push_front(event);
    }

    pub fn poll_event(&self) -> Option<Event> {
        self.events.lock().pop_front()
    }

    pub fn event_size(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.event_size() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{TaskOperation, WorkflowOperation};

    #[test]
    fn tail_events_are_fifo() {
        let repo = EventRepository::new();
        repo.store_event_to_tail(Event::task(1, 1, TaskOperation::Run));
        repo.store_event_to_tail(Event::task(1, 2, TaskOperation::Run));

        assert_eq!(repo.event_size(), 2);
        assert_eq!(repo.poll_event().unwrap().task_instance_id(), Some(1));
        assert_eq!(repo.poll_event().unwrap().task_instance_id(), Some(2));
        assert!(repo.poll_event().is_none());
    }

    #[test]
    fn head_event_jumps_the_queue() {
        let repo = EventRepository::new();
        repo.store_event_to_tail(Event::task(1, 1, TaskOperation::Run));
        repo.store_event_to_tail(Event::task(1, 2, TaskOperation::Run));
        repo.store_event_to_head(Event::workflow(1, WorkflowOperation::Trigger));

        let first = repo.poll_event().unwrap();
        assert!(first.task_instance_id().is_none());
        assert_eq!(repo.poll_event().unwrap().task_instance_id(), Some(1));
    }
}
