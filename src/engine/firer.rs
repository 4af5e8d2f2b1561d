// src/engine/firer.rs

use std::sync::Arc;

use tokio::sync::{Semaphore, watch};
use tracing::{debug, error, warn};

use super::context::EngineContext;
use super::handlers::EventHandlerTable;
use super::workflow_runnable::WorkflowExecutionRunnable;
use crate::errors::{DagflowError, Result};
use crate::event::Event;

/// Drains workflow event queues on a bounded pool.
///
/// A fire cycle holds one pool permit while it handles the synchronous
/// events of one workflow in order. Async events are handed to their own
/// tokio task, which waits for the event's fire-at deadline and then takes a
/// permit of its own.
pub struct EventFirer {
    ctx: Arc<EngineContext>,
    handlers: Arc<EventHandlerTable>,
    pool: Arc<Semaphore>,
    pool_size: u32,
    shutdown: watch::Sender<bool>,
}

impl EventFirer {
    pub fn new(ctx: Arc<EngineContext>, handlers: EventHandlerTable) -> Self {
        let pool_size =
            u32::try_from(ctx.settings.effective_firer_pool_size().max(1)).unwrap_or(u32::MAX);
        let (shutdown, _) = watch::channel(false);
        Self {
            ctx,
            handlers: Arc::new(handlers),
            pool: Arc::new(Semaphore::new(pool_size as usize)),
            pool_size,
            shutdown,
        }
    }

    /// Fire the pending events of `workflow`. Returns how many were fired.
    ///
    /// A `StoreUnavailable` error puts the failing event back at the head of
    /// the queue and ends the cycle; so does any other error, minus the
    /// reinsertion.
    pub async fn fire_active_events(&self, workflow: &Arc<WorkflowExecutionRunnable>) -> Result<usize> {
        let events = workflow.context().events();
        if events.is_empty() {
            return Ok(0);
        }

        let _permit = Arc::clone(&self.pool)
            .acquire_owned()
            .await
            .map_err(|_| DagflowError::ShutDown)?;

        let mut fired = 0;
        while let Some(event) = events.poll_event() {
            if event.is_async() {
                self.fire_async(Arc::clone(workflow), event);
                fired += 1;
                continue;
            }

            match self.handlers.handle(&self.ctx, workflow, &event) {
                Ok(()) => fired += 1,
                Err(err) if err.is_store_unavailable() => {
                    warn!(
                        workflow_instance_id = workflow.id(),
                        %event,
                        error = %err,
                        "store unavailable; event put back at head"
                    );
                    events.store_event_to_head(event);
                    return Err(err);
                }
                Err(err) => {
                    error!(
                        workflow_instance_id = workflow.id(),
                        %event,
                        error = %err,
                        "event handling failed"
                    );
                    return Err(err);
                }
            }
        }
        Ok(fired)
    }

    fn fire_async(&self, workflow: Arc<WorkflowExecutionRunnable>, event: Event) {
        let ctx = Arc::clone(&self.ctx);
        let handlers = Arc::clone(&self.handlers);
        let pool = Arc::clone(&self.pool);
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            if let Some(fire_at) = event.fire_at() {
                tokio::select! {
                    _ = tokio::time::sleep_until(fire_at) => {}
                    _ = shutdown.changed() => {
                        debug!(%event, "firer shutting down; delayed event put back");
                        workflow.context().events().store_event_to_head(event);
                        return;
                    }
                }
            }

            let Ok(_permit) = pool.acquire_owned().await else {
                workflow.context().events().store_event_to_head(event);
                return;
            };

            match handlers.handle(&ctx, &workflow, &event) {
                Ok(()) => {}
                Err(err) if err.is_store_unavailable() => {
                    warn!(
                        workflow_instance_id = workflow.id(),
                        %event,
                        error = %err,
                        "store unavailable; async event put back at head"
                    );
                    workflow.context().events().store_event_to_head(event);
                }
                Err(err) => {
                    error!(
                        workflow_instance_id = workflow.id(),
                        %event,
                        error = %err,
                        "async event handling failed"
                    );
                }
            }
            ctx.wake();
        });
    }

    /// Stop taking work and wait for in-flight cycles to finish.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        if let Ok(all) = self.pool.acquire_many(self.pool_size).await {
            drop(all);
        }
        self.pool.close();
        debug!("event firer pool closed");
    }
}
