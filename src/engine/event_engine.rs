// src/engine/event_engine.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

use super::context::EngineContext;
use super::firer::EventFirer;
use super::workflow_runnable::WorkflowExecutionRunnable;

/// Clears a workflow's firing flag when the fire cycle ends, panics included.
struct FiringGuard(Arc<WorkflowExecutionRunnable>);

impl Drop for FiringGuard {
    fn drop(&mut self) {
        self.0.finish_firing();
    }
}

/// Background scan loop over the registered workflows.
///
/// Every scan starts a fire cycle for each workflow that has pending events
/// and no cycle in flight. Between scans the loop sleeps `idle_interval`
/// (cut short by [`EngineContext::wake`]), or `error_backoff` after a cycle
/// failed.
pub struct EventEngine {
    ctx: Arc<EngineContext>,
    firer: Arc<EventFirer>,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EventEngine {
    pub fn new(ctx: Arc<EngineContext>, firer: Arc<EventFirer>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            ctx,
            firer,
            shutdown,
            handle: Mutex::new(None),
        }
    }

    pub fn firer(&self) -> &Arc<EventFirer> {
        &self.firer
    }

    /// Spawn the scan loop. Calling it twice has no effect.
    pub fn start(&self) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }
        let ctx = Arc::clone(&self.ctx);
        let firer = Arc::clone(&self.firer);
        let shutdown = self.shutdown.subscribe();
        *handle = Some(tokio::spawn(scan_loop(ctx, firer, shutdown)));
    }

    /// Stop the scan loop, then drain and close the firer pool.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(error = %err, "event engine loop ended abnormally");
            }
        }
        self.firer.shutdown().await;
    }
}

async fn scan_loop(
    ctx: Arc<EngineContext>,
    firer: Arc<EventFirer>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("event engine started");
    let cycle_failed = Arc::new(AtomicBool::new(false));

    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        if cycle_failed.swap(false, Ordering::AcqRel) {
            debug!(backoff = ?ctx.settings.error_backoff, "backing off after failed fire cycle");
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(ctx.settings.error_backoff) => {}
            }
            continue;
        }

        let mut started = 0usize;
        for workflow in ctx.registry.active_workflows() {
            if workflow.context().events().is_empty() || !workflow.try_start_firing() {
                continue;
            }
            started += 1;

            let guard = FiringGuard(Arc::clone(&workflow));
            let firer = Arc::clone(&firer);
            let ctx = Arc::clone(&ctx);
            let cycle_failed = Arc::clone(&cycle_failed);
            tokio::spawn(async move {
                let _guard = guard;
                match firer.fire_active_events(&workflow).await {
                    Ok(fired) => {
                        trace!(workflow_instance_id = workflow.id(), fired, "fire cycle done");
                        ctx.wake();
                    }
                    Err(err) => {
                        error!(
                            workflow_instance_id = workflow.id(),
                            error = %err,
                            "fire cycle failed"
                        );
                        cycle_failed.store(true, Ordering::Release);
                        ctx.wake();
                    }
                }
            });
        }

        trace!(started, "scan done");
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ctx.woken() => {}
            _ = tokio::time::sleep(ctx.settings.idle_interval) => {}
        }
    }
    info!("event engine stopped");
}
