// src/engine/mod.rs

//! Workflow execution engine.
//!
//! - [`WorkflowEngine`] is the public facade: create, trigger, pause, kill,
//!   finalize and fail over workflow instances.
//! - [`EventEngine`] scans registered workflows and hands their pending
//!   events to the [`EventFirer`], which runs the handlers in
//!   [`handlers`].
//! - [`DagEngine`] decides which tasks may run next.
//! - Runnables ([`TaskExecutionRunnable`], [`WorkflowExecutionRunnable`])
//!   carry the in-memory state of running instances.

pub mod context;
pub mod dag_engine;
pub mod event_engine;
pub mod firer;
pub mod handlers;
pub mod registry;
pub mod task_runnable;
pub mod workflow_engine;
pub mod workflow_runnable;

pub use context::EngineContext;
pub use dag_engine::DagEngine;
pub use event_engine::EventEngine;
pub use firer::EventFirer;
pub use handlers::{EventHandler, EventHandlerTable, refresh_workflow_state};
pub use registry::WorkflowRegistry;
pub use task_runnable::{TaskExecutionRunnable, TaskExecutionRunnableFactory};
pub use workflow_engine::{
    REPORT_CHANNEL_CAPACITY, TriggerOptions, WorkflowEngine, report_channel,
};
pub use workflow_runnable::{WorkflowExecutionContext, WorkflowExecutionRunnable};
