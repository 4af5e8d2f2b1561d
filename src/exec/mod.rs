// src/exec/mod.rs

//! Task execution plumbing.
//!
//! - [`AsyncTaskExecutor`] is the contract of logic tasks the engine evaluates
//!   itself (DEPENDENT); [`poller::AsyncTaskPoller`] drives them.
//! - [`local::LocalTransport`] is a worker transport that runs shell commands
//!   on the local machine.

pub mod local;
pub mod poller;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::errors::Result;

pub use local::LocalTransport;
pub use poller::AsyncTaskPoller;

/// Host name reported for tasks the engine runs itself.
pub const MASTER_HOST: &str = "master";

/// Status of one poll of an async task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncTaskExecutionStatus {
    Running,
    Success,
    Failed,
}

/// A task that completes asynchronously and is polled for its status.
pub trait AsyncTaskExecutor: Send {
    fn async_task_execution_status(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<AsyncTaskExecutionStatus>> + Send + '_>>;

    /// Delay between two status polls.
    fn async_task_state_check_interval(&self) -> Duration;
}
