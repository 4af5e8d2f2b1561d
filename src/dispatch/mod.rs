// src/dispatch/mod.rs

//! Ready task instances waiting for a worker, and the consumer that ships
//! them.

pub mod consumer;
pub mod failed;
pub mod priority;
pub mod queue;
pub mod worker;

pub use consumer::{DispatchConsumer, DispatchOutcome};
pub use failed::DispatchFailedQueue;
pub use priority::{TaskExecuteRequest, TaskPriority};
pub use queue::TaskPriorityQueue;
pub use worker::{DispatchError, DispatchFuture, TaskTransport, WorkerRegistry};
