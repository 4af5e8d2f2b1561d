// src/dag/mod.rs

//! DAG representation and per-instance execution state.
//!
//! - [`graph`] holds the immutable task DAG of one workflow definition.
//! - [`execution`] layers the live state of one workflow instance on top:
//!   trigger guard, node outcomes and active task runnables.

pub mod execution;
pub mod graph;

pub use execution::{Triggerability, WorkflowExecutionGraph};
pub use graph::{DagNode, WorkflowDag};
