// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::types::{WorkflowInstanceId, WorkflowState};

#[derive(Error, Debug)]
pub enum DagflowError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Cycle detected in DAG: {0}")]
    DagCycle(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Workflow instance not found: {0}")]
    WorkflowNotFound(WorkflowInstanceId),

    #[error("Workflow instance {id} is {state:?}; only finished workflows can be finalized")]
    WorkflowNotFinished {
        id: WorkflowInstanceId,
        state: WorkflowState,
    },

    /// The instance store could not be reached. Event handling retries these.
    #[error("Instance store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Dependent task misconfigured: {0}")]
    DependentConfig(String),

    #[error("Engine is shut down")]
    ShutDown,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DagflowError {
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, DagflowError::StoreUnavailable(_))
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, DagflowError>;
