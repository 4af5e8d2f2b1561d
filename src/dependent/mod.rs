// src/dependent/mod.rs

//! Cross-workflow dependencies of DEPENDENT tasks.
//!
//! A DEPENDENT task succeeds once the workflows (or single tasks) it points
//! at have succeeded within the configured date windows. Items are grouped;
//! items inside a group and the groups themselves combine with AND/OR.

pub mod date;
pub mod executor;
pub mod model;
pub mod resolver;

pub use date::{DateInterval, date_intervals};
pub use executor::DependentTaskExecutor;
pub use model::{
    DependResult, DependentCycle, DependentFailurePolicy, DependentItem, DependentParameters,
    DependentRelation, DependentTarget, DependentTaskModel,
};
pub use resolver::DependentResolver;
