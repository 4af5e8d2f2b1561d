// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::dependent::DependentParameters;
use crate::types::{Priority, TaskType};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [engine]
/// idle_interval = "3s"
///
/// [dispatch]
/// batch_size = 10
/// max_retry_times = 3
///
/// [workers]
/// default = ["local"]
///
/// [workflow]
/// name = "nightly"
///
/// [task.extract]
/// cmd = "echo extract"
///
/// [task.load]
/// cmd = "echo load"
/// after = ["extract"]
/// ```
///
/// All sections but `[task.*]` are optional and have defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub dispatch: DispatchSection,

    #[serde(default)]
    pub dependent: DependentSection,

    /// Worker group name → hosts.
    #[serde(default = "default_workers")]
    pub workers: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub workflow: WorkflowSection,

    /// All tasks from `[task.<name>]`, keyed by task name.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// Validated configuration.
///
/// The only way to obtain one is `ConfigFile::try_from(RawConfigFile)`, which
/// runs the checks in [`crate::config::validate`].
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub engine: EngineSection,
    pub dispatch: DispatchSection,
    pub dependent: DependentSection,
    pub workers: BTreeMap<String, Vec<String>>,
    pub workflow: WorkflowSection,
    pub task: BTreeMap<String, TaskConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            engine: raw.engine,
            dispatch: raw.dispatch,
            dependent: raw.dependent,
            workers: raw.workers,
            workflow: raw.workflow,
            task: raw.task,
        }
    }
}

/// `[engine]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_three_seconds")]
    pub idle_interval: String,

    #[serde(default = "default_three_seconds")]
    pub error_backoff: String,

    /// `0` means twice the available parallelism.
    #[serde(default)]
    pub firer_pool_size: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            idle_interval: default_three_seconds(),
            error_backoff: default_three_seconds(),
            firer_pool_size: 0,
        }
    }
}

/// `[dispatch]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchSection {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_max_retry_times")]
    pub max_retry_times: u32,

    #[serde(default = "default_one_second")]
    pub retry_backoff: String,

    #[serde(default = "default_one_second")]
    pub poll_timeout: String,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_retry_times: default_max_retry_times(),
            retry_backoff: default_one_second(),
            poll_timeout: default_one_second(),
        }
    }
}

/// `[dependent]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DependentSection {
    #[serde(default = "default_check_interval")]
    pub check_interval: String,
}

impl Default for DependentSection {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
        }
    }
}

/// `[workflow]` section: identity of the workflow the CLI runs.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowSection {
    #[serde(default = "default_workflow_name")]
    pub name: String,

    #[serde(default = "default_code")]
    pub code: i64,

    #[serde(default = "default_code")]
    pub project_code: i64,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub test_flag: bool,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            name: default_workflow_name(),
            code: default_code(),
            project_code: default_code(),
            priority: Priority::default(),
            test_flag: false,
        }
    }
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Command for shell tasks.
    #[serde(default)]
    pub cmd: Option<String>,

    #[serde(default, rename = "type")]
    pub task_type: TaskType,

    /// Dependency list: this task waits for all tasks listed here.
    #[serde(default)]
    pub after: Vec<String>,

    /// Skipped tasks count as succeeded without running.
    #[serde(default)]
    pub skip: bool,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default = "default_worker_group")]
    pub worker_group: String,

    /// How many times a failed run is retried.
    #[serde(default)]
    pub retries: u32,

    #[serde(default = "default_one_second")]
    pub retry_interval: String,

    /// Dependency descriptor for `type = "dependent"`.
    #[serde(default)]
    pub dependence: Option<DependentParameters>,
}

fn default_workers() -> BTreeMap<String, Vec<String>> {
    let mut workers = BTreeMap::new();
    workers.insert(default_worker_group(), vec!["local".to_string()]);
    workers
}

fn default_worker_group() -> String {
    "default".to_string()
}

fn default_three_seconds() -> String {
    "3s".to_string()
}

fn default_one_second() -> String {
    "1s".to_string()
}

fn default_check_interval() -> String {
    "10s".to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_max_retry_times() -> u32 {
    3
}

fn default_workflow_name() -> String {
    "workflow".to_string()
}

fn default_code() -> i64 {
    1
}
