// src/config/mod.rs

//! Configuration loading and validation.
//!
//! A TOML file describes one workflow (`[workflow]`, `[task.<name>]`) plus the
//! engine knobs (`[engine]`, `[dispatch]`, `[dependent]`) and the worker fleet
//! (`[workers]`). [`ConfigFile`] turns into the runtime types the engine uses:
//! [`EngineSettings`] and a [`WorkflowDefinition`].

pub mod duration;
pub mod loader;
pub mod model;
pub mod settings;
pub mod validate;

use crate::errors::{DagflowError, Result};
use crate::store::{TaskDefinition, WorkflowDefinition};

pub use duration::parse_duration;
pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{ConfigFile, RawConfigFile, TaskConfig};
pub use settings::{DispatchSettings, EngineSettings};

fn duration_field(field: &str, value: &str) -> Result<std::time::Duration> {
    parse_duration(value).map_err(|e| DagflowError::ConfigError(format!("{field}: {e}")))
}

impl ConfigFile {
    pub fn settings(&self) -> Result<EngineSettings> {
        Ok(EngineSettings {
            idle_interval: duration_field("[engine].idle_interval", &self.engine.idle_interval)?,
            error_backoff: duration_field("[engine].error_backoff", &self.engine.error_backoff)?,
            firer_pool_size: self.engine.firer_pool_size,
            dependent_check_interval: duration_field(
                "[dependent].check_interval",
                &self.dependent.check_interval,
            )?,
            dispatch: DispatchSettings {
                batch_size: self.dispatch.batch_size,
                max_retry_times: self.dispatch.max_retry_times,
                retry_backoff: duration_field(
                    "[dispatch].retry_backoff",
                    &self.dispatch.retry_backoff,
                )?,
                poll_timeout: duration_field(
                    "[dispatch].poll_timeout",
                    &self.dispatch.poll_timeout,
                )?,
            },
        })
    }

    /// Build the workflow definition described by `[workflow]` and
    /// `[task.*]`. Task codes are assigned 1.. in task-name order.
    pub fn to_workflow_definition(&self) -> Result<WorkflowDefinition> {
        let mut tasks = Vec::with_capacity(self.task.len());
        for (index, (name, task)) in self.task.iter().enumerate() {
            tasks.push(TaskDefinition {
                code: index as i64 + 1,
                name: name.clone(),
                task_type: task.task_type,
                command: task.cmd.clone(),
                after: task.after.clone(),
                skip: task.skip,
                priority: task.priority,
                worker_group: task.worker_group.clone(),
                max_retry_times: task.retries,
                retry_interval: duration_field(
                    &format!("[task.{name}].retry_interval"),
                    &task.retry_interval,
                )?,
                dependence: task.dependence.clone(),
            });
        }

        Ok(WorkflowDefinition {
            code: self.workflow.code,
            project_code: self.workflow.project_code,
            name: self.workflow.name.clone(),
            version: 1,
            tasks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn converts_into_runtime_types() {
        let raw: RawConfigFile = toml::from_str(
            r#"
            [engine]
            idle_interval = "50ms"

            [dispatch]
            max_retry_times = 5

            [workflow]
            name = "nightly"
            priority = "high"

            [task.load]
            cmd = "echo load"
            after = ["extract"]
            retries = 2
            retry_interval = "2s"

            [task.extract]
            cmd = "echo extract"
            "#,
        )
        .unwrap();
        let cfg = ConfigFile::try_from(raw).unwrap();

        let settings = cfg.settings().unwrap();
        assert_eq!(settings.idle_interval, Duration::from_millis(50));
        assert_eq!(settings.dispatch.max_retry_times, 5);
        assert_eq!(settings.dependent_check_interval, Duration::from_secs(10));

        let def = cfg.to_workflow_definition().unwrap();
        assert_eq!(def.name, "nightly");
        assert_eq!(def.task("extract").unwrap().code, 1);
        let load = def.task("load").unwrap();
        assert_eq!(load.code, 2);
        assert_eq!(load.max_retry_times, 2);
        assert_eq!(load.retry_interval, Duration::from_secs(2));
        assert_eq!(load.after, vec!["extract".to_string()]);
    }
}
