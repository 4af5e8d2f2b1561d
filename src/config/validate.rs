// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::duration::parse_duration;
use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{DagflowError, Result};
use crate::types::TaskType;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = DagflowError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_engine_config(cfg)?;
    validate_tasks(cfg)?;
    validate_task_dependencies(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(DagflowError::ConfigError(
            "config must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn check_duration(field: &str, value: &str) -> Result<()> {
    parse_duration(value)
        .map(|_| ())
        .map_err(|e| DagflowError::ConfigError(format!("{field}: {e}")))
}

fn validate_engine_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.dispatch.batch_size == 0 {
        return Err(DagflowError::ConfigError(
            "[dispatch].batch_size must be >= 1 (got 0)".to_string(),
        ));
    }

    check_duration("[engine].idle_interval", &cfg.engine.idle_interval)?;
    check_duration("[engine].error_backoff", &cfg.engine.error_backoff)?;
    check_duration("[dispatch].retry_backoff", &cfg.dispatch.retry_backoff)?;
    check_duration("[dispatch].poll_timeout", &cfg.dispatch.poll_timeout)?;
    check_duration("[dependent].check_interval", &cfg.dependent.check_interval)?;

    for (group, hosts) in cfg.workers.iter() {
        if hosts.is_empty() {
            return Err(DagflowError::ConfigError(format!(
                "[workers].{group} must list at least one host"
            )));
        }
    }

    Ok(())
}

fn validate_tasks(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        check_duration(&format!("[task.{name}].retry_interval"), &task.retry_interval)?;

        match task.task_type {
            TaskType::Shell => {
                if task.cmd.as_deref().is_none_or(|c| c.trim().is_empty()) {
                    return Err(DagflowError::ConfigError(format!(
                        "shell task '{name}' needs a non-empty `cmd`"
                    )));
                }
                if !cfg.workers.contains_key(&task.worker_group) {
                    return Err(DagflowError::ConfigError(format!(
                        "shell task '{name}' uses worker group '{}', which is not listed under [workers]",
                        task.worker_group
                    )));
                }
            }
            TaskType::Dependent => {
                if task.dependence.is_none() {
                    return Err(DagflowError::ConfigError(format!(
                        "dependent task '{name}' needs a `dependence` table"
                    )));
                }
            }
        }
    }
    Ok(())
}

fn validate_task_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            if dep == name {
                return Err(DagflowError::ConfigError(format!(
                    "task '{}' cannot depend on itself in `after`",
                    name
                )));
            }
            if !cfg.task.contains_key(dep) {
                return Err(DagflowError::ConfigError(format!(
                    "task '{}' has unknown dependency '{}' in `after`",
                    name, dep
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: dep -> task, so `after = ["A"]` on B adds A -> B.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.task.keys() {
        graph.add_node(name.as_str());
    }

    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(DagflowError::DagCycle(format!(
            "cycle detected in task DAG involving task '{}'",
            cycle.node_id()
        ))),
    }
}
