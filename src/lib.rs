// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod dependent;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod event;
pub mod exec;
pub mod logging;
pub mod store;
pub mod types;

use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_and_validate};
use crate::dispatch::WorkerRegistry;
use crate::engine::{TriggerOptions, WorkflowEngine, report_channel};
use crate::exec::LocalTransport;
use crate::store::{MemoryStore, ProjectDefinition};
use crate::types::WorkflowState;

/// Entry point used by `main.rs`.
///
/// Loads the config, runs the workflow it describes to completion on the
/// local machine and fails unless the workflow succeeded. Ctrl-C kills the
/// workflow.
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let settings = cfg.settings()?;
    let definition = Arc::new(cfg.to_workflow_definition()?);

    let store = Arc::new(MemoryStore::new());
    store.register_project(ProjectDefinition {
        code: definition.project_code,
        name: definition.name.clone(),
    });
    store.register_workflow_definition(definition.as_ref().clone());

    let workers = Arc::new(WorkerRegistry::from_groups(&cfg.workers));
    let (report_tx, report_rx) = report_channel();
    let transport = Arc::new(LocalTransport::new(report_tx.clone()));

    let engine = WorkflowEngine::new(store, workers, transport, settings, (report_tx, report_rx));
    engine.start();

    let workflow = engine.create_workflow_instance(
        Arc::clone(&definition),
        TriggerOptions {
            priority: cfg.workflow.priority,
            schedule_time: None,
            test_flag: cfg.workflow.test_flag,
        },
    )?;
    let id = workflow.id();
    engine.trigger_workflow(Arc::clone(&workflow))?;

    let state = tokio::select! {
        state = workflow.wait_until_finished() => state,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "failed to listen for Ctrl+C");
            }
            info!(workflow_instance_id = id, "interrupted; killing workflow");
            engine.kill_workflow(id)?;
            workflow.wait_until_finished().await
        }
    };

    engine.finalize_workflow(id)?;
    engine.shutdown().await;

    if state != WorkflowState::Success {
        bail!("workflow '{}' finished in state {:?}", definition.name, state);
    }
    info!(workflow_instance_id = id, "workflow succeeded");
    Ok(())
}

/// Print the workflow plan without executing anything.
fn print_dry_run(cfg: &ConfigFile) {
    println!("dagflow dry-run");
    println!(
        "  workflow = {} (priority {:?}, test_flag {})",
        cfg.workflow.name, cfg.workflow.priority, cfg.workflow.test_flag
    );
    println!("  dispatch.batch_size = {}", cfg.dispatch.batch_size);
    println!("  dispatch.max_retry_times = {}", cfg.dispatch.max_retry_times);
    println!();

    println!("workers ({}):", cfg.workers.len());
    for (group, hosts) in cfg.workers.iter() {
        println!("  - {group}: {hosts:?}");
    }
    println!();

    println!("tasks ({}):", cfg.task.len());
    for (name, task) in cfg.task.iter() {
        println!("  - {name} [{}]", task.task_type);
        if let Some(ref cmd) = task.cmd {
            println!("      cmd: {cmd}");
        }
        if !task.after.is_empty() {
            println!("      after: {:?}", task.after);
        }
        if task.skip {
            println!("      skip: true");
        }
        if task.retries > 0 {
            println!("      retries: {} every {}", task.retries, task.retry_interval);
        }
        println!("      priority: {:?}, worker_group: {}", task.priority, task.worker_group);
        if let Some(ref dependence) = task.dependence {
            for item in dependence.items() {
                println!("      depends on: {}", item.key());
            }
        }
    }

    debug!("dry-run complete (no execution)");
}
