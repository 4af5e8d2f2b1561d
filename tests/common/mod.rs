#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use dagflow::config::EngineSettings;
use dagflow::dispatch::WorkerRegistry;
use dagflow::engine::{TriggerOptions, WorkflowEngine, WorkflowExecutionRunnable, report_channel};
use dagflow::store::{InstanceStore, MemoryStore, ProjectDefinition, TaskInstance, WorkflowDefinition};
use dagflow::types::WorkflowInstanceId;
use dagflow_test_utils::builders::fast_settings;
use dagflow_test_utils::fake_transport::{FakeBehaviour, FakeTransport};
use dagflow_test_utils::{init_tracing, with_timeout};

pub const PROJECT_CODE: i64 = 1;

/// A started engine wired to an in-memory store and a fake worker fleet with
/// one host in the `default` group.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub transport: Arc<FakeTransport>,
    pub workers: Arc<WorkerRegistry>,
    pub engine: WorkflowEngine,
}

impl Harness {
    pub fn start(behaviour: FakeBehaviour) -> Self {
        Self::start_with_workers(behaviour, &["worker-1"])
    }

    pub fn start_with_workers(behaviour: FakeBehaviour, hosts: &[&str]) -> Self {
        let store = Self::project_store();
        Self::build(store.clone(), store, fast_settings(), behaviour, hosts)
    }

    /// A second engine over an existing store.
    pub fn start_on(store: Arc<MemoryStore>, behaviour: FakeBehaviour) -> Self {
        Self::build(store.clone(), store, fast_settings(), behaviour, &["worker-1"])
    }

    /// An engine that reaches `store` through `engine_store`, e.g. a
    /// fault-injecting wrapper. Helpers read `store` directly.
    pub fn start_through(
        store: Arc<MemoryStore>,
        engine_store: Arc<dyn InstanceStore>,
        settings: EngineSettings,
        behaviour: FakeBehaviour,
    ) -> Self {
        Self::build(store, engine_store, settings, behaviour, &["worker-1"])
    }

    pub fn project_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.register_project(ProjectDefinition {
            code: PROJECT_CODE,
            name: "project".to_string(),
        });
        store
    }

    fn build(
        store: Arc<MemoryStore>,
        engine_store: Arc<dyn InstanceStore>,
        settings: EngineSettings,
        behaviour: FakeBehaviour,
        hosts: &[&str],
    ) -> Self {
        init_tracing();
        let (report_tx, report_rx) = report_channel();
        let transport = Arc::new(FakeTransport::with_default(report_tx.clone(), behaviour));

        let workers = Arc::new(WorkerRegistry::new());
        for host in hosts {
            workers.register_worker("default", host);
        }

        let engine = WorkflowEngine::new(
            engine_store,
            Arc::clone(&workers),
            transport.clone(),
            settings,
            (report_tx, report_rx),
        );
        engine.start();

        Self {
            store,
            transport,
            workers,
            engine,
        }
    }

    /// Register the definition, create an instance and trigger it.
    pub fn submit(
        &self,
        definition: WorkflowDefinition,
    ) -> anyhow::Result<Arc<WorkflowExecutionRunnable>> {
        self.submit_with(definition, TriggerOptions::default())
    }

    pub fn submit_with(
        &self,
        definition: WorkflowDefinition,
        options: TriggerOptions,
    ) -> anyhow::Result<Arc<WorkflowExecutionRunnable>> {
        self.store.register_workflow_definition(definition.clone());
        let workflow = self
            .engine
            .create_workflow_instance(Arc::new(definition), options)?;
        self.engine.trigger_workflow(Arc::clone(&workflow))?;
        Ok(workflow)
    }

    /// Every persisted instance of task `name`, oldest first.
    pub fn task_instances(&self, workflow_id: WorkflowInstanceId, name: &str) -> Vec<TaskInstance> {
        let mut tasks: Vec<_> = self
            .store
            .task_instances_of_workflow(workflow_id)
            .expect("store available")
            .into_iter()
            .filter(|t| t.name == name)
            .collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    pub fn latest_task(&self, workflow_id: WorkflowInstanceId, name: &str) -> Option<TaskInstance> {
        self.task_instances(workflow_id, name).pop()
    }

    pub async fn stop(self) {
        self.engine.shutdown().await;
    }
}

/// Poll `condition` until it holds; panics after the test timeout.
pub async fn wait_until<F>(condition: F)
where
    F: Fn() -> bool,
{
    with_timeout(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
}
