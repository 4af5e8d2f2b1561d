// tests/dispatch.rs

mod common;
use crate::common::{Harness, wait_until};

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use dagflow::config::DispatchSettings;
use dagflow::dispatch::{
    DispatchConsumer, DispatchOutcome, TaskExecuteRequest, TaskPriority, TaskPriorityQueue,
    WorkerRegistry,
};
use dagflow::engine::report_channel;
use dagflow::store::{InstanceStore, MemoryStore, TaskInstance, local_now};
use dagflow::types::{Priority, TaskState, TaskType, WorkflowInstanceId, WorkflowState};
use dagflow_test_utils::builders::{TaskDefinitionBuilder, WorkflowDefinitionBuilder};
use dagflow_test_utils::fake_transport::{FakeBehaviour, FakeTransport};
use dagflow_test_utils::flaky_store::FlakyStore;
use dagflow_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn settings(batch_size: usize) -> DispatchSettings {
    DispatchSettings {
        batch_size,
        max_retry_times: 3,
        retry_backoff: Duration::ZERO,
        poll_timeout: Duration::from_millis(10),
    }
}

/// Persist a SUBMITTED task instance and build the queue item for it.
fn submitted(
    store: &MemoryStore,
    workflow_instance_id: WorkflowInstanceId,
    name: &str,
    workflow_priority: Priority,
    state: TaskState,
) -> TaskPriority {
    let instance = store
        .insert_task_instance(TaskInstance {
            id: 0,
            workflow_instance_id,
            task_code: 1,
            name: name.to_string(),
            task_type: TaskType::Shell,
            state,
            priority: Priority::Medium,
            worker_group: "default".to_string(),
            host: None,
            retry_times: 0,
            max_retry_times: 0,
            failover: false,
            submit_time: local_now(),
            start_time: None,
            end_time: None,
        })
        .expect("store available");
    TaskPriority::new(
        workflow_priority,
        Priority::Medium,
        TaskExecuteRequest {
            workflow_instance_id,
            task_instance_id: instance.id,
            task_code: 1,
            task_name: name.to_string(),
            task_type: TaskType::Shell,
            command: Some(format!("echo {name}")),
            worker_group: "default".to_string(),
        },
    )
}

struct Fixture {
    store: Arc<MemoryStore>,
    queue: Arc<TaskPriorityQueue>,
    transport: Arc<FakeTransport>,
    consumer: DispatchConsumer,
    // Keeps the report channel open for the fake transport.
    _reports: tokio::sync::mpsc::Receiver<dagflow::event::TaskExecutionReport>,
}

fn fixture(hosts: &[&str], batch_size: usize) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    fixture_through(store.clone(), store, hosts, settings(batch_size))
}

fn fixture_through(
    store: Arc<MemoryStore>,
    consumer_store: Arc<dyn InstanceStore>,
    hosts: &[&str],
    settings: DispatchSettings,
) -> Fixture {
    init_tracing();
    let (tx, rx) = report_channel();
    let queue = Arc::new(TaskPriorityQueue::new());
    let transport = Arc::new(FakeTransport::new(tx));
    let workers = Arc::new(WorkerRegistry::new());
    for host in hosts {
        workers.register_worker("default", host);
    }
    let consumer = DispatchConsumer::new(
        Arc::clone(&queue),
        consumer_store,
        workers,
        transport.clone(),
        settings,
    );
    Fixture {
        store,
        queue,
        transport,
        consumer,
        _reports: rx,
    }
}

#[tokio::test]
async fn fourth_dispatch_failure_demotes_task_to_pending() -> TestResult {
    let f = fixture(&[], 10);
    let item = submitted(&f.store, 1, "A", Priority::Medium, TaskState::Submitted);
    let task_instance_id = item.task_instance_id;
    f.queue.push(item);

    for attempt in 1..=3 {
        let outcomes = f.consumer.run_cycle().await;
        assert_eq!(outcomes, vec![DispatchOutcome::Deferred], "attempt {attempt}");
        assert_eq!(f.consumer.failed_len(), 1);
    }

    let outcomes = f.consumer.run_cycle().await;
    assert_eq!(outcomes, vec![DispatchOutcome::Demoted]);
    assert_eq!(f.consumer.failed_len(), 0);
    let state = f.store.task_instance(task_instance_id)?.map(|t| t.state);
    assert_eq!(state, Some(TaskState::Pending));
    assert_eq!(f.transport.attempts(), 0);
    Ok(())
}

#[tokio::test]
async fn stale_items_are_dropped() -> TestResult {
    let f = fixture(&["worker-1"], 10);
    f.queue
        .push(submitted(&f.store, 1, "killed", Priority::Medium, TaskState::Killed));

    let outcomes = f.consumer.run_cycle().await;
    assert_eq!(outcomes, vec![DispatchOutcome::Stale]);
    assert_eq!(f.transport.attempts(), 0);
    assert_eq!(f.consumer.failed_len(), 0);
    Ok(())
}

#[tokio::test]
async fn most_urgent_workflow_dispatches_first() -> TestResult {
    let f = fixture(&["worker-1"], 10);
    f.queue
        .push(submitted(&f.store, 1, "low", Priority::Low, TaskState::Submitted));
    f.queue
        .push(submitted(&f.store, 2, "highest", Priority::Highest, TaskState::Submitted));
    f.queue
        .push(submitted(&f.store, 3, "medium", Priority::Medium, TaskState::Submitted));

    let outcomes = f.consumer.run_cycle().await;
    assert_eq!(outcomes.len(), 3);
    assert_eq!(f.transport.dispatched_names(), vec!["highest", "medium", "low"]);
    Ok(())
}

#[tokio::test]
async fn cycle_takes_at_most_one_batch() -> TestResult {
    let f = fixture(&["worker-1"], 2);
    for name in ["a", "b", "c"] {
        f.queue
            .push(submitted(&f.store, 1, name, Priority::Medium, TaskState::Submitted));
    }

    assert_eq!(f.consumer.run_cycle().await.len(), 2);
    assert_eq!(f.queue.len(), 1);
    assert_eq!(f.consumer.run_cycle().await.len(), 1);
    assert!(f.queue.is_empty());
    Ok(())
}

#[tokio::test]
async fn dispatched_task_records_host() -> TestResult {
    let f = fixture(&["worker-1"], 10);
    let item = submitted(&f.store, 1, "A", Priority::Medium, TaskState::Submitted);
    let task_instance_id = item.task_instance_id;
    f.queue.push(item);

    let outcomes = f.consumer.run_cycle().await;
    assert_eq!(
        outcomes,
        vec![DispatchOutcome::Dispatched {
            host: "worker-1".to_string()
        }]
    );
    let instance = f.store.task_instance(task_instance_id)?.expect("persisted");
    assert_eq!(instance.state, TaskState::Dispatched);
    assert_eq!(instance.host.as_deref(), Some("worker-1"));
    Ok(())
}

#[tokio::test]
async fn failed_retries_share_the_cycle_budget() -> TestResult {
    let store = Arc::new(MemoryStore::new());
    let f = fixture_through(
        store.clone(),
        store,
        &[],
        DispatchSettings {
            max_retry_times: 10,
            ..settings(2)
        },
    );
    let mut ids = Vec::new();
    for name in ["a", "b", "c", "d", "e", "f"] {
        let item = submitted(&f.store, 1, name, Priority::Medium, TaskState::Submitted);
        ids.push(item.task_instance_id);
        f.queue.push(item);
    }

    for cycle in 0..40 {
        let handled = f.consumer.run_cycle().await.len();
        assert!(handled <= 2, "cycle {cycle} handled {handled} items");
    }

    assert!(f.queue.is_empty());
    assert_eq!(f.consumer.failed_len(), 0);
    for id in ids {
        assert_eq!(f.store.task_instance(id)?.map(|t| t.state), Some(TaskState::Pending));
    }
    Ok(())
}

#[tokio::test]
async fn demotion_store_error_keeps_item_queued() -> TestResult {
    let store = Arc::new(MemoryStore::new());
    let flaky = Arc::new(FlakyStore::new(store.clone()));
    let f = fixture_through(store, flaky.clone(), &[], settings(10));
    let item = submitted(&f.store, 1, "A", Priority::Medium, TaskState::Submitted);
    let task_instance_id = item.task_instance_id;
    f.queue.push(item);

    for _ in 1..=3 {
        assert_eq!(f.consumer.run_cycle().await, vec![DispatchOutcome::Deferred]);
    }

    flaky.fail_transitions_to(TaskState::Pending, 1);
    assert_eq!(f.consumer.run_cycle().await, vec![DispatchOutcome::Deferred]);
    assert_eq!(f.consumer.failed_len(), 1);
    let state = f.store.task_instance(task_instance_id)?.map(|t| t.state);
    assert_eq!(state, Some(TaskState::Submitted));

    assert_eq!(f.consumer.run_cycle().await, vec![DispatchOutcome::Demoted]);
    assert_eq!(f.consumer.failed_len(), 0);
    let state = f.store.task_instance(task_instance_id)?.map(|t| t.state);
    assert_eq!(state, Some(TaskState::Pending));
    Ok(())
}

#[tokio::test]
async fn pending_task_runs_once_a_worker_joins() -> TestResult {
    let h = Harness::start_with_workers(FakeBehaviour::Succeed, &[]);
    let definition = WorkflowDefinitionBuilder::new("no-workers")
        .task(TaskDefinitionBuilder::shell("A", "echo A"))
        .build();
    let workflow = h.submit(definition)?;
    let id = workflow.id();

    wait_until(|| h.latest_task(id, "A").is_some_and(|t| t.state == TaskState::Pending)).await;
    assert_eq!(workflow.state(), WorkflowState::Running);

    h.workers.register_worker("default", "late-worker");

    assert_eq!(with_timeout(workflow.wait_until_finished()).await, WorkflowState::Success);
    assert_eq!(h.task_instances(id, "A").len(), 1);
    assert_eq!(h.latest_task(id, "A").and_then(|t| t.host), Some("late-worker".to_string()));
    h.stop().await;
    Ok(())
}

#[tokio::test]
async fn pending_task_stays_pending_without_workers() -> TestResult {
    let h = Harness::start_with_workers(FakeBehaviour::Succeed, &[]);
    let definition = WorkflowDefinitionBuilder::new("still-no-workers")
        .task(TaskDefinitionBuilder::shell("A", "echo A"))
        .build();
    let workflow = h.submit(definition)?;
    let id = workflow.id();

    wait_until(|| h.latest_task(id, "A").is_some_and(|t| t.state == TaskState::Pending)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(h.latest_task(id, "A").map(|t| t.state), Some(TaskState::Pending));
    assert_eq!(workflow.state(), WorkflowState::Running);
    assert_eq!(h.transport.attempts(), 0);

    h.engine.kill_workflow(id)?;
    assert_eq!(with_timeout(workflow.wait_until_finished()).await, WorkflowState::Stop);
    h.stop().await;
    Ok(())
}
