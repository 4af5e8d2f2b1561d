// tests/event_engine.rs

mod common;
use crate::common::Harness;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use dagflow::config::EngineSettings;
use dagflow::types::WorkflowState;
use dagflow_test_utils::builders::{TaskDefinitionBuilder, WorkflowDefinitionBuilder, fast_settings};
use dagflow_test_utils::fake_transport::FakeBehaviour;
use dagflow_test_utils::flaky_store::FlakyStore;
use dagflow_test_utils::with_timeout;

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn failed_fire_cycle_backs_off_before_next_scan() -> TestResult {
    let store = Harness::project_store();
    let flaky = Arc::new(FlakyStore::new(store.clone()));
    let settings = EngineSettings {
        error_backoff: Duration::from_millis(250),
        ..fast_settings()
    };
    let h = Harness::start_through(store, flaky.clone(), settings, FakeBehaviour::Succeed);

    let definition = WorkflowDefinitionBuilder::new("backoff")
        .task(TaskDefinitionBuilder::shell("A", "echo A"))
        .build();
    h.store.register_workflow_definition(definition.clone());
    let workflow = h
        .engine
        .create_workflow_instance(Arc::new(definition), Default::default())?;

    flaky.set_failing(true);
    h.engine.trigger_workflow(Arc::clone(&workflow))?;
    tokio::time::sleep(Duration::from_millis(400)).await;

    // Idle ticks are 20ms; without the backoff this would be dozens.
    let rejected = flaky.rejected_calls();
    assert!((1..=3).contains(&rejected), "rejected {rejected} store calls");
    assert_eq!(workflow.state(), WorkflowState::Running);

    flaky.set_failing(false);
    assert_eq!(with_timeout(workflow.wait_until_finished()).await, WorkflowState::Success);
    assert_eq!(h.transport.dispatched_names(), vec!["A"]);
    h.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_fire_cycle_per_workflow_at_a_time() -> TestResult {
    let store = Harness::project_store();
    let flaky = Arc::new(FlakyStore::new(store.clone()));
    flaky.set_insert_delay(Duration::from_millis(15));
    let h = Harness::start_through(store, flaky.clone(), fast_settings(), FakeBehaviour::Succeed);

    let mut builder = WorkflowDefinitionBuilder::new("wide");
    for i in 1..=4 {
        builder = builder
            .task(TaskDefinitionBuilder::shell(&format!("R{i}"), "echo root"))
            .task(TaskDefinitionBuilder::shell(&format!("S{i}"), "echo next").after(&format!("R{i}")));
    }
    let workflow = h.submit(builder.build())?;

    assert_eq!(with_timeout(workflow.wait_until_finished()).await, WorkflowState::Success);
    assert_eq!(h.transport.dispatched_names().len(), 8);
    // Task instances are only created inside fire cycles.
    assert_eq!(flaky.peak_inserts_in_flight(), 1);
    h.stop().await;
    Ok(())
}
