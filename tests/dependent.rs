// tests/dependent.rs

mod common;
use crate::common::{Harness, PROJECT_CODE, wait_until};

use std::error::Error;
use std::time::Duration;

use dagflow::dependent::{
    DependentCycle, DependentFailurePolicy, DependentItem, DependentParameters, DependentRelation,
    DependentTaskModel,
};
use dagflow::event::{TaskExecutionReport, TaskExecutionStatus};
use dagflow::exec::MASTER_HOST;
use dagflow::store::WorkflowDefinition;
use dagflow::types::{Code, TaskState, WorkflowState};
use dagflow_test_utils::builders::{TaskDefinitionBuilder, WorkflowDefinitionBuilder};
use dagflow_test_utils::fake_transport::FakeBehaviour;
use dagflow_test_utils::with_timeout;

type TestResult = Result<(), Box<dyn Error>>;

const UPSTREAM: Code = 10;
const DOWNSTREAM: Code = 20;

fn on_workflow(definition_code: Code, task_code: Option<Code>) -> DependentItem {
    DependentItem {
        project_code: PROJECT_CODE,
        definition_code,
        task_code,
        cycle: DependentCycle::Day,
        date_value: "today".to_string(),
    }
}

fn parameters(relation: DependentRelation, items: Vec<DependentItem>) -> DependentParameters {
    DependentParameters {
        relation: DependentRelation::And,
        groups: vec![DependentTaskModel { relation, items }],
        failure_policy: DependentFailurePolicy::Fail,
        failure_waiting_time: None,
        check_interval: None,
    }
}

fn upstream() -> WorkflowDefinition {
    WorkflowDefinitionBuilder::new("upstream")
        .code(UPSTREAM)
        .task(TaskDefinitionBuilder::shell("X", "sleep 60").code(1001))
        .build()
}

fn downstream(dependence: DependentParameters) -> WorkflowDefinition {
    WorkflowDefinitionBuilder::new("downstream")
        .code(DOWNSTREAM)
        .task(TaskDefinitionBuilder::dependent("D", dependence).code(2001))
        .build()
}

#[tokio::test]
async fn dependent_task_waits_for_upstream_success() -> TestResult {
    let h = Harness::start(FakeBehaviour::Hold);
    let up = h.submit(upstream())?;
    wait_until(|| h.latest_task(up.id(), "X").is_some_and(|t| t.state == TaskState::Running)).await;

    let down = h.submit(downstream(parameters(
        DependentRelation::And,
        vec![on_workflow(UPSTREAM, None)],
    )))?;
    wait_until(|| h.latest_task(down.id(), "D").is_some_and(|t| t.state == TaskState::Running)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let d = h.latest_task(down.id(), "D").expect("D persisted");
    assert_eq!(d.state, TaskState::Running);
    assert_eq!(d.host.as_deref(), Some(MASTER_HOST));
    assert_eq!(down.state(), WorkflowState::Running);

    let x = h.latest_task(up.id(), "X").expect("X persisted");
    h.engine.report_task_execution(TaskExecutionReport {
        workflow_instance_id: up.id(),
        task_instance_id: x.id,
        status: TaskExecutionStatus::Success,
    });

    assert_eq!(with_timeout(up.wait_until_finished()).await, WorkflowState::Success);
    assert_eq!(with_timeout(down.wait_until_finished()).await, WorkflowState::Success);
    assert_eq!(h.latest_task(down.id(), "D").map(|t| t.state), Some(TaskState::Success));
    assert_eq!(h.transport.dispatched_names(), vec!["X"]);
    h.stop().await;
    Ok(())
}

#[tokio::test]
async fn single_task_dependency_follows_that_task() -> TestResult {
    let h = Harness::start(FakeBehaviour::Succeed);
    let up = h.submit(upstream())?;
    assert_eq!(with_timeout(up.wait_until_finished()).await, WorkflowState::Success);

    let down = h.submit(downstream(parameters(
        DependentRelation::And,
        vec![on_workflow(UPSTREAM, Some(1001))],
    )))?;
    assert_eq!(with_timeout(down.wait_until_finished()).await, WorkflowState::Success);
    h.stop().await;
    Ok(())
}

#[tokio::test]
async fn failed_upstream_fails_dependent_task() -> TestResult {
    let h = Harness::start(FakeBehaviour::Fail);
    let up = h.submit(upstream())?;
    assert_eq!(with_timeout(up.wait_until_finished()).await, WorkflowState::Failed);

    let down = h.submit(downstream(parameters(
        DependentRelation::And,
        vec![on_workflow(UPSTREAM, None)],
    )))?;
    assert_eq!(with_timeout(down.wait_until_finished()).await, WorkflowState::Failed);
    assert_eq!(h.latest_task(down.id(), "D").map(|t| t.state), Some(TaskState::Failed));
    h.stop().await;
    Ok(())
}

#[tokio::test]
async fn or_group_succeeds_on_any_satisfied_item() -> TestResult {
    let h = Harness::start(FakeBehaviour::Succeed);
    let up = h.submit(upstream())?;
    assert_eq!(with_timeout(up.wait_until_finished()).await, WorkflowState::Success);

    let never_ran = WorkflowDefinitionBuilder::new("never-ran")
        .code(30)
        .task(TaskDefinitionBuilder::shell("Y", "echo Y"))
        .build();
    h.store.register_workflow_definition(never_ran);

    let down = h.submit(downstream(parameters(
        DependentRelation::Or,
        vec![on_workflow(30, None), on_workflow(UPSTREAM, None)],
    )))?;
    assert_eq!(with_timeout(down.wait_until_finished()).await, WorkflowState::Success);
    h.stop().await;
    Ok(())
}

#[tokio::test]
async fn misconfigured_dependency_fails_without_retry() -> TestResult {
    let h = Harness::start(FakeBehaviour::Succeed);
    let definition = WorkflowDefinitionBuilder::new("broken")
        .code(DOWNSTREAM)
        .task(
            TaskDefinitionBuilder::dependent(
                "D",
                parameters(DependentRelation::And, vec![on_workflow(999, None)]),
            )
            .retries(3, Duration::from_millis(10)),
        )
        .build();

    let workflow = h.submit(definition)?;
    assert_eq!(with_timeout(workflow.wait_until_finished()).await, WorkflowState::Failed);

    let attempts = h.task_instances(workflow.id(), "D");
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].state, TaskState::Failed);
    h.stop().await;
    Ok(())
}
