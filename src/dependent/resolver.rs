// src/dependent/resolver.rs

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::dependent::date::{DateInterval, date_intervals};
use crate::dependent::model::{
    DependResult, DependentFailurePolicy, DependentItem, DependentParameters, DependentRelation,
    DependentTarget,
};
use crate::errors::{DagflowError, Result};
use crate::store::InstanceStore;
use crate::types::{Code, TaskState, WorkflowState};

#[derive(Debug)]
struct ResolvedItem {
    key: String,
    definition_code: Code,
    target: DependentTarget,
    intervals: Vec<DateInterval>,
}

#[derive(Debug)]
struct ResolvedGroup {
    relation: DependentRelation,
    items: Vec<ResolvedItem>,
}

/// Evaluates the dependency descriptor of one DEPENDENT task instance.
///
/// Everything the descriptor references is looked up once in [`new`]; a
/// missing project, workflow definition or task definition, or a date value
/// that does not belong to its cycle, is a [`DagflowError::DependentConfig`].
/// Each [`poll`] then re-checks only the items whose result is not final yet.
///
/// [`new`]: DependentResolver::new
/// [`poll`]: DependentResolver::poll
pub struct DependentResolver {
    store: Arc<dyn InstanceStore>,
    relation: DependentRelation,
    groups: Vec<ResolvedGroup>,
    failure_policy: DependentFailurePolicy,
    failure_deadline: NaiveDateTime,
    test_flag: bool,
    finalized: HashMap<String, DependResult>,
}

impl DependentResolver {
    pub fn new(
        store: Arc<dyn InstanceStore>,
        parameters: &DependentParameters,
        business_time: NaiveDateTime,
        test_flag: bool,
        task_start_time: NaiveDateTime,
    ) -> Result<Self> {
        check_references(store.as_ref(), parameters)?;

        let mut groups = Vec::with_capacity(parameters.groups.len());
        for group in &parameters.groups {
            let mut items = Vec::with_capacity(group.items.len());
            for item in &group.items {
                items.push(resolve_item(item, business_time)?);
            }
            groups.push(ResolvedGroup {
                relation: group.relation,
                items,
            });
        }

        Ok(Self {
            store,
            relation: parameters.relation,
            groups,
            failure_policy: parameters.failure_policy,
            failure_deadline: task_start_time
                .checked_add_signed(parameters.failure_waiting_delta())
                .unwrap_or(NaiveDateTime::MAX),
            test_flag,
            finalized: HashMap::new(),
        })
    }

    /// Combined result of all groups as of `now`.
    pub fn poll(&mut self, now: NaiveDateTime) -> Result<DependResult> {
        let mut group_results = Vec::with_capacity(self.groups.len());
        for index in 0..self.groups.len() {
            let result = self.group_result(index, now)?;
            group_results.push(result);
            if result == self.relation.short_circuit() {
                break;
            }
        }
        Ok(self.relation.reduce(group_results))
    }

    fn group_result(&mut self, index: usize, now: NaiveDateTime) -> Result<DependResult> {
        let relation = self.groups[index].relation;
        let mut results = Vec::with_capacity(self.groups[index].items.len());
        for item_index in 0..self.groups[index].items.len() {
            let result = self.item_result(index, item_index, now)?;
            results.push(result);
            if result == relation.short_circuit() {
                break;
            }
        }
        Ok(relation.reduce(results))
    }

    fn item_result(
        &mut self,
        group: usize,
        item: usize,
        now: NaiveDateTime,
    ) -> Result<DependResult> {
        let item = &self.groups[group].items[item];
        if let Some(result) = self.finalized.get(&item.key) {
            return Ok(*result);
        }

        let mut results = Vec::with_capacity(item.intervals.len());
        for interval in &item.intervals {
            let result = self.interval_result(item, interval)?;
            results.push(result);
            if result == DependResult::Failed {
                break;
            }
        }
        let mut result = DependentRelation::And.reduce(results);

        if result == DependResult::Failed
            && self.failure_policy == DependentFailurePolicy::Wait
            && now < self.failure_deadline
        {
            debug!(dependent_key = %item.key, "dependency failed; still within failure waiting time");
            result = DependResult::Waiting;
        }

        if result != DependResult::Waiting {
            info!(dependent_key = %item.key, result = ?result, "dependency resolved");
            self.finalized.insert(item.key.clone(), result);
        }
        Ok(result)
    }

    fn interval_result(&self, item: &ResolvedItem, interval: &DateInterval) -> Result<DependResult> {
        let Some(workflow) = self.store.latest_workflow_instance_between(
            item.definition_code,
            interval.start,
            interval.end,
            self.test_flag,
        )?
        else {
            return Ok(DependResult::Waiting);
        };

        match item.target {
            DependentTarget::AllTasks => Ok(workflow_result(workflow.state)),
            DependentTarget::Task(code) => {
                match self.store.latest_task_instance_by_code(workflow.id, code)? {
                    None if workflow.state.is_finished() => Ok(DependResult::Failed),
                    None => Ok(DependResult::Waiting),
                    Some(task) => Ok(task_result(task.state)),
                }
            }
        }
    }
}

fn workflow_result(state: WorkflowState) -> DependResult {
    match state {
        WorkflowState::Success => DependResult::Success,
        s if s.is_finished() => DependResult::Failed,
        _ => DependResult::Waiting,
    }
}

fn task_result(state: TaskState) -> DependResult {
    match state {
        TaskState::Success => DependResult::Success,
        s if s.is_finished() => DependResult::Failed,
        _ => DependResult::Waiting,
    }
}

fn resolve_item(item: &DependentItem, business_time: NaiveDateTime) -> Result<ResolvedItem> {
    Ok(ResolvedItem {
        key: item.key(),
        definition_code: item.definition_code,
        target: item.target(),
        intervals: date_intervals(business_time, item.cycle, &item.date_value)?,
    })
}

/// Batch-load every referenced definition and fail on the first missing one.
fn check_references(store: &dyn InstanceStore, parameters: &DependentParameters) -> Result<()> {
    let mut project_codes: Vec<Code> = parameters.items().map(|i| i.project_code).collect();
    let mut definition_codes: Vec<Code> = parameters.items().map(|i| i.definition_code).collect();
    let mut task_codes: Vec<Code> = parameters
        .items()
        .filter_map(|i| match i.target() {
            DependentTarget::Task(code) => Some(code),
            DependentTarget::AllTasks => None,
        })
        .collect();
    for codes in [&mut project_codes, &mut definition_codes, &mut task_codes] {
        codes.sort_unstable();
        codes.dedup();
    }

    if parameters.groups.is_empty() || parameters.items().next().is_none() {
        return Err(DagflowError::DependentConfig(
            "dependence has no items".to_string(),
        ));
    }

    let projects = store.query_projects_by_codes(&project_codes)?;
    let definitions = store.query_workflow_definitions_by_codes(&definition_codes)?;
    let tasks = store.query_task_definitions_by_codes(&task_codes)?;

    for item in parameters.items() {
        if !projects.iter().any(|p| p.code == item.project_code) {
            return Err(DagflowError::DependentConfig(format!(
                "{}: project {} not found",
                item.key(),
                item.project_code
            )));
        }
        let Some(definition) = definitions.iter().find(|d| d.code == item.definition_code) else {
            return Err(DagflowError::DependentConfig(format!(
                "{}: workflow definition {} not found",
                item.key(),
                item.definition_code
            )));
        };
        if definition.project_code != item.project_code {
            return Err(DagflowError::DependentConfig(format!(
                "{}: workflow definition {} does not belong to project {}",
                item.key(),
                item.definition_code,
                item.project_code
            )));
        }
        if let DependentTarget::Task(code) = item.target() {
            if !tasks.iter().any(|t| t.code == code) {
                return Err(DagflowError::DependentConfig(format!(
                    "{}: task definition {} not found",
                    item.key(),
                    code
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependent::model::{DependentCycle, DependentTaskModel};
    use crate::store::{
        MemoryStore, ProjectDefinition, TaskDefinition, WorkflowDefinition, WorkflowInstance,
    };
    use crate::types::{Priority, WorkflowInstanceId};
    use chrono::NaiveDate;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 6)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.register_project(ProjectDefinition {
            code: 1,
            name: "project".to_string(),
        });
        for code in [10, 20] {
            store.register_workflow_definition(WorkflowDefinition {
                code,
                project_code: 1,
                name: format!("upstream-{code}"),
                version: 1,
                tasks: vec![TaskDefinition::shell(code + 1, "X", "echo X")],
            });
        }
        store
    }

    fn upstream(store: &MemoryStore, code: Code, state: WorkflowState) -> WorkflowInstanceId {
        store
            .insert_workflow_instance(WorkflowInstance {
                id: 0,
                name: format!("upstream-{code}"),
                definition_code: code,
                project_code: 1,
                state,
                priority: Priority::Medium,
                schedule_time: Some(at(1, 0)),
                start_time: at(1, 0),
                end_time: None,
                test_flag: false,
            })
            .unwrap()
            .id
    }

    fn today(code: Code) -> DependentItem {
        DependentItem {
            project_code: 1,
            definition_code: code,
            task_code: None,
            cycle: DependentCycle::Day,
            date_value: "today".to_string(),
        }
    }

    fn group(relation: DependentRelation, items: Vec<DependentItem>) -> DependentTaskModel {
        DependentTaskModel { relation, items }
    }

    fn parameters(relation: DependentRelation, groups: Vec<DependentTaskModel>) -> DependentParameters {
        DependentParameters {
            relation,
            groups,
            failure_policy: DependentFailurePolicy::Fail,
            failure_waiting_time: None,
            check_interval: None,
        }
    }

    fn resolver(store: &Arc<MemoryStore>, parameters: &DependentParameters) -> DependentResolver {
        DependentResolver::new(store.clone(), parameters, at(12, 0), false, at(12, 0)).unwrap()
    }

    #[test]
    fn wait_policy_holds_failure_until_deadline() {
        let store = store();
        upstream(&store, 10, WorkflowState::Failed);

        let mut waiting = parameters(
            DependentRelation::And,
            vec![group(DependentRelation::And, vec![today(10)])],
        );
        waiting.failure_policy = DependentFailurePolicy::Wait;
        waiting.failure_waiting_time = Some(30);
        let mut r = resolver(&store, &waiting);

        assert_eq!(r.poll(at(12, 10)).unwrap(), DependResult::Waiting);
        assert_eq!(r.poll(at(12, 29)).unwrap(), DependResult::Waiting);
        assert_eq!(r.poll(at(12, 30)).unwrap(), DependResult::Failed);

        let failing = parameters(
            DependentRelation::And,
            vec![group(DependentRelation::And, vec![today(10)])],
        );
        assert_eq!(resolver(&store, &failing).poll(at(12, 0)).unwrap(), DependResult::Failed);
    }

    #[test]
    fn final_results_are_not_checked_again() {
        let store = store();
        upstream(&store, 10, WorkflowState::Success);
        let params = parameters(
            DependentRelation::And,
            vec![group(DependentRelation::And, vec![today(10)])],
        );
        let mut r = resolver(&store, &params);
        assert_eq!(r.poll(at(12, 0)).unwrap(), DependResult::Success);

        store.set_available(false);
        assert_eq!(r.poll(at(12, 1)).unwrap(), DependResult::Success);
    }

    #[test]
    fn waiting_results_are_checked_on_every_poll() {
        let store = store();
        let params = parameters(
            DependentRelation::And,
            vec![group(DependentRelation::And, vec![today(10)])],
        );
        let mut r = resolver(&store, &params);
        assert_eq!(r.poll(at(12, 0)).unwrap(), DependResult::Waiting);

        upstream(&store, 10, WorkflowState::Success);
        assert_eq!(r.poll(at(12, 1)).unwrap(), DependResult::Success);
    }

    #[test]
    fn or_groups_stop_at_first_success() {
        let store = store();
        upstream(&store, 10, WorkflowState::Success);
        let params = parameters(
            DependentRelation::Or,
            vec![
                group(DependentRelation::And, vec![today(10)]),
                group(DependentRelation::And, vec![today(20)]),
            ],
        );
        let mut r = resolver(&store, &params);
        assert_eq!(r.poll(at(12, 0)).unwrap(), DependResult::Success);

        // The second group is still waiting; reaching it would hit the store.
        store.set_available(false);
        assert_eq!(r.poll(at(12, 1)).unwrap(), DependResult::Success);
    }

    #[test]
    fn and_group_fails_on_first_failed_item() {
        let store = store();
        upstream(&store, 10, WorkflowState::Failed);
        let params = parameters(
            DependentRelation::And,
            vec![group(DependentRelation::And, vec![today(10), today(20)])],
        );
        let mut r = resolver(&store, &params);
        assert_eq!(r.poll(at(12, 0)).unwrap(), DependResult::Failed);

        store.set_available(false);
        assert_eq!(r.poll(at(12, 1)).unwrap(), DependResult::Failed);
    }

    #[test]
    fn and_group_waits_until_every_item_succeeds() {
        let store = store();
        upstream(&store, 10, WorkflowState::Success);
        let params = parameters(
            DependentRelation::And,
            vec![group(DependentRelation::And, vec![today(10), today(20)])],
        );
        let mut r = resolver(&store, &params);
        assert_eq!(r.poll(at(12, 0)).unwrap(), DependResult::Waiting);

        upstream(&store, 20, WorkflowState::Success);
        assert_eq!(r.poll(at(12, 1)).unwrap(), DependResult::Success);
    }

    #[test]
    fn missing_definition_is_a_config_error() {
        let store = store();
        let params = parameters(
            DependentRelation::And,
            vec![group(DependentRelation::And, vec![today(99)])],
        );
        let err = DependentResolver::new(store, &params, at(12, 0), false, at(12, 0))
            .err()
            .unwrap();
        assert!(matches!(err, DagflowError::DependentConfig(_)));
    }
}
