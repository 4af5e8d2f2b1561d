// src/dependent/model.rs

use std::fmt;
use std::time::Duration;

use chrono::TimeDelta;
use serde::Deserialize;

use crate::types::Code;

/// Tri-state outcome of a dependency check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependResult {
    Success,
    Failed,
    Waiting,
}

/// How the results inside a group (or across groups) combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DependentRelation {
    #[default]
    And,
    Or,
}

impl DependentRelation {
    /// Combine results.
    ///
    /// - `And`: any `Failed` wins, then any `Waiting`, else `Success`.
    /// - `Or`: any `Success` wins, then any `Waiting`, else `Failed`.
    ///
    /// An empty input is `Success` for `And` and `Failed` for `Or`.
    pub fn reduce<I>(self, results: I) -> DependResult
    where
        I: IntoIterator<Item = DependResult>,
    {
        let mut waiting = false;
        for result in results {
            match (self, result) {
                (DependentRelation::And, DependResult::Failed) => return DependResult::Failed,
                (DependentRelation::Or, DependResult::Success) => return DependResult::Success,
                (_, DependResult::Waiting) => waiting = true,
                _ => {}
            }
        }
        match (self, waiting) {
            (_, true) => DependResult::Waiting,
            (DependentRelation::And, false) => DependResult::Success,
            (DependentRelation::Or, false) => DependResult::Failed,
        }
    }

    /// The result that decides the reduction on its own.
    pub fn short_circuit(self) -> DependResult {
        match self {
            DependentRelation::And => DependResult::Failed,
            DependentRelation::Or => DependResult::Success,
        }
    }
}

/// Granularity of the date window an item checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependentCycle {
    Hour,
    Day,
    Week,
    Month,
}

impl fmt::Display for DependentCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DependentCycle::Hour => "hour",
            DependentCycle::Day => "day",
            DependentCycle::Week => "week",
            DependentCycle::Month => "month",
        };
        f.write_str(s)
    }
}

/// What an item waits for inside the referenced workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependentTarget {
    /// The whole workflow instance.
    AllTasks,
    Task(Code),
}

impl fmt::Display for DependentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependentTarget::AllTasks => f.write_str("ALL"),
            DependentTarget::Task(code) => write!(f, "{code}"),
        }
    }
}

/// One dependency: a task (or every task) of another workflow, within a date
/// window relative to the business date.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DependentItem {
    pub project_code: Code,
    pub definition_code: Code,
    /// Task definition code; absent or `0` means the whole workflow.
    #[serde(default)]
    pub task_code: Option<Code>,
    pub cycle: DependentCycle,
    pub date_value: String,
}

impl DependentItem {
    pub fn target(&self) -> DependentTarget {
        match self.task_code {
            Some(code) if code != 0 => DependentTarget::Task(code),
            _ => DependentTarget::AllTasks,
        }
    }

    /// Stable identifier of this dependency, used in resolution logs.
    pub fn key(&self) -> String {
        format!(
            "{}-{}-{}-{}-{}",
            self.project_code,
            self.definition_code,
            self.target(),
            self.cycle,
            self.date_value
        )
    }
}

/// A group of items combined with the group's own relation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DependentTaskModel {
    #[serde(default)]
    pub relation: DependentRelation,
    pub items: Vec<DependentItem>,
}

/// What to do when a dependency has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DependentFailurePolicy {
    /// Fail the dependent task right away.
    #[default]
    Fail,
    /// Keep waiting for `failure_waiting_time` before failing.
    Wait,
}

/// Dependency descriptor of a DEPENDENT task.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DependentParameters {
    /// Relation between groups.
    #[serde(default)]
    pub relation: DependentRelation,
    pub groups: Vec<DependentTaskModel>,
    #[serde(default)]
    pub failure_policy: DependentFailurePolicy,
    /// Minutes to keep waiting on a failed dependency under `Wait`.
    #[serde(default)]
    pub failure_waiting_time: Option<u64>,
    /// Seconds between two checks; engine default when absent.
    #[serde(default)]
    pub check_interval: Option<u64>,
}

impl DependentParameters {
    pub fn failure_waiting_delta(&self) -> TimeDelta {
        let minutes = i64::try_from(self.failure_waiting_time.unwrap_or(0)).unwrap_or(i64::MAX);
        TimeDelta::try_minutes(minutes).unwrap_or(TimeDelta::MAX)
    }

    pub fn check_interval_duration(&self) -> Option<Duration> {
        self.check_interval.filter(|s| *s > 0).map(Duration::from_secs)
    }

    pub fn items(&self) -> impl Iterator<Item = &DependentItem> {
        self.groups.iter().flat_map(|g| g.items.iter())
    }
}
