use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Identifier of a persisted workflow instance.
pub type WorkflowInstanceId = i64;

/// Identifier of a persisted task instance.
pub type TaskInstanceId = i64;

/// Stable code of a project / workflow definition / task definition.
pub type Code = i64;

/// Scheduling priority shared by workflows and tasks.
///
/// Variants are declared from most to least urgent so that the derived `Ord`
/// sorts `Highest` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Highest,
    High,
    #[default]
    Medium,
    Low,
    Lowest,
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "highest" => Ok(Priority::Highest),
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            "lowest" => Ok(Priority::Lowest),
            other => Err(format!(
                "invalid priority: {other} (expected highest, high, medium, low or lowest)"
            )),
        }
    }
}

/// Kind of work a task performs.
///
/// Worker tasks go through the dispatch queue; logic tasks are evaluated by
/// the engine itself and polled for completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    #[default]
    Shell,
    Dependent,
}

impl TaskType {
    pub fn is_logic_task(self) -> bool {
        matches!(self, TaskType::Dependent)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskType::Shell => f.write_str("SHELL"),
            TaskType::Dependent => f.write_str("DEPENDENT"),
        }
    }
}

/// Persisted state of a task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Created and waiting in the dispatch queue.
    Submitted,
    /// Dispatch gave up; eligible for normal re-scheduling.
    Pending,
    /// Handed to a worker host.
    Dispatched,
    Running,
    Success,
    Failed,
    Paused,
    Killed,
    /// Superseded by a failover instance.
    NeedFailover,
}

impl TaskState {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            TaskState::Success
                | TaskState::Failed
                | TaskState::Paused
                | TaskState::Killed
                | TaskState::NeedFailover
        )
    }

    /// States in which a task instance is still owned by the engine.
    pub const UNFINISHED: [TaskState; 4] = [
        TaskState::Submitted,
        TaskState::Pending,
        TaskState::Dispatched,
        TaskState::Running,
    ];
}

/// Persisted state of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowState {
    Running,
    ReadyPause,
    Paused,
    ReadyStop,
    Stop,
    Success,
    Failed,
}

impl WorkflowState {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            WorkflowState::Paused
                | WorkflowState::Stop
                | WorkflowState::Success
                | WorkflowState::Failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_priority_sorts_first() {
        let mut v = vec![Priority::Low, Priority::Highest, Priority::Medium];
        v.sort();
        assert_eq!(v, vec![Priority::Highest, Priority::Medium, Priority::Low]);
    }

    #[test]
    fn priority_parses_case_insensitively() {
        assert_eq!("HIGH".parse::<Priority>(), Ok(Priority::High));
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn submitted_is_not_finished() {
        assert!(!TaskState::Submitted.is_finished());
        assert!(TaskState::Killed.is_finished());
        assert!(!WorkflowState::ReadyStop.is_finished());
    }
}
