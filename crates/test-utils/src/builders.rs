#![allow(dead_code)]

use std::time::Duration;

use dagflow::config::{DispatchSettings, EngineSettings};
use dagflow::dependent::DependentParameters;
use dagflow::store::{TaskDefinition, WorkflowDefinition};
use dagflow::types::{Code, Priority, TaskType};

/// Builder for `WorkflowDefinition`.
///
/// Tasks without an explicit code get `definition_code * 100 + position`.
pub struct WorkflowDefinitionBuilder {
    definition: WorkflowDefinition,
}

impl WorkflowDefinitionBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            definition: WorkflowDefinition {
                code: 1,
                project_code: 1,
                name: name.to_string(),
                version: 1,
                tasks: Vec::new(),
            },
        }
    }

    pub fn code(mut self, code: Code) -> Self {
        self.definition.code = code;
        self
    }

    pub fn project_code(mut self, code: Code) -> Self {
        self.definition.project_code = code;
        self
    }

    pub fn task(mut self, task: TaskDefinitionBuilder) -> Self {
        let position = self.definition.tasks.len() as Code + 1;
        let code = task.code.unwrap_or(self.definition.code * 100 + position);
        let mut task = task.task;
        task.code = code;
        self.definition.tasks.push(task);
        self
    }

    pub fn build(self) -> WorkflowDefinition {
        self.definition
    }
}

/// Builder for `TaskDefinition`.
pub struct TaskDefinitionBuilder {
    code: Option<Code>,
    task: TaskDefinition,
}

impl TaskDefinitionBuilder {
    pub fn shell(name: &str, cmd: &str) -> Self {
        Self {
            code: None,
            task: TaskDefinition::shell(0, name, cmd),
        }
    }

    pub fn dependent(name: &str, dependence: DependentParameters) -> Self {
        let mut task = TaskDefinition::shell(0, name, "");
        task.task_type = TaskType::Dependent;
        task.command = None;
        task.dependence = Some(dependence);
        Self { code: None, task }
    }

    pub fn code(mut self, code: Code) -> Self {
        self.code = Some(code);
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn skip(mut self) -> Self {
        self.task.skip = true;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn worker_group(mut self, group: &str) -> Self {
        self.task.worker_group = group.to_string();
        self
    }

    pub fn retries(mut self, times: u32, interval: Duration) -> Self {
        self.task.max_retry_times = times;
        self.task.retry_interval = interval;
        self
    }
}

/// Engine settings with intervals short enough for tests.
pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        idle_interval: Duration::from_millis(20),
        error_backoff: Duration::from_millis(20),
        firer_pool_size: 4,
        dependent_check_interval: Duration::from_millis(20),
        dispatch: DispatchSettings {
            batch_size: 10,
            max_retry_times: 3,
            retry_backoff: Duration::from_millis(10),
            poll_timeout: Duration::from_millis(20),
        },
    }
}
