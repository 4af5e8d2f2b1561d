// tests/config_loading.rs

use std::error::Error;
use std::fs;
use std::time::Duration;

use dagflow::config::load_and_validate;
use dagflow::errors::DagflowError;
use dagflow::types::{Priority, TaskType};
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn Error>>;

fn write_config(dir: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("Dagflow.toml");
    fs::write(&path, contents).expect("write config");
    path
}

#[test]
fn loads_full_config() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = write_config(
        &dir,
        r#"
[engine]
idle_interval = "500ms"

[dispatch]
batch_size = 4
max_retry_times = 2

[workers]
default = ["local"]
gpu = ["gpu-1", "gpu-2"]

[workflow]
name = "nightly"
code = 7
priority = "high"

[task.extract]
cmd = "echo extract"
priority = "highest"

[task.train]
cmd = "echo train"
after = ["extract"]
worker_group = "gpu"
retries = 2
retry_interval = "30s"

[task.wait_upstream]
type = "dependent"

[task.wait_upstream.dependence]
relation = "and"
failure_policy = "wait"
failure_waiting_time = 15

[[task.wait_upstream.dependence.groups]]
relation = "or"
items = [
  { project_code = 1, definition_code = 7, cycle = "day", date_value = "last1Days" },
]
"#,
    );

    let cfg = load_and_validate(&path)?;
    let settings = cfg.settings()?;
    assert_eq!(settings.idle_interval, Duration::from_millis(500));
    assert_eq!(settings.dispatch.batch_size, 4);
    assert_eq!(settings.dispatch.max_retry_times, 2);

    let definition = cfg.to_workflow_definition()?;
    assert_eq!(definition.name, "nightly");
    assert_eq!(definition.code, 7);
    assert_eq!(definition.tasks.len(), 3);

    let train = definition.task("train").expect("train task");
    assert_eq!(train.after, vec!["extract".to_string()]);
    assert_eq!(train.worker_group, "gpu");
    assert_eq!(train.max_retry_times, 2);
    assert_eq!(train.retry_interval, Duration::from_secs(30));
    assert_eq!(definition.task("extract").map(|t| t.priority), Some(Priority::Highest));

    let wait = definition.task("wait_upstream").expect("dependent task");
    assert_eq!(wait.task_type, TaskType::Dependent);
    let dependence = wait.dependence.as_ref().expect("dependence");
    assert_eq!(dependence.items().count(), 1);
    assert_eq!(dependence.failure_waiting_time, Some(15));
    Ok(())
}

#[test]
fn rejects_cycles() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = write_config(
        &dir,
        r#"
[task.a]
cmd = "echo a"
after = ["b"]

[task.b]
cmd = "echo b"
after = ["a"]
"#,
    );

    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, DagflowError::DagCycle(_)), "got {err}");
    Ok(())
}

#[test]
fn rejects_malformed_toml() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = write_config(&dir, "[task.a\ncmd = ");

    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, DagflowError::TomlError(_)), "got {err}");
    Ok(())
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = load_and_validate(dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, DagflowError::IoError(_)), "got {err}");
}
