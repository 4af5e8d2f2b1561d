// src/dependent/executor.rs

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use tracing::debug;

use crate::dependent::model::{DependResult, DependentParameters};
use crate::dependent::resolver::DependentResolver;
use crate::errors::Result;
use crate::exec::{AsyncTaskExecutionStatus, AsyncTaskExecutor};
use crate::store::{InstanceStore, local_now};

/// Async executor of a DEPENDENT task: polls its resolver until no group is
/// waiting anymore.
pub struct DependentTaskExecutor {
    resolver: DependentResolver,
    check_interval: Duration,
}

impl DependentTaskExecutor {
    /// `business_time` is the workflow's schedule time, or `None` to use the
    /// moment the task starts.
    pub fn new(
        store: Arc<dyn InstanceStore>,
        parameters: &DependentParameters,
        business_time: Option<NaiveDateTime>,
        test_flag: bool,
        default_check_interval: Duration,
    ) -> Result<Self> {
        let started = local_now();
        let resolver = DependentResolver::new(
            store,
            parameters,
            business_time.unwrap_or(started),
            test_flag,
            started,
        )?;
        Ok(Self {
            resolver,
            check_interval: parameters
                .check_interval_duration()
                .unwrap_or(default_check_interval),
        })
    }
}

impl AsyncTaskExecutor for DependentTaskExecutor {
    fn async_task_execution_status(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<AsyncTaskExecutionStatus>> + Send + '_>> {
        Box::pin(async move {
            let result = self.resolver.poll(local_now())?;
            debug!(result = ?result, "dependent check");
            Ok(match result {
                DependResult::Waiting => AsyncTaskExecutionStatus::Running,
                DependResult::Success => AsyncTaskExecutionStatus::Success,
                DependResult::Failed => AsyncTaskExecutionStatus::Failed,
            })
        })
    }

    fn async_task_state_check_interval(&self) -> Duration {
        self.check_interval
    }
}
