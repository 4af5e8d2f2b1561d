// src/config/settings.rs

//! Parsed runtime knobs of the engine.

use std::time::Duration;

/// Tuning of the dispatch consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Maximum number of new queue items handled per dispatch cycle.
    pub batch_size: usize,
    /// Failed dispatch attempts tolerated before a task goes back to pending.
    pub max_retry_times: u32,
    /// Minimum time between two dispatch attempts of the same item.
    pub retry_backoff: Duration,
    /// How long one queue poll blocks before the consumer re-checks shutdown.
    pub poll_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_retry_times: 3,
            retry_backoff: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Scan-loop sleep when no workflow has pending events.
    pub idle_interval: Duration,
    /// Scan-loop sleep after a failed fire cycle.
    pub error_backoff: Duration,
    /// Event firer pool size; 0 means twice the available parallelism.
    pub firer_pool_size: usize,
    /// Default poll interval of dependent tasks.
    pub dependent_check_interval: Duration,
    pub dispatch: DispatchSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_secs(3),
            error_backoff: Duration::from_secs(3),
            firer_pool_size: 0,
            dependent_check_interval: Duration::from_secs(10),
            dispatch: DispatchSettings::default(),
        }
    }
}

impl EngineSettings {
    pub fn effective_firer_pool_size(&self) -> usize {
        if self.firer_pool_size > 0 {
            return self.firer_pool_size;
        }
        std::thread::available_parallelism()
            .map(|n| n.get() * 2)
            .unwrap_or(2)
    }
}
