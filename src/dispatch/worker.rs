// src/dispatch/worker.rs

//! Worker fleet contract.
//!
//! [`WorkerRegistry`] knows which hosts serve which worker group and picks
//! one round-robin. [`TaskTransport`] ships requests to a host and relays
//! pause/kill; workers report status back as
//! [`TaskExecutionReport`](crate::event::TaskExecutionReport)s.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::debug;

use super::priority::TaskExecuteRequest;
use crate::types::TaskInstanceId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no worker available in group '{0}'")]
    NoWorker(String),

    #[error("transport to host '{host}' failed: {reason}")]
    Transport { host: String, reason: String },
}

pub type DispatchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + 'a>>;

/// How requests reach worker hosts.
pub trait TaskTransport: Send + Sync {
    fn dispatch<'a>(&'a self, host: &'a str, request: &'a TaskExecuteRequest) -> DispatchFuture<'a>;

    fn pause<'a>(&'a self, host: &'a str, task_instance_id: TaskInstanceId) -> DispatchFuture<'a>;

    fn kill<'a>(&'a self, host: &'a str, task_instance_id: TaskInstanceId) -> DispatchFuture<'a>;
}

#[derive(Debug, Default)]
struct Group {
    hosts: Vec<String>,
    cursor: usize,
}

/// Live hosts per worker group.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    groups: RwLock<HashMap<String, Group>>,
    joined: Notify,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_groups(groups: &BTreeMap<String, Vec<String>>) -> Self {
        let registry = Self::new();
        for (group, hosts) in groups {
            for host in hosts {
                registry.register_worker(group, host);
            }
        }
        registry
    }

    pub fn register_worker(&self, group: &str, host: &str) {
        let mut groups = self.groups.write();
        let entry = groups.entry(group.to_string()).or_default();
        if !entry.hosts.iter().any(|h| h == host) {
            debug!(group, host, "worker registered");
            entry.hosts.push(host.to_string());
            drop(groups);
            self.joined.notify_one();
        }
    }

    pub fn has_workers(&self, group: &str) -> bool {
        self.groups
            .read()
            .get(group)
            .is_some_and(|g| !g.hosts.is_empty())
    }

    /// Resolves once a host joins after the previous call returned.
    pub async fn worker_joined(&self) {
        self.joined.notified().await;
    }

    /// Next host of `group`, round robin.
    pub fn select_host(&self, group: &str) -> Result<String, DispatchError> {
        let mut groups = self.groups.write();
        let entry = groups
            .get_mut(group)
            .filter(|g| !g.hosts.is_empty())
            .ok_or_else(|| DispatchError::NoWorker(group.to_string()))?;
        let host = entry.hosts[entry.cursor % entry.hosts.len()].clone();
        entry.cursor = entry.cursor.wrapping_add(1);
        Ok(host)
    }
}
