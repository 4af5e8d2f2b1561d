// src/dag/graph.rs

use std::collections::{BTreeSet, HashMap};

use crate::store::WorkflowDefinition;

/// One task's position in a workflow DAG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagNode {
    pub name: String,
    /// Skipped nodes count as satisfied without ever running.
    pub skip: bool,
    /// Direct predecessors: tasks that must succeed before this one can run.
    pub predecessors: BTreeSet<String>,
    /// Direct successors: tasks that list this one in their `after`.
    pub successors: BTreeSet<String>,
}

/// In-memory DAG keyed by task name.
///
/// Built once per workflow instance from its (already validated) definition.
/// Acyclicity is checked when definitions are loaded, so here we only keep
/// adjacency information.
#[derive(Debug, Clone, Default)]
pub struct WorkflowDag {
    nodes: HashMap<String, DagNode>,
}

impl WorkflowDag {
    /// Materialize the DAG of a workflow definition.
    ///
    /// Assumes that every `after` reference names a task of the definition;
    /// unknown references are ignored.
    pub fn from_definition(definition: &WorkflowDefinition) -> Self {
        let mut nodes: HashMap<String, DagNode> = definition
            .tasks
            .iter()
            .map(|task| {
                (
                    task.name.clone(),
                    DagNode {
                        name: task.name.clone(),
                        skip: task.skip,
                        predecessors: task.after.iter().cloned().collect(),
                        successors: BTreeSet::new(),
                    },
                )
            })
            .collect();

        // Second pass: successors mirror predecessors.
        for task in &definition.tasks {
            for dep in &task.after {
                if let Some(dep_node) = nodes.get_mut(dep) {
                    dep_node.successors.insert(task.name.clone());
                }
            }
        }

        Self { nodes }
    }

    pub fn node(&self, name: &str) -> Option<&DagNode> {
        self.nodes.get(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    /// Tasks without predecessors, sorted for deterministic trigger order.
    pub fn roots(&self) -> Vec<String> {
        let mut roots: Vec<String> = self
            .nodes
            .values()
            .filter(|n| n.predecessors.is_empty())
            .map(|n| n.name.clone())
            .collect();
        roots.sort();
        roots
    }

    pub fn successors_of(&self, name: &str) -> impl Iterator<Item = &str> {
        self.nodes
            .get(name)
            .into_iter()
            .flat_map(|n| n.successors.iter().map(|s| s.as_str()))
    }
}
