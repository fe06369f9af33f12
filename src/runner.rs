//! Task orchestration.
//!
//! This module contains the `Orchestrator`, which validates the task set, builds
//! one `TaskNode` per task with references to its dependency nodes, launches
//! every node concurrently and waits until each one has reached a terminal
//! status. Ordering between tasks comes only from each node's own wait on its
//! dependencies.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::error;

use crate::node::{RunContext, TaskNode};
use crate::task::{TaskSpec, TaskStatus};
use crate::validate::{validate, ValidationError};

/// Owns every node of one `up` run.
pub struct Orchestrator {
    nodes: Vec<Arc<TaskNode>>,
}

/// Final status of every task after a run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub statuses: Vec<(String, TaskStatus)>,
}

impl RunSummary {
    pub fn all_healthy(&self) -> bool {
        self.statuses
            .iter()
            .all(|(_, status)| *status == TaskStatus::Healthy)
    }

    pub fn terminated(&self) -> Vec<&str> {
        self.statuses
            .iter()
            .filter(|(_, status)| *status == TaskStatus::Terminated)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn status_of(&self, name: &str) -> Option<TaskStatus> {
        self.statuses
            .iter()
            .find(|(task, _)| task == name)
            .map(|(_, status)| *status)
    }
}

impl Orchestrator {
    /// Validates the specs and builds the node graph. Nothing is spawned here.
    pub fn new(specs: &[TaskSpec]) -> Result<Self, ValidationError> {
        let tasks = validate(specs)?;
        let mut names: Vec<&String> = tasks.keys().collect();
        names.sort();

        let mut built: HashMap<String, Arc<TaskNode>> = HashMap::with_capacity(tasks.len());
        let nodes = names
            .into_iter()
            .filter_map(|name| build_node(name, &tasks, &mut built))
            .collect();
        Ok(Self { nodes })
    }

    pub fn nodes(&self) -> &[Arc<TaskNode>] {
        &self.nodes
    }

    pub fn node(&self, name: &str) -> Option<&Arc<TaskNode>> {
        self.nodes.iter().find(|node| node.name() == name)
    }

    /// Current status of every task, sorted by name.
    pub fn statuses(&self) -> Vec<(String, TaskStatus)> {
        self.nodes
            .iter()
            .map(|node| (node.name().to_string(), node.status()))
            .collect()
    }

    /// Launches every node and waits for all of them to reach a terminal status.
    pub async fn run(&self, ctx: RunContext) -> RunSummary {
        let handles: Vec<_> = self
            .nodes
            .iter()
            .map(|node| {
                let node = Arc::clone(node);
                let ctx = ctx.clone();
                tokio::spawn(async move { node.run(&ctx).await })
            })
            .collect();

        let mut summary = RunSummary::default();
        for (node, handle) in self.nodes.iter().zip(handles) {
            let status = match handle.await {
                Ok(status) => status,
                Err(err) => {
                    error!(task = %node.name(), error = %err, "task runner failed");
                    TaskStatus::Terminated
                }
            };
            summary.statuses.push((node.name().to_string(), status));
        }
        summary
    }

    /// Kills every process still held by a node.
    pub async fn kill_all(&self) {
        for node in &self.nodes {
            node.kill().await;
        }
    }
}

// Dependencies are built before their dependents; validation guarantees every
// name resolves and the graph is acyclic.
fn build_node(
    name: &str,
    tasks: &HashMap<String, TaskSpec>,
    built: &mut HashMap<String, Arc<TaskNode>>,
) -> Option<Arc<TaskNode>> {
    if let Some(node) = built.get(name) {
        return Some(Arc::clone(node));
    }
    let spec = tasks.get(name)?;
    let dependencies = spec
        .depends_on
        .iter()
        .filter_map(|dep| build_node(dep, tasks, built))
        .collect();
    let node = Arc::new(TaskNode::new(spec.clone(), dependencies));
    built.insert(name.to_string(), Arc::clone(&node));
    Some(node)
}
