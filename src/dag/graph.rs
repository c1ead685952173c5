// src/dag/graph.rs

//! Dependency graph snapshot used to keep the task graph acyclic.
//!
//! A cycle in the task graph would make a task wait on its own in-flight
//! run forever, so registration rejects it up front.

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::dag::runnable::{Runnable, TaskId};
use crate::errors::{CheckdagError, Result};

/// Edges reachable from one root task, keyed by task id.
#[derive(Debug, Default)]
pub struct TaskGraph {
    graph: DiGraphMap<TaskId, ()>,
    labels: HashMap<TaskId, String>,
}

impl TaskGraph {
    /// Walk every node reachable from `root`.
    ///
    /// Edge direction: dependency -> dependent, as in the config DAG.
    pub fn from_root(root: &Arc<Runnable>) -> Self {
        let mut out = Self::default();
        out.add_node(root);

        let mut nodes = vec![Arc::clone(root)];
        nodes.extend(root.all_dependencies());

        for node in &nodes {
            out.add_node(node);
            for dep in node.dependencies() {
                out.add_node(&dep);
                out.graph.add_edge(dep.id(), node.id(), ());
            }
        }
        out
    }

    fn add_node(&mut self, node: &Runnable) {
        self.graph.add_node(node.id());
        self.labels
            .entry(node.id())
            .or_insert_with(|| node.to_string());
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Fail with [`CheckdagError::DagCycle`] if the graph has a cycle.
    pub fn ensure_acyclic(&self) -> Result<()> {
        // A topological sort will fail if there is a cycle.
        match toposort(&self.graph, None) {
            Ok(_order) => Ok(()),
            Err(cycle) => {
                let id = cycle.node_id();
                let label = self
                    .labels
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| format!("#{id}"));
                Err(CheckdagError::DagCycle(format!(
                    "cycle detected in task graph involving {label}"
                )))
            }
        }
    }
}
