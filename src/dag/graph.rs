// src/dag/graph.rs

//! Dependency-graph analysis.
//!
//! Builds a `depends-on` view of the task set (edge `task -> predecessor`) and
//! answers the questions a run needs before launching anything:
//! - is the graph acyclic?
//! - what is each task's layer (0 without dependencies, else one more than
//!   its deepest predecessor)?
//! - may the graph run on a bounded pool, and in which submission order?
//!
//! Layering only looks at the *set* of registered predecessors, never at how
//! an expression combines them.

use std::collections::HashMap;

use petgraph::Direction;
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::dag::node::TaskNode;
use crate::errors::{Result, TccError};
use crate::types::{TaskId, TaskName};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Per-task layer computed by [`DependencyGraph::layering`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layering {
    layers: HashMap<TaskId, usize>,
}

impl Layering {
    pub fn layer_of(&self, id: TaskId) -> Option<usize> {
        self.layers.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

#[derive(Debug, Clone)]
struct NodeMeta {
    name: TaskName,
    conjunctive: bool,
}

/// Immutable snapshot of the task graph used for analysis.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraphMap<TaskId, ()>,
    meta: HashMap<TaskId, NodeMeta>,
}

impl DependencyGraph {
    pub fn from_nodes<'a, B: 'a, V: 'a>(nodes: impl IntoIterator<Item = &'a TaskNode<B, V>>) -> Self {
        let mut graph = DiGraphMap::new();
        let mut meta = HashMap::new();

        for node in nodes {
            graph.add_node(node.id());
            for &dep in node.gate().dependencies() {
                graph.add_edge(node.id(), dep, ());
            }
            meta.insert(
                node.id(),
                NodeMeta {
                    name: node.name().to_string(),
                    conjunctive: node.gate().expr().is_conjunctive(),
                },
            );
        }

        Self { graph, meta }
    }

    /// All task ids, ascending.
    pub fn tasks(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.graph.nodes().collect();
        ids.sort();
        ids
    }

    pub fn name_of(&self, id: TaskId) -> &str {
        self.meta.get(&id).map(|m| m.name.as_str()).unwrap_or("<unknown>")
    }

    /// Direct predecessors of `id`, ascending.
    pub fn dependencies_of(&self, id: TaskId) -> Vec<TaskId> {
        self.sorted_neighbors(id, Direction::Outgoing)
    }

    /// Tasks that directly depend on `id`, ascending.
    pub fn dependents_of(&self, id: TaskId) -> Vec<TaskId> {
        self.sorted_neighbors(id, Direction::Incoming)
    }

    fn sorted_neighbors(&self, id: TaskId, dir: Direction) -> Vec<TaskId> {
        if !self.graph.contains_node(id) {
            return Vec::new();
        }
        let mut out: Vec<TaskId> = self.graph.neighbors_directed(id, dir).collect();
        out.sort();
        out
    }

    /// Fails with [`TccError::LoopDependency`] if any cycle exists.
    pub fn check_acyclic(&self) -> Result<()> {
        self.layering().map(|_| ())
    }

    /// Three-colour depth-first search computing every task's layer.
    ///
    /// Visits every task (the graph may be disconnected); an edge into a gray
    /// node is a cycle.
    pub fn layering(&self) -> Result<Layering> {
        let mut color: HashMap<TaskId, Color> =
            self.graph.nodes().map(|id| (id, Color::White)).collect();
        let mut layers: HashMap<TaskId, usize> = HashMap::with_capacity(color.len());

        for root in self.tasks() {
            if color.get(&root) != Some(&Color::White) {
                continue;
            }

            // (task, its predecessors, index of the next predecessor to visit)
            let mut stack: Vec<(TaskId, Vec<TaskId>, usize)> = Vec::new();
            color.insert(root, Color::Gray);
            stack.push((root, self.dependencies_of(root), 0));

            while let Some((id, deps, next)) = stack.last_mut() {
                if *next < deps.len() {
                    let dep = deps[*next];
                    *next += 1;
                    match color.get(&dep).copied().unwrap_or(Color::White) {
                        Color::Gray => {
                            return Err(TccError::LoopDependency(self.name_of(dep).to_string()));
                        }
                        Color::White => {
                            color.insert(dep, Color::Gray);
                            let dep_deps = self.dependencies_of(dep);
                            stack.push((dep, dep_deps, 0));
                        }
                        Color::Black => {}
                    }
                    continue;
                }

                let layer = deps
                    .iter()
                    .filter_map(|d| layers.get(d))
                    .map(|l| l + 1)
                    .max()
                    .unwrap_or(0);
                let id = *id;
                layers.insert(id, layer);
                color.insert(id, Color::Black);
                stack.pop();
            }
        }

        Ok(Layering { layers })
    }

    /// Fails with [`TccError::PoolUnsupported`] naming the first task (by
    /// name) whose expression is not a pure conjunction.
    pub fn check_pool_eligible(&self) -> Result<()> {
        let mut offenders: Vec<(&str, TaskId)> = self
            .meta
            .iter()
            .filter(|(_, m)| !m.conjunctive)
            .map(|(id, m)| (m.name.as_str(), *id))
            .collect();
        offenders.sort();

        match offenders.first() {
            Some((name, _)) => Err(TccError::PoolUnsupported(name.to_string())),
            None => Ok(()),
        }
    }

    /// Tasks sorted by ascending layer, ties broken by name then id.
    pub fn submission_order(&self, layering: &Layering) -> Vec<TaskId> {
        let mut ids = self.tasks();
        ids.sort_by(|a, b| {
            let la = layering.layer_of(*a).unwrap_or(0);
            let lb = layering.layer_of(*b).unwrap_or(0);
            la.cmp(&lb)
                .then_with(|| self.name_of(*a).cmp(self.name_of(*b)))
                .then_with(|| a.cmp(b))
        });
        debug!(tasks = ids.len(), "computed pool submission order");
        ids
    }
}
