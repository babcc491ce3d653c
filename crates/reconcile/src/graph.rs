//! Dependency graph over a task set
//!
//! Nodes are tasks; an edge `a -> b` means `a` must complete before `b`
//! starts. The graph is validated when built: every link must point at a
//! declared task and there must be no cycle.

use crate::error::EngineError;
use crate::task::TaskSet;
use crate::types::TaskKey;
use petgraph::Direction;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet, VecDeque};

/// Validated dependency graph.
///
/// Node indices match the positions of the tasks in the [`TaskSet`] the
/// graph was built from.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    graph: DiGraph<TaskKey, ()>,
    layers: Vec<Vec<NodeIndex>>,
}

impl TaskGraph {
    /// Build and validate the graph of a task set
    pub fn build(tasks: &TaskSet) -> Result<Self, EngineError> {
        let mut graph = DiGraph::with_capacity(tasks.len(), tasks.len());
        let mut index = HashMap::with_capacity(tasks.len());
        for task in tasks.iter() {
            let key = task.key();
            let node = graph.add_node(key.clone());
            index.insert(key, node);
        }

        for (position, task) in tasks.iter().enumerate() {
            let node = NodeIndex::new(position);
            let key = task.key();
            for dependency in task.dependencies() {
                if dependency == key {
                    continue;
                }
                let Some(&from) = index.get(&dependency) else {
                    return Err(EngineError::DanglingReference {
                        task: key,
                        missing: dependency,
                    });
                };
                graph.update_edge(from, node, ());
            }
        }

        if let Err(cycle) = toposort(&graph, None) {
            return Err(EngineError::Cycle {
                chain: shortest_cycle(&graph, cycle.node_id()),
            });
        }

        let layers = kahn_layers(&graph);
        log::debug!(
            "Built task graph: {} task(s), {} edge(s), {} layer(s)",
            graph.node_count(),
            graph.edge_count(),
            layers.len()
        );
        Ok(Self { graph, layers })
    }

    /// Number of tasks
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Check if the graph has no tasks
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Keys in a topological order, deterministic for a given task set
    pub fn order(&self) -> Vec<TaskKey> {
        self.layers
            .iter()
            .flatten()
            .map(|&n| self.graph[n].clone())
            .collect()
    }

    /// Tasks grouped in layers; every task only depends on earlier layers
    pub fn layers(&self) -> Vec<Vec<TaskKey>> {
        self.layers
            .iter()
            .map(|layer| layer.iter().map(|&n| self.graph[n].clone()).collect())
            .collect()
    }

    /// Direct dependencies of a task, sorted
    pub fn dependencies(&self, key: &TaskKey) -> Vec<TaskKey> {
        self.neighbors(key, Direction::Incoming)
    }

    /// Direct dependents of a task, sorted
    pub fn dependents(&self, key: &TaskKey) -> Vec<TaskKey> {
        self.neighbors(key, Direction::Outgoing)
    }

    /// Positions in the task set, in topological order
    pub(crate) fn positions(&self) -> Vec<usize> {
        self.layers.iter().flatten().map(|n| n.index()).collect()
    }

    /// Number of direct dependencies of the task at `position`
    pub(crate) fn dependency_count(&self, position: usize) -> usize {
        self.graph
            .neighbors_directed(NodeIndex::new(position), Direction::Incoming)
            .count()
    }

    /// Positions of the direct dependents of the task at `position`
    pub(crate) fn dependent_positions(&self, position: usize) -> Vec<usize> {
        self.graph
            .neighbors_directed(NodeIndex::new(position), Direction::Outgoing)
            .map(|n| n.index())
            .collect()
    }

    pub(crate) fn key_at(&self, position: usize) -> &TaskKey {
        &self.graph[NodeIndex::new(position)]
    }

    fn neighbors(&self, key: &TaskKey, direction: Direction) -> Vec<TaskKey> {
        let Some(node) = self.graph.node_indices().find(|&n| &self.graph[n] == key) else {
            return Vec::new();
        };
        let mut keys: Vec<TaskKey> = self
            .graph
            .neighbors_directed(node, direction)
            .map(|n| self.graph[n].clone())
            .collect();
        keys.sort();
        keys
    }
}

/// Kahn's algorithm, sorting each layer by key
fn kahn_layers(graph: &DiGraph<TaskKey, ()>) -> Vec<Vec<NodeIndex>> {
    let mut remaining: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|n| (n, graph.neighbors_directed(n, Direction::Incoming).count()))
        .collect();

    let mut current: Vec<NodeIndex> = remaining
        .iter()
        .filter(|&(_, &count)| count == 0)
        .map(|(&n, _)| n)
        .collect();

    let mut layers = Vec::new();
    while !current.is_empty() {
        current.sort_by(|a, b| graph[*a].cmp(&graph[*b]));
        let mut next = Vec::new();
        for &node in &current {
            for dependent in graph.neighbors_directed(node, Direction::Outgoing) {
                if let Some(count) = remaining.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        next.push(dependent);
                    }
                }
            }
        }
        layers.push(std::mem::take(&mut current));
        current = next;
    }
    layers
}

/// Shortest cycle through the strongly connected component containing
/// `start`, as a chain of "depends on" steps whose first and last key are
/// equal.
fn shortest_cycle(graph: &DiGraph<TaskKey, ()>, start: NodeIndex) -> Vec<TaskKey> {
    let component: HashSet<NodeIndex> = tarjan_scc(graph)
        .into_iter()
        .find(|scc| scc.contains(&start))
        .map(|scc| scc.into_iter().collect())
        .unwrap_or_default();

    let mut members: Vec<NodeIndex> = component.iter().copied().collect();
    members.sort_by(|a, b| graph[*a].cmp(&graph[*b]));

    let mut best: Option<Vec<NodeIndex>> = None;
    for &origin in &members {
        if let Some(path) = cycle_from(graph, &component, origin)
            && best.as_ref().is_none_or(|b| path.len() < b.len())
        {
            best = Some(path);
        }
    }

    best.unwrap_or_else(|| vec![start, start])
        .into_iter()
        .map(|n| graph[n].clone())
        .collect()
}

/// BFS along dependency edges from `origin` back to itself
fn cycle_from(
    graph: &DiGraph<TaskKey, ()>,
    component: &HashSet<NodeIndex>,
    origin: NodeIndex,
) -> Option<Vec<NodeIndex>> {
    let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut queue = VecDeque::from([origin]);

    while let Some(node) = queue.pop_front() {
        let mut next: Vec<NodeIndex> = graph
            .neighbors_directed(node, Direction::Incoming)
            .filter(|n| component.contains(n))
            .collect();
        next.sort_by(|a, b| graph[*a].cmp(&graph[*b]));

        for dependency in next {
            if dependency == origin {
                let mut path = vec![node];
                let mut cursor = node;
                while cursor != origin {
                    cursor = parent[&cursor];
                    path.push(cursor);
                }
                path.reverse();
                path.push(origin);
                return Some(path);
            }
            if !parent.contains_key(&dependency) {
                parent.insert(dependency, node);
                queue.push_back(dependency);
            }
        }
    }
    None
}
