//! Dependency graph between task names.
//!
//! Design:
//! - Forward edges: task -> tasks it depends on (waits for)
//! - Reverse edges: task -> tasks that depend on it (waiting tasks)
//! - Invariant: edges and reverse_edges are kept in sync

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;

use crate::domain::TaskName;

/// Why an edge exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// Declared through `run_after`.
    Explicit,
    /// Inferred from a result reference in a parameter value.
    Data,
    /// Declared and inferred.
    Both,
}

impl EdgeKind {
    fn merge(self, other: EdgeKind) -> EdgeKind {
        if self == other { self } else { EdgeKind::Both }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Forward edges: task -> tasks it depends on, with the edge kind.
    edges: BTreeMap<TaskName, BTreeMap<TaskName, EdgeKind>>,

    /// Reverse edges: task -> tasks that depend on it.
    reverse_edges: BTreeMap<TaskName, BTreeSet<TaskName>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node without edges.
    pub fn add_node(&mut self, task: TaskName) {
        self.edges.entry(task.clone()).or_default();
        self.reverse_edges.entry(task).or_default();
    }

    /// `task` depends on `depends_on`. Adding an existing edge again only
    /// widens its kind.
    pub fn add_dependency(&mut self, task: &TaskName, depends_on: &TaskName, kind: EdgeKind) {
        self.add_node(task.clone());
        self.add_node(depends_on.clone());

        self.edges
            .entry(task.clone())
            .or_default()
            .entry(depends_on.clone())
            .and_modify(|existing| *existing = existing.merge(kind))
            .or_insert(kind);
        self.reverse_edges
            .entry(depends_on.clone())
            .or_default()
            .insert(task.clone());
    }

    pub fn has_dependencies(&self, task: &TaskName) -> bool {
        self.edges.get(task).is_some_and(|deps| !deps.is_empty())
    }

    pub fn dependencies(&self, task: &TaskName) -> impl Iterator<Item = &TaskName> {
        self.edges.get(task).into_iter().flat_map(|deps| deps.keys())
    }

    /// Tasks waiting for `task`.
    pub fn dependents(&self, task: &TaskName) -> impl Iterator<Item = &TaskName> {
        self.reverse_edges.get(task).into_iter().flatten()
    }

    pub fn edge_kind(&self, task: &TaskName, depends_on: &TaskName) -> Option<EdgeKind> {
        self.edges.get(task)?.get(depends_on).copied()
    }

    /// Every edge as `(task, depends_on, kind)`.
    pub fn edges(&self) -> impl Iterator<Item = (&TaskName, &TaskName, EdgeKind)> {
        self.edges
            .iter()
            .flat_map(|(task, deps)| deps.iter().map(move |(dep, kind)| (task, dep, *kind)))
    }

    /// Transitive dependents of `task`, excluding `task` itself.
    pub fn descendants(&self, task: &TaskName) -> BTreeSet<TaskName> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&TaskName> = self.dependents(task).collect();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next.clone()) {
                queue.extend(self.dependents(next));
            }
        }
        seen
    }

    /// Detect a cycle with a white/gray/black depth-first search.
    ///
    /// Returns the cycle as a path that starts and ends with the same task,
    /// following dependency direction, or `None` for a DAG.
    pub fn detect_cycle(&self) -> Option<Vec<TaskName>> {
        let mut colors: BTreeMap<&TaskName, Color> =
            self.edges.keys().map(|task| (task, Color::White)).collect();
        let mut path = Vec::new();

        for start in self.edges.keys() {
            if colors[start] == Color::White {
                if let Some(cycle) = self.dfs_cycle(start, &mut colors, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn dfs_cycle<'a>(
        &'a self,
        node: &'a TaskName,
        colors: &mut BTreeMap<&'a TaskName, Color>,
        path: &mut Vec<&'a TaskName>,
    ) -> Option<Vec<TaskName>> {
        colors.insert(node, Color::Gray);
        path.push(node);

        for dep in self.dependencies(node) {
            match colors.get(dep).copied().unwrap_or(Color::White) {
                Color::Gray => {
                    let start = path.iter().position(|t| *t == dep).unwrap_or(0);
                    let mut cycle: Vec<TaskName> =
                        path[start..].iter().map(|t| (*t).clone()).collect();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
                Color::White => {
                    if let Some(cycle) = self.dfs_cycle(dep, colors, path) {
                        return Some(cycle);
                    }
                }
                Color::Black => {}
            }
        }

        colors.insert(node, Color::Black);
        path.pop();
        None
    }

    /// One valid execution order (Kahn's algorithm). Ties are broken by name,
    /// which is a presentation detail, not an ordering guarantee.
    ///
    /// Returns `None` if the graph has a cycle.
    pub fn topological_order(&self) -> Option<Vec<TaskName>> {
        let mut remaining: BTreeMap<&TaskName, usize> = self
            .edges
            .iter()
            .map(|(task, deps)| (task, deps.len()))
            .collect();
        let mut ready: VecDeque<&TaskName> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(task, _)| *task)
            .collect();

        let mut order = Vec::with_capacity(remaining.len());
        while let Some(task) = ready.pop_front() {
            order.push(task.clone());
            for dependent in self.dependents(task) {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push_back(dependent);
                    }
                }
            }
        }

        (order.len() == self.edges.len()).then_some(order)
    }
}
