//! Dependency Graph Operations
//!
//! The graph owns every node in one session's reactive runtime and
//! coordinates dirty propagation.
//!
//! # Algorithm
//!
//! Propagation is push-pull:
//!
//! 1. When a value cell changes, mark all its transitive dependents
//!    "maybe dirty" (BFS).
//! 2. Collect the affected nodes and sort them topologically so
//!    dependencies are always processed before their dependents.
//! 3. Consumers (the reactive runtime) then *pull*: a maybe-dirty derived
//!    cell checks the recorded versions of its inputs and recomputes only
//!    when one actually changed.
//!
//! # Cycles
//!
//! A dependency edge that would close a cycle is rejected at subscription
//! time with [`GraphError::CycleDetected`], rather than guarded against with
//! re-entrancy locks at evaluation time.

use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;

use super::node::{Node, NodeId, NodeKind};

/// Errors raised by graph mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Adding the edge would make `dependent` transitively depend on itself.
    #[error("dependency cycle: node {} -> node {}", dependency.raw(), dependent.raw())]
    CycleDetected {
        dependency: NodeId,
        dependent: NodeId,
    },
}

/// A session-local dependency graph.
///
/// Node ids are issued sequentially, so identical creation sequences produce
/// identical graphs.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: HashMap<NodeId, Node>,
    next_id: u64,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a node of the given kind and return its id.
    pub fn add_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId::from_raw(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, Node::new(id, kind));
        id
    }

    /// Remove a node and every edge that touches it.
    pub fn remove_node(&mut self, node_id: NodeId) {
        if let Some(node) = self.nodes.remove(&node_id) {
            for dep_id in node.dependencies() {
                if let Some(dep) = self.nodes.get_mut(dep_id) {
                    dep.remove_dependent(node_id);
                }
            }
            for dependent_id in node.dependents() {
                if let Some(dependent) = self.nodes.get_mut(dependent_id) {
                    dependent.remove_dependency(node_id);
                }
            }
        }
    }

    pub fn get(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    pub fn get_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    /// Add a dependency edge: `dependent` reads from `dependency`.
    ///
    /// Rejected when the edge would close a cycle, i.e. when `dependency`
    /// already (transitively) depends on `dependent`.
    pub fn add_edge(&mut self, dependency: NodeId, dependent: NodeId) -> Result<(), GraphError> {
        if dependency == dependent || self.reaches(dependent, dependency) {
            return Err(GraphError::CycleDetected {
                dependency,
                dependent,
            });
        }
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            dep_node.add_dependent(dependent);
        }
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.add_dependency(dependency);
        }
        Ok(())
    }

    /// Drop all incoming edges of `dependent`.
    ///
    /// Called before re-running a computation so that the dependency set is
    /// exactly what the new run reads.
    pub fn clear_dependencies(&mut self, dependent: NodeId) {
        let deps: Vec<NodeId> = match self.nodes.get(&dependent) {
            Some(node) => node.dependencies().iter().copied().collect(),
            None => return,
        };
        for dep_id in deps {
            if let Some(dep) = self.nodes.get_mut(&dep_id) {
                dep.remove_dependent(dependent);
            }
        }
        if let Some(node) = self.nodes.get_mut(&dependent) {
            node.clear_dependencies();
        }
    }

    /// True when `to` is reachable from `from` along dependent edges.
    fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if !visited.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(&id) {
                stack.extend(node.dependents().iter().copied());
            }
        }
        false
    }

    /// Bump a changed value cell's version and propagate dirtiness.
    ///
    /// All transitive dependents are marked maybe-dirty; the returned list is
    /// topologically ordered (dependencies first) for the pull phase.
    pub fn mark_changed(&mut self, source_id: NodeId) -> Vec<NodeId> {
        if let Some(source) = self.nodes.get_mut(&source_id) {
            source.bump_version();
        }

        let mut affected = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        if let Some(source) = self.nodes.get(&source_id) {
            for dependent_id in source.dependents() {
                queue.push_back(*dependent_id);
            }
        }

        while let Some(node_id) = queue.pop_front() {
            if !visited.insert(node_id) {
                continue;
            }
            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.mark_maybe_dirty();
                affected.push(node_id);
                for dependent_id in node.dependents().iter().copied().collect::<Vec<_>>() {
                    queue.push_back(dependent_id);
                }
            }
        }

        self.topological_sort(affected)
    }

    /// Sort the given nodes so dependencies come before dependents.
    fn topological_sort(&self, nodes: Vec<NodeId>) -> Vec<NodeId> {
        let node_set: HashSet<_> = nodes.iter().copied().collect();
        let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
        let mut result = Vec::with_capacity(nodes.len());
        let mut queue = VecDeque::new();

        for &node_id in &nodes {
            if let Some(node) = self.nodes.get(&node_id) {
                let degree = node
                    .dependencies()
                    .iter()
                    .filter(|d| node_set.contains(d))
                    .count();
                in_degree.insert(node_id, degree);
                if degree == 0 {
                    queue.push_back(node_id);
                }
            }
        }

        // Kahn's algorithm. Cycles cannot occur here: add_edge rejects them.
        while let Some(node_id) = queue.pop_front() {
            result.push(node_id);
            if let Some(node) = self.nodes.get(&node_id) {
                for &dependent_id in node.dependents() {
                    if let Some(degree) = in_degree.get_mut(&dependent_id) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            queue.push_back(dependent_id);
                        }
                    }
                }
            }
        }

        result
    }

    /// Resolve whether a maybe-dirty node's recorded inputs actually changed.
    ///
    /// Returns `true` when any dependency's current version differs from the
    /// version observed at the node's last computation.
    pub fn inputs_changed(&self, node_id: NodeId) -> bool {
        let Some(node) = self.nodes.get(&node_id) else {
            return false;
        };
        for (dep_id, seen) in node.dep_versions() {
            match self.nodes.get(dep_id) {
                Some(dep) if dep.version() == *seen => {}
                // Changed or removed: either way the cache is stale.
                _ => return true,
            }
        }
        false
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
