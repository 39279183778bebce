//! Graph Nodes
//!
//! This module defines the node types that live in a session's dependency
//! graph. Every reactive cell (value, derived, effect, render) is backed by
//! exactly one node.

use indexmap::IndexSet;

/// Unique identifier for a node in a dependency graph.
///
/// Ids are issued sequentially by the owning [`Graph`](super::Graph), so two
/// runtimes that perform the same sequence of cell creations assign the same
/// ids. Determinism here is what makes hydration-id assignment repeatable
/// downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub(crate) fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A value cell. Roots of the graph: no dependencies, only dependents.
    Value,

    /// A derived cell. Has dependencies, caches its computed value, and may
    /// have dependents of its own.
    Derived,

    /// An effect cell. A leaf: has dependencies but produces side effects
    /// rather than a value.
    Effect,

    /// A component instance's render computation. Behaves like an effect for
    /// dirty tracking, but is drained by the session loop's re-render pass
    /// rather than the effect pass.
    Render,
}

/// Dirty state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyState {
    /// The node's value is up-to-date.
    Clean,

    /// A dependency might have changed. The node must verify its inputs'
    /// versions before trusting its cache.
    MaybeDirty,

    /// The node definitely needs to recompute.
    Dirty,
}

/// A node in the dependency graph.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    dirty: DirtyState,

    /// Incremented every time the node's value actually changes (not merely
    /// recomputes). Dependents compare this against the version they last
    /// observed to resolve `MaybeDirty` without recomputing.
    version: u64,

    /// Nodes this node reads from, in first-read order.
    dependencies: IndexSet<NodeId>,

    /// The version of each dependency observed during the most recent
    /// (re)computation.
    dep_versions: Vec<(NodeId, u64)>,

    /// Nodes that read from this node.
    dependents: IndexSet<NodeId>,
}

impl Node {
    pub(crate) fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            // Value cells are born clean; computations are born dirty so the
            // first read/run always executes.
            dirty: match kind {
                NodeKind::Value => DirtyState::Clean,
                _ => DirtyState::Dirty,
            },
            version: 0,
            dependencies: IndexSet::new(),
            dep_versions: Vec::new(),
            dependents: IndexSet::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn dirty_state(&self) -> DirtyState {
        self.dirty
    }

    pub fn is_clean(&self) -> bool {
        self.dirty == DirtyState::Clean
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Record that this node's value actually changed.
    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = DirtyState::Clean;
    }

    pub fn mark_maybe_dirty(&mut self) {
        if self.dirty == DirtyState::Clean {
            self.dirty = DirtyState::MaybeDirty;
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = DirtyState::Dirty;
    }

    pub fn add_dependency(&mut self, node_id: NodeId) {
        self.dependencies.insert(node_id);
    }

    pub fn remove_dependency(&mut self, node_id: NodeId) {
        self.dependencies.shift_remove(&node_id);
    }

    pub fn dependencies(&self) -> &IndexSet<NodeId> {
        &self.dependencies
    }

    pub fn clear_dependencies(&mut self) {
        self.dependencies.clear();
        self.dep_versions.clear();
    }

    pub fn add_dependent(&mut self, node_id: NodeId) {
        self.dependents.insert(node_id);
    }

    pub fn remove_dependent(&mut self, node_id: NodeId) {
        self.dependents.shift_remove(&node_id);
    }

    pub fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }

    /// Record the dependency versions observed during a (re)computation.
    pub fn record_dep_versions(&mut self, versions: Vec<(NodeId, u64)>) {
        self.dep_versions = versions;
    }

    pub fn dep_versions(&self) -> &[(NodeId, u64)] {
        &self.dep_versions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_node_starts_clean() {
        let node = Node::new(NodeId::from_raw(0), NodeKind::Value);
        assert_eq!(node.kind(), NodeKind::Value);
        assert!(node.is_clean());
    }

    #[test]
    fn derived_node_starts_dirty() {
        let node = Node::new(NodeId::from_raw(0), NodeKind::Derived);
        assert_eq!(node.dirty_state(), DirtyState::Dirty);
    }

    #[test]
    fn dependency_management() {
        let mut node = Node::new(NodeId::from_raw(0), NodeKind::Derived);
        let dep1 = NodeId::from_raw(1);
        let dep2 = NodeId::from_raw(2);

        node.add_dependency(dep1);
        node.add_dependency(dep2);

        assert!(node.dependencies().contains(&dep1));
        assert!(node.dependencies().contains(&dep2));
        assert_eq!(node.dependencies().len(), 2);

        node.remove_dependency(dep1);
        assert!(!node.dependencies().contains(&dep1));
        assert_eq!(node.dependencies().len(), 1);
    }

    #[test]
    fn dirty_state_transitions() {
        let mut node = Node::new(NodeId::from_raw(0), NodeKind::Derived);

        assert_eq!(node.dirty_state(), DirtyState::Dirty);

        node.mark_clean();
        assert_eq!(node.dirty_state(), DirtyState::Clean);

        node.mark_maybe_dirty();
        assert_eq!(node.dirty_state(), DirtyState::MaybeDirty);

        node.mark_dirty();
        assert_eq!(node.dirty_state(), DirtyState::Dirty);

        // MaybeDirty never downgrades an existing Dirty.
        node.mark_maybe_dirty();
        assert_eq!(node.dirty_state(), DirtyState::Dirty);
    }

    #[test]
    fn version_bumps_are_monotonic() {
        let mut node = Node::new(NodeId::from_raw(0), NodeKind::Value);
        assert_eq!(node.version(), 0);
        node.bump_version();
        node.bump_version();
        assert_eq!(node.version(), 2);
    }
}
