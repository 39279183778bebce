//! Dependency Graph
//!
//! This module implements the computational dependency graph that tracks
//! relationships between reactive cells and computations.
//!
//! # Overview
//!
//! The graph is a DAG where:
//!
//! - Nodes represent value cells or computations (derived cells, effects,
//!   component renders)
//! - Edges represent dependencies: if A reads B, there is an edge from B to A
//!
//! When a value cell changes, we traverse the graph to mark affected nodes
//! dirty. The reactive runtime then pulls: only nodes whose inputs actually
//! changed (by version comparison) recompute.
//!
//! # Design Decisions
//!
//! 1. The graph is session-local and owned by the runtime, not a global
//!    registry. One session's cells are invisible to every other session.
//!
//! 2. We maintain both forward (dependencies) and reverse (dependents)
//!    edges to enable efficient traversal in both directions.
//!
//! 3. Cycles are rejected when the edge is added, not detected during
//!    evaluation.

#[allow(clippy::module_inception)]
mod graph;
mod node;

pub use graph::{Graph, GraphError};
pub use node::{DirtyState, Node, NodeId, NodeKind};
