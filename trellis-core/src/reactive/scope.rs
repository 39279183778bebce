//! Scopes and Hook-Order Slots
//!
//! A scope owns the cells created during one component instance's render
//! (or during session setup, for the root scope). Disposing a scope runs
//! effect cleanups and removes every owned node from the graph.
//!
//! # Call-order-addressed storage
//!
//! Cells created during a render are re-associated with existing storage by
//! call order: the Nth creation call on every re-render must name the same
//! slot. The slot array records the kind and value type of each slot; after
//! the first render the shape is locked, and any deviation on a later render
//! is a [`HookOrderViolation`], which is session-fatal rather than a silent
//! re-association with the wrong storage.

use std::any::TypeId;

use thiserror::Error;

use crate::graph::NodeId;

/// Unique identifier for a scope within one runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub(crate) u64);

impl ScopeId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// What kind of cell a slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Value,
    Derived,
    Effect,
}

impl SlotKind {
    fn name(&self) -> &'static str {
        match self {
            SlotKind::Value => "value",
            SlotKind::Derived => "derived",
            SlotKind::Effect => "effect",
        }
    }
}

/// One call-order-addressed storage slot.
#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) kind: SlotKind,
    pub(crate) type_id: TypeId,
    pub(crate) node: NodeId,
}

/// A component instance's (or the session root's) cell owner.
#[derive(Debug)]
pub(crate) struct Scope {
    pub(crate) id: ScopeId,
    pub(crate) slots: Vec<Slot>,
    pub(crate) cursor: usize,
    /// Nodes created while this scope was current, in creation order.
    pub(crate) owned: Vec<NodeId>,
    /// Set after the first render completes; from then on the slot shape
    /// must not change.
    pub(crate) shape_locked: bool,
}

impl Scope {
    pub(crate) fn new(id: ScopeId) -> Self {
        Self {
            id,
            slots: Vec::new(),
            cursor: 0,
            owned: Vec::new(),
            shape_locked: false,
        }
    }
}

/// A component instance's cell-creation sequence changed shape between
/// renders. Recovery is impossible: the exact cell/view association is lost.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookOrderViolation {
    /// A creation call's kind or value type differs from the recorded slot.
    #[error(
        "scope {scope}: slot {slot} was created as {expected} but re-created as {found}"
    )]
    KindMismatch {
        scope: u64,
        slot: usize,
        expected: &'static str,
        found: &'static str,
    },

    /// The value type at a slot changed between renders.
    #[error("scope {scope}: slot {slot} value type changed between renders")]
    TypeMismatch { scope: u64, slot: usize },

    /// More creation calls than the recorded shape allows.
    #[error("scope {scope}: {count} cell creations exceed the recorded {expected}")]
    TooManyCalls {
        scope: u64,
        count: usize,
        expected: usize,
    },

    /// Fewer creation calls than the recorded shape requires.
    #[error("scope {scope}: only {count} cell creations, expected {expected}")]
    TooFewCalls {
        scope: u64,
        count: usize,
        expected: usize,
    },
}

impl Scope {
    /// Claim the next slot for a creation call of the given kind/type.
    ///
    /// Returns the existing node for a revisited slot, or `None` when a new
    /// slot should be created (first render only).
    pub(crate) fn claim_slot(
        &mut self,
        kind: SlotKind,
        type_id: TypeId,
    ) -> Result<Option<NodeId>, HookOrderViolation> {
        let index = self.cursor;
        if index < self.slots.len() {
            let slot = &self.slots[index];
            if slot.kind != kind {
                return Err(HookOrderViolation::KindMismatch {
                    scope: self.id.0,
                    slot: index,
                    expected: slot.kind.name(),
                    found: kind.name(),
                });
            }
            if slot.type_id != type_id {
                return Err(HookOrderViolation::TypeMismatch {
                    scope: self.id.0,
                    slot: index,
                });
            }
            self.cursor += 1;
            return Ok(Some(slot.node));
        }
        if self.shape_locked {
            return Err(HookOrderViolation::TooManyCalls {
                scope: self.id.0,
                count: index + 1,
                expected: self.slots.len(),
            });
        }
        Ok(None)
    }

    /// Record a freshly created slot (first render only).
    pub(crate) fn record_slot(&mut self, kind: SlotKind, type_id: TypeId, node: NodeId) {
        self.slots.push(Slot {
            kind,
            type_id,
            node,
        });
        self.cursor += 1;
    }

    /// Validate the shape at the end of a render and lock it after the first.
    pub(crate) fn finish_render(&mut self) -> Result<(), HookOrderViolation> {
        if self.shape_locked && self.cursor != self.slots.len() {
            return Err(HookOrderViolation::TooFewCalls {
                scope: self.id.0,
                count: self.cursor,
                expected: self.slots.len(),
            });
        }
        self.shape_locked = true;
        Ok(())
    }

    pub(crate) fn reset_cursor(&mut self) {
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Graph, NodeKind};

    fn node(graph: &mut Graph) -> NodeId {
        graph.add_node(NodeKind::Value)
    }

    #[test]
    fn first_render_records_slots() {
        let mut graph = Graph::new();
        let mut scope = Scope::new(ScopeId(0));

        assert_eq!(
            scope.claim_slot(SlotKind::Value, TypeId::of::<i32>()).unwrap(),
            None
        );
        let n = node(&mut graph);
        scope.record_slot(SlotKind::Value, TypeId::of::<i32>(), n);
        scope.finish_render().unwrap();

        // Second render re-associates the same node.
        scope.reset_cursor();
        assert_eq!(
            scope.claim_slot(SlotKind::Value, TypeId::of::<i32>()).unwrap(),
            Some(n)
        );
        scope.finish_render().unwrap();
    }

    #[test]
    fn kind_change_is_a_violation() {
        let mut graph = Graph::new();
        let mut scope = Scope::new(ScopeId(3));
        let n = node(&mut graph);
        scope.claim_slot(SlotKind::Value, TypeId::of::<i32>()).unwrap();
        scope.record_slot(SlotKind::Value, TypeId::of::<i32>(), n);
        scope.finish_render().unwrap();

        scope.reset_cursor();
        let err = scope
            .claim_slot(SlotKind::Effect, TypeId::of::<()>())
            .unwrap_err();
        assert!(matches!(err, HookOrderViolation::KindMismatch { slot: 0, .. }));
    }

    #[test]
    fn type_change_is_a_violation() {
        let mut graph = Graph::new();
        let mut scope = Scope::new(ScopeId(1));
        let n = node(&mut graph);
        scope.claim_slot(SlotKind::Value, TypeId::of::<i32>()).unwrap();
        scope.record_slot(SlotKind::Value, TypeId::of::<i32>(), n);
        scope.finish_render().unwrap();

        scope.reset_cursor();
        let err = scope
            .claim_slot(SlotKind::Value, TypeId::of::<String>())
            .unwrap_err();
        assert!(matches!(err, HookOrderViolation::TypeMismatch { slot: 0, .. }));
    }

    #[test]
    fn extra_call_after_lock_is_a_violation() {
        let mut scope = Scope::new(ScopeId(2));
        scope.finish_render().unwrap(); // zero-slot shape locked

        let err = scope
            .claim_slot(SlotKind::Value, TypeId::of::<i32>())
            .unwrap_err();
        assert!(matches!(err, HookOrderViolation::TooManyCalls { .. }));
    }

    #[test]
    fn missing_call_detected_at_render_end() {
        let mut graph = Graph::new();
        let mut scope = Scope::new(ScopeId(4));
        let n = node(&mut graph);
        scope.claim_slot(SlotKind::Value, TypeId::of::<i32>()).unwrap();
        scope.record_slot(SlotKind::Value, TypeId::of::<i32>(), n);
        scope.finish_render().unwrap();

        scope.reset_cursor();
        // No creation calls this render.
        let err = scope.finish_render().unwrap_err();
        assert_eq!(
            err,
            HookOrderViolation::TooFewCalls {
                scope: 4,
                count: 0,
                expected: 1
            }
        );
    }
}
