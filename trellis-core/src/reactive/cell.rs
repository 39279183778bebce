//! Cell Handles
//!
//! A cell handle is a small `Copy` token naming one node in a runtime's
//! dependency graph. Handles hold no storage themselves; every read and
//! write goes through the owning [`Runtime`](super::Runtime), which is the
//! explicit proof of loop ownership the write API requires.
//!
//! Because handles are `Copy`, closures capture them by value:
//!
//! ```rust,ignore
//! let count = rt.cell(0i64);
//! let doubled = rt.derived(move |rt| rt.get(count) * 2);
//! ```

use std::fmt::Debug;
use std::marker::PhantomData;

use crate::graph::NodeId;

/// Handle to a mutable value cell holding a `T`.
pub struct Cell<T> {
    pub(crate) id: NodeId,
    pub(crate) _marker: PhantomData<fn() -> T>,
}

impl<T> Cell<T> {
    pub(crate) fn new(id: NodeId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// The graph node backing this cell.
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Cell<T> {}

impl<T> Debug for Cell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Cell").field(&self.id.raw()).finish()
    }
}

impl<T> PartialEq for Cell<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl<T> Eq for Cell<T> {}

/// Handle to a derived (cached, lazily recomputed) cell producing a `T`.
pub struct Derived<T> {
    pub(crate) id: NodeId,
    pub(crate) _marker: PhantomData<fn() -> T>,
}

impl<T> Derived<T> {
    pub(crate) fn new(id: NodeId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Derived<T> {}

impl<T> Debug for Derived<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Derived").field(&self.id.raw()).finish()
    }
}

/// Handle to an effect cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectHandle {
    pub(crate) id: NodeId,
}

impl EffectHandle {
    pub(crate) fn new(id: NodeId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }
}
