//! Reactive Primitives
//!
//! This module implements the reactive state layer: value cells, derived
//! cells, and effect cells, plus the scopes that own them.
//!
//! # Concepts
//!
//! ## Value cells
//!
//! A [`Cell`] is a container for mutable state. When a cell is read through
//! [`Runtime::get`] while a computation is executing, the runtime records the
//! computation as a dependent. When the cell is written, dependents are
//! marked dirty.
//!
//! ## Derived cells
//!
//! A [`Derived`] is a cached computation re-evaluated the first time it is
//! read after a dependency changed. Equal recomputation results do not dirty
//! downstream readers.
//!
//! ## Effects
//!
//! An effect is a side-effecting computation run after a unit of work
//! commits, when its dependencies changed. An effect may return a cleanup
//! callback, invoked before the next run or on disposal.
//!
//! # Implementation Notes
//!
//! Unlike frameworks that discover dependencies through a hidden
//! thread-local "current computation" pointer, every operation here goes
//! through an explicit `&mut Runtime`. The runtime carries its own tracking
//! stack, so reactivity is an ordinary value with no ambient global state:
//! two runtimes on one thread cannot observe each other, and tests need no
//! simulated globals.

mod cell;
mod runtime;
mod scope;

pub use cell::{Cell, Derived, EffectHandle};
pub use runtime::{Cleanup, FlushError, RenderError, Runtime};
pub use scope::{HookOrderViolation, ScopeId, SlotKind};
