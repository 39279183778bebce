//! Element Tree
//!
//! The server-side description of what the client should display.
//!
//! A render pass produces a [`VNode`] value tree. Mounting assigns every
//! node a hierarchical identifier ([`Hid`]) shared with the client, yielding
//! a [`MountedNode`] tree that is retained as the last-delivered snapshot.
//! [`diff`] compares the retained snapshot against the next render and emits
//! the minimal ordered [`Patch`] list; [`render_document`] serializes a
//! snapshot as the initial HTML page.
//!
//! HIDs are allocated depth-first left-to-right and are never reused within
//! a session. Patch order matters: a batch applies left to right against the
//! tree as already modified by earlier entries in the same batch.

mod diff;
mod html;
mod node;
mod patch;

pub use diff::diff;
pub use html::render_document;
pub use node::{
    collect_bindings, el, mount, text, EventKind, Hid, HidAllocator, MountedKind, MountedNode,
    VElement, VNode,
};
pub use patch::Patch;
