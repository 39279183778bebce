//! Patch Operations
//!
//! A patch is one minimal mutation against the remote display's structure.
//! Patch lists are ordered: within one reconciliation, removals are emitted
//! before inserts and moves, and an insert always precedes any move that
//! positions relative to it.

use super::node::{Hid, MountedNode};

/// One mutation operation targeting the mounted tree on the remote side.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    /// Insert a freshly mounted subtree at `index` under `parent`.
    InsertNode {
        parent: Hid,
        index: u32,
        node: MountedNode,
    },

    /// Remove the node and its subtree. The HID is retired.
    RemoveNode { hid: Hid },

    /// Replace the node in place with a freshly mounted subtree.
    ReplaceNode { hid: Hid, node: MountedNode },

    /// Move an existing node to `index` under `parent`.
    MoveNode {
        hid: Hid,
        parent: Hid,
        index: u32,
    },

    /// Replace a text node's content with the full new string.
    SetText { hid: Hid, text: String },

    /// Set or overwrite one attribute.
    SetAttr {
        hid: Hid,
        name: String,
        value: String,
    },

    /// Remove one attribute.
    RemoveAttr { hid: Hid, name: String },
}

impl Patch {
    /// The HID the operation primarily targets.
    pub fn target(&self) -> Hid {
        match self {
            Patch::InsertNode { parent, .. } => *parent,
            Patch::RemoveNode { hid }
            | Patch::ReplaceNode { hid, .. }
            | Patch::MoveNode { hid, .. }
            | Patch::SetText { hid, .. }
            | Patch::SetAttr { hid, .. }
            | Patch::RemoveAttr { hid, .. } => *hid,
        }
    }
}
