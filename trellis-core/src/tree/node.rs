//! UI Tree Snapshots
//!
//! A render pass produces an immutable [`VNode`] tree describing the entire
//! view. The engine then *mounts* it: every node is assigned a hydration
//! identifier (HID) in depth-first, left-to-right order, producing a
//! [`MountedNode`] tree that the differ compares against on the next pass.
//!
//! HID assignment is a pure function of tree shape and the allocator's
//! counter: the same tree mounted against the same counter always yields the
//! same HID sequence. Retired HIDs are never reused within a session.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Hydration identifier: a small integer naming one node for event routing
/// and patch targeting.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Hid(pub u32);

impl Hid {
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Hid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic per-session HID source.
#[derive(Debug, Clone)]
pub struct HidAllocator {
    next: u32,
}

impl HidAllocator {
    pub fn new() -> Self {
        // 0 is reserved as "no node" in the wire format.
        Self { next: 1 }
    }

    pub fn alloc(&mut self) -> Hid {
        let hid = Hid(self.next);
        self.next += 1;
        hid
    }
}

impl Default for HidAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// The kind of input event an element can listen for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Click,
    Input,
    Submit,
    KeyDown,
    Focus,
    Blur,
    /// An application-defined event name.
    Custom(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Click => "click",
            EventKind::Input => "input",
            EventKind::Submit => "submit",
            EventKind::KeyDown => "keydown",
            EventKind::Focus => "focus",
            EventKind::Blur => "blur",
            EventKind::Custom(name) => name,
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "click" => EventKind::Click,
            "input" => EventKind::Input,
            "submit" => EventKind::Submit,
            "keydown" => EventKind::KeyDown,
            "focus" => EventKind::Focus,
            "blur" => EventKind::Blur,
            other => EventKind::Custom(other.to_owned()),
        }
    }
}

/// One node of a render-pass snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum VNode {
    Element(VElement),
    Text(String),
    /// A keyless grouping node; flattened into the parent's child list at
    /// mount time. Component boundaries render to fragments.
    Fragment(Vec<VNode>),
}

/// An element node: tag, sorted attributes, event listeners, children.
#[derive(Debug, Clone, PartialEq)]
pub struct VElement {
    pub tag: String,
    /// Explicit reconciliation identity for keyed child lists.
    pub key: Option<String>,
    /// Sorted by attribute name; maintained by [`VElement::attr`].
    pub attrs: Vec<(String, String)>,
    /// `(event kind, handler name)` pairs dispatched through the session's
    /// handler table.
    pub events: Vec<(EventKind, String)>,
    pub children: Vec<VNode>,
}

impl VElement {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            key: None,
            attrs: Vec::new(),
            events: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set an attribute, keeping the attribute list sorted by name.
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.attrs.binary_search_by(|(n, _)| n.as_str().cmp(&name)) {
            Ok(i) => self.attrs[i].1 = value,
            Err(i) => self.attrs.insert(i, (name, value)),
        }
        self
    }

    /// Attach an event listener dispatched to the named session handler.
    pub fn on(mut self, kind: EventKind, handler: impl Into<String>) -> Self {
        self.events.push((kind, handler.into()));
        self
    }

    pub fn child(mut self, child: VNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = VNode>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn build(self) -> VNode {
        VNode::Element(self)
    }
}

/// Shorthand element constructor.
pub fn el(tag: impl Into<String>) -> VElement {
    VElement::new(tag)
}

/// Shorthand text constructor.
pub fn text(value: impl Into<String>) -> VNode {
    VNode::Text(value.into())
}

/// A mounted node: one snapshot node with its assigned HID.
#[derive(Debug, Clone, PartialEq)]
pub struct MountedNode {
    pub hid: Hid,
    pub kind: MountedKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MountedKind {
    Element {
        tag: String,
        key: Option<String>,
        attrs: Vec<(String, String)>,
        events: Vec<(EventKind, String)>,
        children: Vec<MountedNode>,
    },
    Text(String),
}

impl MountedNode {
    /// Depth-first pre-order HID listing, for determinism checks.
    pub fn hid_sequence(&self) -> Vec<Hid> {
        let mut out = Vec::new();
        self.collect_hids(&mut out);
        out
    }

    fn collect_hids(&self, out: &mut Vec<Hid>) {
        out.push(self.hid);
        if let MountedKind::Element { children, .. } = &self.kind {
            for child in children {
                child.collect_hids(out);
            }
        }
    }
}

/// Mount a snapshot: assign HIDs depth-first, left-to-right, flattening
/// fragments into their parent's child list.
pub fn mount(node: &VNode, alloc: &mut HidAllocator) -> MountedNode {
    match node {
        VNode::Text(value) => MountedNode {
            hid: alloc.alloc(),
            kind: MountedKind::Text(value.clone()),
        },
        VNode::Element(element) => {
            let hid = alloc.alloc();
            let mut children = Vec::new();
            mount_children(&element.children, alloc, &mut children);
            MountedNode {
                hid,
                kind: MountedKind::Element {
                    tag: element.tag.clone(),
                    key: element.key.clone(),
                    attrs: element.attrs.clone(),
                    events: element.events.clone(),
                    children,
                },
            }
        }
        VNode::Fragment(items) => {
            // A root-level fragment still needs a single node to anchor
            // patches; wrap it the way a root element would be.
            let hid = alloc.alloc();
            let mut children = Vec::new();
            mount_children(items, alloc, &mut children);
            MountedNode {
                hid,
                kind: MountedKind::Element {
                    tag: "div".to_owned(),
                    key: None,
                    attrs: Vec::new(),
                    events: Vec::new(),
                    children,
                },
            }
        }
    }
}

fn mount_children(children: &[VNode], alloc: &mut HidAllocator, out: &mut Vec<MountedNode>) {
    for child in children {
        match child {
            VNode::Fragment(items) => mount_children(items, alloc, out),
            other => out.push(mount(other, alloc)),
        }
    }
}

/// Flatten fragments one level so child reconciliation sees the same list
/// shape mounting produced.
pub(crate) fn flatten_children(children: &[VNode]) -> Vec<&VNode> {
    let mut out = Vec::new();
    collect_flat(children, &mut out);
    out
}

fn collect_flat<'a>(children: &'a [VNode], out: &mut Vec<&'a VNode>) {
    for child in children {
        match child {
            VNode::Fragment(items) => collect_flat(items, out),
            other => out.push(other),
        }
    }
}

/// Walk a mounted tree collecting `(hid, event kind, handler name)` entries
/// for the session's dispatch table.
pub fn collect_bindings(node: &MountedNode, out: &mut Vec<(Hid, EventKind, String)>) {
    if let MountedKind::Element {
        events, children, ..
    } = &node.kind
    {
        for (kind, handler) in events {
            out.push((node.hid, kind.clone(), handler.clone()));
        }
        for child in children {
            collect_bindings(child, out);
        }
    }
}
