//! Tree Diffing
//!
//! Compares the previous mounted tree against a fresh snapshot and emits an
//! ordered patch list plus the new mounted tree.
//!
//! # Algorithm
//!
//! Recursive structural comparison:
//!
//! - Two text nodes: emit one `SetText` with the full new string when they
//!   differ. No sub-string diffing.
//! - Two elements with the same tag and key: diff attributes by merged walk
//!   over the sorted lists, then reconcile children.
//! - Anything else (tag change, key change, kind change): `ReplaceNode`.
//!   No in-place merge is attempted across identity changes.
//!
//! Child lists reconcile positionally unless every child on both sides
//! carries a distinct explicit key, in which case a keyed pass pairs nodes by key
//! and computes a longest-increasing-subsequence anchor set so that
//! out-of-order survivors produce `MoveNode` operations instead of
//! remove/insert pairs. Minimizing moves is preferred over minimizing total
//! operation count.
//!
//! A node judged "the same logical node" keeps its HID; fresh subtrees are
//! mounted with new HIDs; removed HIDs are retired and never reused.

use std::collections::{HashMap, HashSet};

use smallvec::SmallVec;

use super::node::{
    flatten_children, mount, HidAllocator, Hid, MountedKind, MountedNode, VNode,
};
use super::patch::Patch;

/// Diff `old` against `new`, producing the ordered patch list and the new
/// mounted tree. `alloc` supplies HIDs for inserted subtrees.
pub fn diff(
    old: &MountedNode,
    new: &VNode,
    alloc: &mut HidAllocator,
) -> (Vec<Patch>, MountedNode) {
    let mut patches = Vec::new();
    let mounted = diff_node(old, new, alloc, &mut patches);
    (patches, mounted)
}

fn diff_node(
    old: &MountedNode,
    new: &VNode,
    alloc: &mut HidAllocator,
    patches: &mut Vec<Patch>,
) -> MountedNode {
    match (&old.kind, new) {
        (MountedKind::Text(old_text), VNode::Text(new_text)) => {
            if old_text != new_text {
                patches.push(Patch::SetText {
                    hid: old.hid,
                    text: new_text.clone(),
                });
            }
            MountedNode {
                hid: old.hid,
                kind: MountedKind::Text(new_text.clone()),
            }
        }
        (
            MountedKind::Element {
                tag,
                key,
                attrs,
                children,
                ..
            },
            VNode::Element(new_el),
        ) if *tag == new_el.tag && *key == new_el.key => {
            diff_attrs(old.hid, attrs, &new_el.attrs, patches);
            let new_children = diff_children(
                old.hid,
                children,
                &flatten_children(&new_el.children),
                alloc,
                patches,
            );
            MountedNode {
                hid: old.hid,
                kind: MountedKind::Element {
                    tag: new_el.tag.clone(),
                    key: new_el.key.clone(),
                    attrs: new_el.attrs.clone(),
                    events: new_el.events.clone(),
                    children: new_children,
                },
            }
        }
        // A root fragment was mounted as an anonymous wrapper; keep diffing
        // through it as long as the wrapper shape still matches.
        (
            MountedKind::Element {
                tag,
                key: None,
                children,
                ..
            },
            VNode::Fragment(items),
        ) if tag == "div" => {
            let new_children =
                diff_children(old.hid, children, &flatten_children(items), alloc, patches);
            MountedNode {
                hid: old.hid,
                kind: MountedKind::Element {
                    tag: "div".to_owned(),
                    key: None,
                    attrs: Vec::new(),
                    events: Vec::new(),
                    children: new_children,
                },
            }
        }
        // Identity changed: replace, never merge.
        _ => {
            let node = mount(new, alloc);
            patches.push(Patch::ReplaceNode {
                hid: old.hid,
                node: node.clone(),
            });
            node
        }
    }
}

/// Merged walk over two name-sorted attribute lists.
fn diff_attrs(
    hid: Hid,
    old: &[(String, String)],
    new: &[(String, String)],
    patches: &mut Vec<Patch>,
) {
    let (mut i, mut j) = (0, 0);
    while i < old.len() && j < new.len() {
        match old[i].0.cmp(&new[j].0) {
            std::cmp::Ordering::Less => {
                patches.push(Patch::RemoveAttr {
                    hid,
                    name: old[i].0.clone(),
                });
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                patches.push(Patch::SetAttr {
                    hid,
                    name: new[j].0.clone(),
                    value: new[j].1.clone(),
                });
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                if old[i].1 != new[j].1 {
                    patches.push(Patch::SetAttr {
                        hid,
                        name: new[j].0.clone(),
                        value: new[j].1.clone(),
                    });
                }
                i += 1;
                j += 1;
            }
        }
    }
    for (name, _) in &old[i..] {
        patches.push(Patch::RemoveAttr {
            hid,
            name: name.clone(),
        });
    }
    for (name, value) in &new[j..] {
        patches.push(Patch::SetAttr {
            hid,
            name: name.clone(),
            value: value.clone(),
        });
    }
}

fn node_key(node: &VNode) -> Option<&str> {
    match node {
        VNode::Element(el) => el.key.as_deref(),
        _ => None,
    }
}

fn mounted_key(node: &MountedNode) -> Option<&str> {
    match &node.kind {
        MountedKind::Element { key, .. } => key.as_deref(),
        _ => None,
    }
}

/// All keys present and no key repeated. A list with a duplicate key
/// falls back to positional pairing; keyed matching would pair two new
/// children with the same old node and emit patches against one HID
/// twice.
fn keys_unique<'a>(mut keys: impl Iterator<Item = Option<&'a str>>) -> bool {
    let mut seen = HashSet::new();
    keys.all(|k| match k {
        Some(key) => seen.insert(key),
        None => false,
    })
}

fn diff_children(
    parent: Hid,
    old: &[MountedNode],
    new: &[&VNode],
    alloc: &mut HidAllocator,
    patches: &mut Vec<Patch>,
) -> Vec<MountedNode> {
    let keyed = !new.is_empty()
        && keys_unique(new.iter().map(|n| node_key(n)))
        && keys_unique(old.iter().map(mounted_key));
    if keyed {
        diff_children_keyed(parent, old, new, alloc, patches)
    } else {
        diff_children_positional(parent, old, new, alloc, patches)
    }
}

/// Index-based pairing for unkeyed lists.
fn diff_children_positional(
    parent: Hid,
    old: &[MountedNode],
    new: &[&VNode],
    alloc: &mut HidAllocator,
    patches: &mut Vec<Patch>,
) -> Vec<MountedNode> {
    let common = old.len().min(new.len());
    let mut out = Vec::with_capacity(new.len());

    for i in 0..common {
        out.push(diff_node(&old[i], new[i], alloc, patches));
    }
    for removed in &old[common..] {
        patches.push(Patch::RemoveNode { hid: removed.hid });
    }
    for (i, appended) in new.iter().enumerate().skip(common) {
        let node = mount(appended, alloc);
        patches.push(Patch::InsertNode {
            parent,
            index: i as u32,
            node: node.clone(),
        });
        out.push(node);
    }
    out
}

/// Key-based pairing with an LIS anchor set to minimize moves.
fn diff_children_keyed(
    parent: Hid,
    old: &[MountedNode],
    new: &[&VNode],
    alloc: &mut HidAllocator,
    patches: &mut Vec<Patch>,
) -> Vec<MountedNode> {
    let mut old_index: HashMap<&str, usize> = HashMap::with_capacity(old.len());
    for (i, node) in old.iter().enumerate() {
        if let Some(key) = mounted_key(node) {
            old_index.insert(key, i);
        }
    }

    // For each new position, the old position of the node with the same key.
    let matched: Vec<Option<usize>> = new
        .iter()
        .map(|n| node_key(n).and_then(|k| old_index.get(k).copied()))
        .collect();

    // Removals first: old nodes whose key disappeared.
    let survivors: HashSet<usize> = matched.iter().flatten().copied().collect();
    for (i, node) in old.iter().enumerate() {
        if !survivors.contains(&i) {
            patches.push(Patch::RemoveNode { hid: node.hid });
        }
    }

    // Survivors whose old positions already appear in increasing order can
    // stay anchored; everything else moves.
    let pairs: SmallVec<[(usize, usize); 16]> = matched
        .iter()
        .enumerate()
        .filter_map(|(j, m)| m.map(|i| (j, i)))
        .collect();
    let lis_positions = longest_increasing_run(&pairs);
    let anchored: HashSet<usize> = lis_positions.iter().map(|&p| pairs[p].0).collect();

    let mut out = Vec::with_capacity(new.len());
    for (j, new_child) in new.iter().enumerate() {
        match matched[j] {
            Some(i) => {
                let node = diff_node(&old[i], new_child, alloc, patches);
                if !anchored.contains(&j) {
                    patches.push(Patch::MoveNode {
                        hid: node.hid,
                        parent,
                        index: j as u32,
                    });
                }
                out.push(node);
            }
            None => {
                let node = mount(new_child, alloc);
                patches.push(Patch::InsertNode {
                    parent,
                    index: j as u32,
                    node: node.clone(),
                });
                out.push(node);
            }
        }
    }
    out
}

/// Positions (into `pairs`) of one longest strictly-increasing subsequence
/// of the old indices. Patience sorting with predecessor links.
fn longest_increasing_run(pairs: &[(usize, usize)]) -> Vec<usize> {
    if pairs.is_empty() {
        return Vec::new();
    }
    // tails[k] = position of the smallest known tail of an increasing
    // subsequence of length k+1.
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; pairs.len()];

    for (pos, &(_, old_i)) in pairs.iter().enumerate() {
        let insert_at = tails.partition_point(|&t| pairs[t].1 < old_i);
        if insert_at > 0 {
            prev[pos] = Some(tails[insert_at - 1]);
        }
        if insert_at == tails.len() {
            tails.push(pos);
        } else {
            tails[insert_at] = pos;
        }
    }

    let mut result = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(pos) = cursor {
        result.push(pos);
        cursor = prev[pos];
    }
    result.reverse();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::node::{el, text, EventKind};

    fn mounted(tree: &VNode) -> (MountedNode, HidAllocator) {
        let mut alloc = HidAllocator::new();
        let node = mount(tree, &mut alloc);
        (node, alloc)
    }

    #[test]
    fn self_diff_is_empty() {
        let tree = el("div")
            .attr("class", "page")
            .child(el("span").child(text("hello")).build())
            .child(text("world"))
            .build();

        let (old, mut alloc) = mounted(&tree);
        let (patches, new_mounted) = diff(&old, &tree, &mut alloc);

        assert!(patches.is_empty());
        assert_eq!(new_mounted, old);
    }

    #[test]
    fn one_text_change_is_one_set_text() {
        let before = el("div")
            .child(el("span").child(text("count: 0")).build())
            .child(el("span").child(text("static")).build())
            .build();
        let after = el("div")
            .child(el("span").child(text("count: 5")).build())
            .child(el("span").child(text("static")).build())
            .build();

        let (old, mut alloc) = mounted(&before);
        let (patches, _) = diff(&old, &after, &mut alloc);

        assert_eq!(patches.len(), 1);
        match &patches[0] {
            Patch::SetText { text, .. } => assert_eq!(text, "count: 5"),
            other => panic!("expected SetText, got {other:?}"),
        }
    }

    #[test]
    fn attr_set_change_and_remove() {
        let before = el("input").attr("id", "a").attr("type", "text").build();
        let after = el("input").attr("type", "email").attr("value", "x").build();

        let (old, mut alloc) = mounted(&before);
        let (patches, _) = diff(&old, &after, &mut alloc);

        assert_eq!(
            patches,
            vec![
                Patch::RemoveAttr {
                    hid: old.hid,
                    name: "id".to_owned()
                },
                Patch::SetAttr {
                    hid: old.hid,
                    name: "type".to_owned(),
                    value: "email".to_owned()
                },
                Patch::SetAttr {
                    hid: old.hid,
                    name: "value".to_owned(),
                    value: "x".to_owned()
                },
            ]
        );
    }

    #[test]
    fn tag_change_is_replace_not_merge() {
        let before = el("span").child(text("x")).build();
        let after = el("strong").child(text("x")).build();

        let (old, mut alloc) = mounted(&before);
        let (patches, new_mounted) = diff(&old, &after, &mut alloc);

        assert_eq!(patches.len(), 1);
        assert!(matches!(patches[0], Patch::ReplaceNode { hid, .. } if hid == old.hid));
        // Replacement subtree has fresh HIDs.
        assert!(new_mounted.hid.raw() > old.hid_sequence().last().map(|h| h.raw()).unwrap_or(0));
    }

    #[test]
    fn key_change_is_replace() {
        let before = el("li").key("a").child(text("a")).build();
        let after = el("li").key("b").child(text("a")).build();

        let (old, mut alloc) = mounted(&before);
        let (patches, _) = diff(&old, &after, &mut alloc);
        assert!(matches!(patches[0], Patch::ReplaceNode { .. }));
    }

    fn keyed_list(keys: &[&str]) -> VNode {
        el("ul")
            .children(
                keys.iter()
                    .map(|k| el("li").key(*k).child(text(*k)).build()),
            )
            .build()
    }

    #[test]
    fn keyed_rotation_emits_only_moves() {
        let before = keyed_list(&["a", "b", "c"]);
        let after = keyed_list(&["c", "a", "b"]);

        let (old, mut alloc) = mounted(&before);
        let (patches, new_mounted) = diff(&old, &after, &mut alloc);

        assert!(
            patches
                .iter()
                .all(|p| matches!(p, Patch::MoveNode { .. })),
            "rotation must not remove/insert: {patches:?}"
        );
        assert_eq!(patches.len(), 1);

        // Every HID survived the rotation.
        let mut old_hids = old.hid_sequence();
        let mut new_hids = new_mounted.hid_sequence();
        old_hids.sort();
        new_hids.sort();
        assert_eq!(old_hids, new_hids);
    }

    #[test]
    fn keyed_insert_and_remove() {
        let before = keyed_list(&["a", "b", "c"]);
        let after = keyed_list(&["a", "c", "d"]);

        let (old, mut alloc) = mounted(&before);
        let (patches, _) = diff(&old, &after, &mut alloc);

        let removes = patches
            .iter()
            .filter(|p| matches!(p, Patch::RemoveNode { .. }))
            .count();
        let inserts = patches
            .iter()
            .filter(|p| matches!(p, Patch::InsertNode { .. }))
            .count();
        assert_eq!(removes, 1); // b
        assert_eq!(inserts, 1); // d

        // Removals precede structural changes.
        assert!(matches!(patches[0], Patch::RemoveNode { .. }));
    }

    #[test]
    fn duplicate_keys_fall_back_to_positional() {
        let make = |texts: [&str; 2]| {
            el("ul")
                .child(el("li").key("a").child(text(texts[0])).build())
                .child(el("li").key("a").child(text(texts[1])).build())
                .build()
        };
        let before = make(["first", "second"]);
        let after = make(["second", "first"]);

        let (old, mut alloc) = mounted(&before);
        let (patches, _) = diff(&old, &after, &mut alloc);

        // Key matching would pair both new children with the same old
        // node and patch one HID twice.
        let mut targets: Vec<Hid> = patches
            .iter()
            .map(|p| match p {
                Patch::SetText { hid, .. } => *hid,
                other => panic!("expected positional SetText, got {other:?}"),
            })
            .collect();
        assert_eq!(targets.len(), 2);
        targets.dedup();
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn unkeyed_children_pair_positionally() {
        let before = el("div").child(text("a")).child(text("b")).build();
        let after = el("div").child(text("b")).build();

        let (old, mut alloc) = mounted(&before);
        let (patches, _) = diff(&old, &after, &mut alloc);

        // Position 0 text changes, position 1 removed.
        assert_eq!(patches.len(), 2);
        assert!(matches!(&patches[0], Patch::SetText { text, .. } if text == "b"));
        assert!(matches!(patches[1], Patch::RemoveNode { .. }));
    }

    #[test]
    fn retired_hids_are_never_reused() {
        let before = el("div").child(text("a")).build();
        let after_removed = el("div").build();
        let after_reinserted = el("div").child(text("a")).build();

        let (old, mut alloc) = mounted(&before);
        let removed_hid = old.hid_sequence()[1];

        let (_, middle) = diff(&old, &after_removed, &mut alloc);
        let (patches, _) = diff(&middle, &after_reinserted, &mut alloc);

        match &patches[0] {
            Patch::InsertNode { node, .. } => assert!(node.hid.raw() > removed_hid.raw()),
            other => panic!("expected InsertNode, got {other:?}"),
        }
    }

    #[test]
    fn event_rebinding_produces_no_patches() {
        let before = el("button")
            .on(EventKind::Click, "a")
            .child(text("x"))
            .build();
        let after = el("button")
            .on(EventKind::Click, "b")
            .child(text("x"))
            .build();

        let (old, mut alloc) = mounted(&before);
        let (patches, new_mounted) = diff(&old, &after, &mut alloc);

        // Handler names are server-side state; the remote tree is unchanged.
        assert!(patches.is_empty());
        let mut bindings = Vec::new();
        crate::tree::node::collect_bindings(&new_mounted, &mut bindings);
        assert_eq!(bindings[0].2, "b");
    }

    #[test]
    fn lis_positions_are_increasing() {
        // old indices in new order: 2, 0, 1 -> LIS is [0, 1]
        let pairs = vec![(0, 2), (1, 0), (2, 1)];
        let run = longest_increasing_run(&pairs);
        assert_eq!(run.len(), 2);
        assert_eq!(pairs[run[0]].1, 0);
        assert_eq!(pairs[run[1]].1, 1);
    }
}
