//! Initial HTML Rendering
//!
//! Serializes a mounted tree into a complete HTML document for the first
//! response of a session. After that document is delivered, every further
//! update travels as binary patches; the document only has to carry enough
//! structure for the client runtime to index nodes by HID.
//!
//! Elements that can receive events get a `data-hid` attribute so the client
//! can address them without walking the tree. Everything else is plain
//! markup.

use super::node::{MountedKind, MountedNode};

/// Elements that never carry children and are serialized without a closing
/// tag.
const VOID_TAGS: &[&str] = &["br", "hr", "img", "input", "link", "meta"];

/// Render `root` as a complete HTML document. The active route is embedded
/// so a reconnecting client can hand it back in its hello.
pub fn render_document(root: &MountedNode, route: &str) -> String {
    let mut out = String::with_capacity(1024);
    out.push_str("<!doctype html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n</head>\n<body data-trellis-route=\"");
    escape_attr(route, &mut out);
    out.push_str("\">\n");
    write_node(root, &mut out);
    out.push_str("\n</body>\n</html>\n");
    out
}

fn write_node(node: &MountedNode, out: &mut String) {
    match &node.kind {
        MountedKind::Text(text) => escape_text(text, out),
        MountedKind::Element {
            tag,
            attrs,
            events,
            children,
            ..
        } => {
            out.push('<');
            out.push_str(tag);
            for (name, value) in attrs {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                escape_attr(value, out);
                out.push('"');
            }
            if !events.is_empty() {
                out.push_str(" data-hid=\"");
                out.push_str(&node.hid.raw().to_string());
                out.push('"');
            }
            if VOID_TAGS.contains(&tag.as_str()) {
                out.push_str(">");
                return;
            }
            out.push('>');
            for child in children {
                write_node(child, out);
            }
            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
    }
}

fn escape_text(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
}

fn escape_attr(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
}

// ----------- Tests -----------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::node::{el, mount, text, EventKind, HidAllocator};

    fn render(tree: &crate::tree::node::VNode) -> String {
        let mut alloc = HidAllocator::new();
        let mounted = mount(tree, &mut alloc);
        render_document(&mounted, "/home")
    }

    #[test]
    fn escapes_text_and_attrs() {
        let tree = el("div")
            .attr("title", "a \"b\" <c>")
            .child(text("1 < 2 && 3 > 2"))
            .build();
        let html = render(&tree);

        assert!(html.contains("title=\"a &quot;b&quot; &lt;c&gt;\""));
        assert!(html.contains("1 &lt; 2 &amp;&amp; 3 &gt; 2"));
    }

    #[test]
    fn data_hid_only_on_event_targets() {
        let tree = el("div")
            .child(el("button").on(EventKind::Click, "inc").child(text("+")).build())
            .child(el("span").child(text("plain")).build())
            .build();
        let html = render(&tree);

        assert_eq!(html.matches("data-hid=").count(), 1);
        assert!(html.contains("<button data-hid=\"2\">"));
    }

    #[test]
    fn embeds_route_and_closes_tags() {
        let tree = el("main").child(el("br").build()).build();
        let html = render(&tree);

        assert!(html.contains("data-trellis-route=\"/home\""));
        assert!(html.contains("<main><br></main>"));
        assert!(html.ends_with("</body>\n</html>\n"));
    }
}
