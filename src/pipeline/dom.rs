//! Small helpers over an `html5ever` / `markup5ever_rcdom` tree.
//!
//! Fragments are parsed as full documents; the interesting content is the
//! children of `<body>`. Tag names come out of the parser lowercased, so all
//! matching here is effectively case-insensitive.
//!
//! Every walk keeps its own stack. Markdown can nest HTML arbitrarily deep,
//! and the call stack of a worker thread is not the place to pay for that.

use crate::error::ConvertError;
use html5ever::serialize::{serialize, SerializeOpts, TraversalScope};
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::parse_document;
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom, SerializableHandle};
use std::cell::RefCell;
use std::rc::Rc;

pub(crate) fn parse(html: &str) -> RcDom {
    parse_document(RcDom::default(), Default::default()).one(html)
}

/// First `<body>` element in document order.
pub(crate) fn body(dom: &RcDom) -> Option<Handle> {
    find_element(&dom.document, "body")
}

/// First element named `tag` at or below `node`, in document order.
pub(crate) fn find_element(node: &Handle, tag: &str) -> Option<Handle> {
    let mut stack = vec![node.clone()];
    while let Some(node) = stack.pop() {
        if tag_name(&node).as_deref() == Some(tag) {
            return Some(node);
        }
        stack.extend(node.children.borrow().iter().rev().cloned());
    }
    None
}

/// Pre-order list of `root` and all its descendants.
pub(crate) fn descendants(root: &Handle) -> Vec<Handle> {
    let mut out = Vec::new();
    let mut stack = vec![root.clone()];
    while let Some(node) = stack.pop() {
        stack.extend(node.children.borrow().iter().rev().cloned());
        out.push(node);
    }
    out
}

/// Cap element nesting under `root` at `max_depth` levels.
///
/// An element sitting at the cap keeps its own tag but its subtree is
/// replaced by the subtree's leaves (text and empty elements) in document
/// order. Returns how many elements were cut in the process.
pub(crate) fn flatten_deeper_than(root: &Handle, max_depth: usize) -> usize {
    let mut cut = 0;
    let mut stack = vec![(root.clone(), 0usize)];
    while let Some((node, depth)) = stack.pop() {
        if depth < max_depth {
            stack.extend(node.children.borrow().iter().map(|c| (c.clone(), depth + 1)));
            continue;
        }
        let nested = node.children.borrow().iter().any(|c| !c.children.borrow().is_empty());
        if !nested {
            continue;
        }

        let subtree = node.children.take();
        let mut leaves = Vec::new();
        let mut pending: Vec<Handle> = subtree.into_iter().rev().collect();
        while let Some(n) = pending.pop() {
            let children = n.children.take();
            if children.is_empty() {
                leaves.push(n);
            } else {
                cut += 1;
                n.parent.set(None);
                pending.extend(children.into_iter().rev());
            }
        }
        for leaf in &leaves {
            leaf.parent.set(Some(Rc::downgrade(&node)));
        }
        *node.children.borrow_mut() = leaves;
    }
    cut
}

/// Lowercase local name for element nodes.
pub(crate) fn tag_name(node: &Handle) -> Option<String> {
    match node.data {
        NodeData::Element { ref name, .. } => Some(name.local.as_ref().to_string()),
        _ => None,
    }
}

pub(crate) fn attr(node: &Handle, key: &str) -> Option<String> {
    match node.data {
        NodeData::Element { ref attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|a| a.name.local.as_ref() == key)
            .map(|a| a.value.to_string()),
        _ => None,
    }
}

pub(crate) fn new_text(text: &str) -> Handle {
    Node::new(NodeData::Text {
        contents: RefCell::new(StrTendril::from(text)),
    })
}

/// Swap `old` for `new` in its parent's child list.
pub(crate) fn replace(parent: &Handle, old: &Handle, new: Handle) {
    new.parent.set(Some(Rc::downgrade(parent)));
    let mut children = parent.children.borrow_mut();
    if let Some(slot) = children.iter_mut().find(|c| Rc::ptr_eq(c, old)) {
        *slot = new;
    }
    old.parent.set(None);
}

/// Serialize the children of `node` (its inner HTML).
pub(crate) fn inner_html(node: &Handle) -> Result<String, ConvertError> {
    let mut out = Vec::new();
    let opts = SerializeOpts {
        traversal_scope: TraversalScope::ChildrenOnly(None),
        ..Default::default()
    };
    serialize(&mut out, &SerializableHandle::from(node.clone()), opts)
        .map_err(|e| ConvertError::Internal(format!("HTML serialization failed: {e}")))?;
    String::from_utf8(out).map_err(|e| ConvertError::Internal(e.to_string()))
}

/// Parse `html`, run `transform` over `<body>`, serialize the body back.
pub(crate) fn transform_body<F>(html: &str, transform: F) -> Result<String, ConvertError>
where
    F: FnOnce(&Handle),
{
    let dom = parse(html);
    let body = body(&dom).ok_or_else(|| ConvertError::Internal("parsed document has no <body>".into()))?;
    transform(&body);
    inner_html(&body)
}

/// Concatenated text of a subtree.
pub(crate) fn text_content(node: &Handle) -> String {
    let mut out = String::new();
    collect_text(node, &mut out);
    out
}

fn collect_text(node: &Handle, out: &mut String) {
    let mut stack = vec![node.clone()];
    while let Some(node) = stack.pop() {
        match node.data {
            NodeData::Text { ref contents } => out.push_str(&contents.borrow()),
            _ => stack.extend(node.children.borrow().iter().rev().cloned()),
        }
    }
}
