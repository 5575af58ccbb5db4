//! HTML clean-up ahead of the DOCX writer.
//!
//! The DOCX serializer has no way to express a remote image, an HTML comment
//! or an empty block, and produces broken or bloated documents when handed
//! them. Two passes run on the image-proxied HTML:
//!
//! 1. [`replace_unavailable_images`]: any `<img>` that was not inlined becomes
//!    the text `[Image not available]`.
//! 2. [`sanitize_for_docx`]: comments go, empty `<p>` / `<span>` / `<div>`
//!    go (nested empties collapse), and runs of blank lines shrink to one.

use crate::error::ConvertError;
use crate::pipeline::dom;
use crate::pipeline::sniff::is_image_data_uri;
use markup5ever_rcdom::{Handle, NodeData};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

pub const IMAGE_PLACEHOLDER: &str = "[Image not available]";

static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n(?:[ \t]*\n){2,}").unwrap());

const PRUNABLE: &[&str] = &["p", "span", "div"];

/// Replace every `<img>` without a `data:image/*` source with placeholder text.
pub fn replace_unavailable_images(html: &str) -> Result<String, ConvertError> {
    let mut replaced = 0usize;
    let out = dom::transform_body(html, |body| replace_images_in(body, &mut replaced))?;
    if replaced > 0 {
        debug!(replaced, "Replaced unavailable images with placeholder text");
    }
    Ok(out)
}

fn replace_images_in(root: &Handle, replaced: &mut usize) {
    for node in dom::descendants(root) {
        let children: Vec<Handle> = node.children.borrow().clone();
        for child in children {
            if dom::tag_name(&child).as_deref() != Some("img") {
                continue;
            }
            let usable = dom::attr(&child, "src").is_some_and(|src| is_image_data_uri(&src));
            if !usable {
                dom::replace(&node, &child, dom::new_text(IMAGE_PLACEHOLDER));
                *replaced += 1;
            }
        }
    }
}

/// Strip comments and empty containers, then collapse blank-line runs.
pub fn sanitize_for_docx(html: &str) -> Result<String, ConvertError> {
    let out = dom::transform_body(html, prune)?;
    Ok(BLANK_LINES.replace_all(&out, "\n\n").into_owned())
}

/// Reverse pre-order, so children are pruned before their parent is judged empty.
fn prune(root: &Handle) {
    for node in dom::descendants(root).iter().rev() {
        node.children.borrow_mut().retain(|child| {
            let drop = match child.data {
                NodeData::Comment { .. } => true,
                NodeData::Element { .. } => is_empty_container(child),
                _ => false,
            };
            if drop {
                child.parent.set(None);
            }
            !drop
        });
    }
}

fn is_empty_container(node: &Handle) -> bool {
    let Some(tag) = dom::tag_name(node) else {
        return false;
    };
    if !PRUNABLE.contains(&tag.as_str()) {
        return false;
    }
    node.children.borrow().iter().all(|child| match child.data {
        NodeData::Text { ref contents } => contents.borrow().trim().is_empty(),
        NodeData::Comment { .. } => true,
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_and_missing_images_become_placeholder() {
        let html = r#"<p>a <img src="https://x.example/a.png"> b <img alt="none"> c <img src="data:image/png;base64,AAAA"></p>"#;
        let out = replace_unavailable_images(html).unwrap();
        assert_eq!(out.matches(IMAGE_PLACEHOLDER).count(), 2);
        assert!(!out.contains("x.example"));
        assert!(out.contains(r#"<img src="data:image/png;base64,AAAA">"#));
    }

    #[test]
    fn uppercase_tags_are_handled() {
        let out = replace_unavailable_images(r#"<IMG SRC="https://x.example/a.png">"#).unwrap();
        assert_eq!(out, IMAGE_PLACEHOLDER);
    }

    #[test]
    fn non_image_data_uri_is_not_usable() {
        let out = replace_unavailable_images(r#"<img src="data:text/html,hi">"#).unwrap();
        assert_eq!(out, IMAGE_PLACEHOLDER);
    }

    #[test]
    fn strips_comments() {
        let out = sanitize_for_docx("<p>keep<!-- secret --></p><!-- gone -->").unwrap();
        assert_eq!(out, "<p>keep</p>");
    }

    #[test]
    fn removes_nested_empty_containers() {
        let out = sanitize_for_docx("<div><p> </p><span>\n</span><div><p></p></div></div><p>text</p>").unwrap();
        assert_eq!(out, "<p>text</p>");
    }

    #[test]
    fn keeps_containers_with_elements() {
        let out = sanitize_for_docx("<p><br></p><div><img src=\"data:image/png;base64,AA\"></div>").unwrap();
        assert!(out.contains("<p><br></p>"));
        assert!(out.contains("<div><img"));
    }

    #[test]
    fn deep_nesting_on_small_stack() {
        dom::tests::on_small_stack(|| {
            let html = "<span>".repeat(100_000) + "x<img src=\"https://x.example/a.png\">";
            let out = replace_unavailable_images(&html).unwrap();
            assert!(out.contains(IMAGE_PLACEHOLDER));
            let out = sanitize_for_docx(&out).unwrap();
            assert!(out.contains("x[Image not available]"));

            let empty = "<div>".repeat(20_000) + "x";
            assert!(replace_unavailable_images(&empty).unwrap().ends_with("x</div>"));
            assert_eq!(sanitize_for_docx(&"<span>".repeat(100_000)).unwrap(), "");
        });
    }

    #[test]
    fn collapses_blank_line_runs() {
        let out = sanitize_for_docx("<pre>a\n\n\n\nb</pre><p>c</p>\n \n\n<p>d</p>").unwrap();
        assert!(!out.contains("\n\n\n"));
        assert!(out.contains("a\n\nb"));
    }
}
