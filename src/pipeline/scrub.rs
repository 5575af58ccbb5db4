//! Second-line URL scheme filter over rendered HTML.
//!
//! Runs after the Markdown sanitizer and before any fetching or rendering.
//! Removes `href` and `src` attributes whose scheme is `javascript:`,
//! `vbscript:`, `file:` or a `data:` that is not `data:image/*`.

use crate::error::ConvertError;
use crate::pipeline::sniff::is_image_data_uri;
use lol_html::{element, rewrite_str, RewriteStrSettings};
use tracing::warn;

const BLOCKED_SCHEMES: &[&str] = &["javascript:", "vbscript:", "file:"];

/// `true` if a URL attribute value must not reach the output.
pub fn is_dangerous_url(value: &str) -> bool {
    // Browsers ignore whitespace and control characters inside the scheme.
    let normalized: String = value
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && !c.is_control())
        .take(32)
        .collect::<String>()
        .to_ascii_lowercase();

    if BLOCKED_SCHEMES.iter().any(|s| normalized.starts_with(s)) {
        return true;
    }
    normalized.starts_with("data:") && !is_image_data_uri(&normalized)
}

/// Strip dangerous `href` / `src` attributes from every element.
pub fn scrub_urls(html: &str) -> Result<String, ConvertError> {
    let mut removed = 0usize;

    let out = {
        let removed = &mut removed;
        rewrite_str(
            html,
            RewriteStrSettings {
                element_content_handlers: vec![element!("*", move |el| {
                    for attr in ["href", "src"] {
                        if el.get_attribute(attr).is_some_and(|v| is_dangerous_url(&v)) {
                            el.remove_attribute(attr);
                            *removed += 1;
                        }
                    }
                    Ok(())
                })],
                ..RewriteStrSettings::default()
            },
        )
        .map_err(|e| ConvertError::Internal(format!("HTML rewrite failed: {e}")))?
    };

    if removed > 0 {
        warn!(removed, reason = "dangerous_scheme", "Removed URL attributes with blocked schemes");
    }
    Ok(out)
}
