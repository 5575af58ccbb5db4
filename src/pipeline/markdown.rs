//! Markdown → HTML with GitHub Flavored Markdown extensions.
//!
//! comrak renders with raw HTML passthrough so inline `<img>` and `<br>` in
//! user Markdown survive, and ammonia then removes scripts, event handlers
//! and any tag or attribute outside its allow-list. `data:` is added to the
//! allowed URL schemes so embedded images survive; the scheme scrub that runs
//! next narrows that to `data:image/*`.

use comrak::Options;
use once_cell::sync::Lazy;

/// Built per call: comrak's options carry a non-`Sync` link callback slot.
fn comrak_options() -> Options<'static> {
    let mut options = Options::default();

    options.extension.strikethrough = true;
    options.extension.table = true;
    options.extension.autolink = true;
    options.extension.tasklist = true;
    options.extension.footnotes = true;
    options.extension.description_lists = true;

    options.render.unsafe_ = true;
    options
}

static SANITIZER: Lazy<ammonia::Builder<'static>> = Lazy::new(|| {
    let mut builder = ammonia::Builder::default();
    builder
        .add_url_schemes(["data"])
        .add_generic_attributes(["id"])
        .add_tag_attributes("td", ["align"])
        .add_tag_attributes("th", ["align"]);
    builder
});

/// Render untrusted Markdown to sanitized HTML.
pub fn render_markdown(markdown: &str) -> String {
    let raw = comrak::markdown_to_html(markdown, &comrak_options());
    SANITIZER.clean(&raw).to_string()
}
