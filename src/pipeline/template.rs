//! Print document wrapper for the PDF renderer.
//!
//! The rendered Markdown body is placed inside a complete HTML document with
//! a restrictive CSP and an A4 print stylesheet. Web fonts are the only
//! external resource the page asks for, and only from the hosts the request
//! interceptor lets through.

const FONT_STYLESHEET: &str =
    "https://fonts.googleapis.com/css2?family=Inter:wght@400;600;700&family=JetBrains+Mono&display=swap";

const PRINT_CSS: &str = r#"
@page { size: A4; margin: 18mm 16mm; }
html { -webkit-print-color-adjust: exact; print-color-adjust: exact; }
body { font-family: "Inter", -apple-system, "Segoe UI", Helvetica, Arial, sans-serif; font-size: 11pt; line-height: 1.55; color: #1f2328; margin: 0; }
h1, h2, h3, h4, h5, h6 { font-weight: 600; line-height: 1.25; margin: 1.4em 0 0.6em; page-break-after: avoid; }
h1 { font-size: 2em; border-bottom: 1px solid #d0d7de; padding-bottom: 0.3em; }
h2 { font-size: 1.5em; border-bottom: 1px solid #d0d7de; padding-bottom: 0.3em; }
h3 { font-size: 1.25em; }
p, ul, ol, blockquote, pre, table { margin: 0 0 1em; }
a { color: #0969da; text-decoration: none; }
img { max-width: 100%; height: auto; page-break-inside: avoid; }
code, pre { font-family: "JetBrains Mono", ui-monospace, Menlo, Consolas, monospace; font-size: 0.9em; }
code { background: #f6f8fa; padding: 0.15em 0.35em; border-radius: 4px; }
pre { background: #f6f8fa; padding: 12px 14px; border-radius: 6px; overflow: hidden; white-space: pre-wrap; word-wrap: break-word; page-break-inside: avoid; }
pre code { background: none; padding: 0; }
blockquote { color: #59636e; border-left: 4px solid #d0d7de; padding: 0 1em; margin-left: 0; }
table { border-collapse: collapse; width: 100%; page-break-inside: avoid; }
th, td { border: 1px solid #d0d7de; padding: 6px 12px; text-align: left; }
th { background: #f6f8fa; font-weight: 600; }
hr { border: 0; border-top: 1px solid #d0d7de; margin: 1.5em 0; }
"#;

/// Wrap a sanitized HTML body in the print document.
pub fn wrap_for_print(body_html: &str, title: &str) -> String {
    let csp = "default-src 'none'; img-src data:; style-src 'unsafe-inline' https://fonts.googleapis.com; \
               font-src https://fonts.gstatic.com; script-src 'none'";

    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta http-equiv=\"Content-Security-Policy\" content=\"{csp}\">\n\
         <title>{title}</title>\n\
         <link rel=\"stylesheet\" href=\"{FONT_STYLESHEET}\">\n\
         <style>{PRINT_CSS}</style>\n</head>\n<body>\n<main class=\"markdown-body\">\n{body_html}\n</main>\n</body>\n</html>\n",
        title = escape_text(title),
    )
}

fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
