//! Output types: target format, finished document, download filename.

use std::fmt;

/// Document format a conversion produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Pdf,
    Docx,
}

impl OutputFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Pdf => "application/pdf",
            OutputFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
        }
    }

    /// Extension without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Pdf => "pdf",
            OutputFormat::Docx => "docx",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A finished document, produced once and written straight to the response.
#[derive(Debug, Clone)]
pub struct ConversionResult {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub content_type: &'static str,
}

impl ConversionResult {
    pub fn new(bytes: Vec<u8>, requested: Option<&str>, format: OutputFormat) -> Self {
        Self {
            bytes,
            filename: derive_filename(requested, format),
            content_type: format.content_type(),
        }
    }

    /// `Content-Disposition` header value for this document.
    pub fn content_disposition(&self) -> String {
        content_disposition(&self.filename)
    }
}

const SOURCE_EXTENSIONS: &[&str] = &[".markdown", ".mdown", ".mkd", ".md", ".txt"];

/// Download name for a requested source filename.
///
/// Directory components are dropped; a Markdown or text extension is swapped
/// for the target one, anything else gets the target extension appended.
pub fn derive_filename(requested: Option<&str>, format: OutputFormat) -> String {
    let base = requested
        .map(|name| name.rsplit(['/', '\\']).next().unwrap_or(name).trim())
        .unwrap_or_default();

    if base.is_empty() || base == "." || base == ".." {
        return format!("document.{}", format.extension());
    }

    let stem = SOURCE_EXTENSIONS
        .iter()
        .find_map(|ext| strip_suffix_ignore_case(base, ext))
        .filter(|stem| !stem.is_empty())
        .unwrap_or(base);

    format!("{stem}.{}", format.extension())
}

fn strip_suffix_ignore_case<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    let split = s.len().checked_sub(suffix.len())?;
    let tail = s.get(split..)?;
    tail.eq_ignore_ascii_case(suffix).then(|| &s[..split])
}

/// `attachment; filename="<ascii>"; filename*=UTF-8''<percent-encoded>`.
pub fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();

    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_markdown_extensions() {
        assert_eq!(derive_filename(Some("notes.md"), OutputFormat::Pdf), "notes.pdf");
        assert_eq!(derive_filename(Some("Notes.MARKDOWN"), OutputFormat::Docx), "Notes.docx");
        assert_eq!(derive_filename(Some("a.mkd"), OutputFormat::Pdf), "a.pdf");
        assert_eq!(derive_filename(Some("readme.txt"), OutputFormat::Docx), "readme.docx");
    }

    #[test]
    fn appends_when_extension_unknown() {
        assert_eq!(derive_filename(Some("report"), OutputFormat::Pdf), "report.pdf");
        assert_eq!(derive_filename(Some("v1.2"), OutputFormat::Docx), "v1.2.docx");
        assert_eq!(derive_filename(Some(".md"), OutputFormat::Pdf), ".md.pdf");
    }

    #[test]
    fn strips_directories() {
        assert_eq!(derive_filename(Some("../../etc/passwd"), OutputFormat::Pdf), "passwd.pdf");
        assert_eq!(derive_filename(Some(r"C:\docs\plan.md"), OutputFormat::Docx), "plan.docx");
    }

    #[test]
    fn blank_falls_back_to_document() {
        assert_eq!(derive_filename(None, OutputFormat::Pdf), "document.pdf");
        assert_eq!(derive_filename(Some("   "), OutputFormat::Docx), "document.docx");
        assert_eq!(derive_filename(Some("dir/"), OutputFormat::Pdf), "document.pdf");
    }

    #[test]
    fn disposition_has_ascii_fallback_and_utf8_form() {
        let v = content_disposition("résumé \"final\".pdf");
        assert!(v.starts_with("attachment; filename=\"r_sum_ _final_.pdf\""));
        assert!(v.contains("filename*=UTF-8''r%C3%A9sum%C3%A9%20%22final%22.pdf"));
    }

    #[test]
    fn result_carries_content_type() {
        let r = ConversionResult::new(vec![1], Some("x.md"), OutputFormat::Docx);
        assert_eq!(r.filename, "x.docx");
        assert!(r.content_type.ends_with("wordprocessingml.document"));
    }
}
