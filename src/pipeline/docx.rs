//! Sanitized HTML → DOCX.
//!
//! Walks the `<body>` of the HTML tree and emits `docx-rs` paragraphs, runs
//! and tables. Block elements (headings, paragraphs, list items, quotes,
//! preformatted blocks, tables) become paragraphs; inline formatting becomes
//! run properties. Only `data:image/*` images are embedded, and they are
//! re-encoded as PNG after the same dimension checks the image proxy applies,
//! since a user can put a data URI straight into their Markdown.

use crate::config::ConverterConfig;
use crate::error::ConvertError;
use crate::pipeline::docx_sanitize::IMAGE_PLACEHOLDER;
use crate::pipeline::dom;
use crate::pipeline::sniff;
use docx_rs::{
    BreakType, Docx, Paragraph, Pic, Run, RunFonts, Style, StyleType, Table, TableCell, TableRow,
};
use markup5ever_rcdom::{Handle, NodeData};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Cursor;
use tracing::debug;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

const MONO_FONT: &str = "Courier New";
const LINK_COLOR: &str = "0563C1";
/// Twips per list / quote nesting level.
const INDENT_STEP: i32 = 720;
/// Usable width of a Letter/A4 page with default margins.
const MAX_IMAGE_WIDTH_PX: u32 = 576;
const EMU_PER_PX: u32 = 9525;
const TABLE_WIDTH_TWIPS: usize = 9000;
/// Element depth below `<body>` the writer descends to; anything deeper is
/// flattened to its text and empty elements first.
const MAX_NESTING: usize = 32;

/// Inline formatting inherited down the tree.
#[derive(Debug, Clone, Copy, Default)]
struct RunStyle {
    bold: bool,
    italic: bool,
    underline: bool,
    strike: bool,
    code: bool,
    link: bool,
}

enum Block {
    Para(Paragraph),
    Table(Table),
}

struct DocxWriter<'a> {
    config: &'a ConverterConfig,
    blocks: Vec<Block>,
    pending: Vec<Run>,
    pending_has_content: bool,
    images: usize,
}

/// Render sanitized HTML into a DOCX package.
pub fn html_to_docx(html: &str, config: &ConverterConfig) -> Result<Vec<u8>, ConvertError> {
    let parsed = dom::parse(html);
    let body = dom::body(&parsed)
        .ok_or_else(|| ConvertError::GenerationFailed("document has no body".into()))?;

    let flattened = dom::flatten_deeper_than(&body, MAX_NESTING);
    if flattened > 0 {
        debug!(flattened, max_depth = MAX_NESTING, "Flattened deeply nested HTML");
    }

    let mut writer = DocxWriter {
        config,
        blocks: Vec::new(),
        pending: Vec::new(),
        pending_has_content: false,
        images: 0,
    };
    writer.container(&body, 0);
    writer.flush(0);

    debug!(blocks = writer.blocks.len(), images = writer.images, "DOCX body assembled");

    let mut docx = heading_styles(Docx::new());
    for block in writer.blocks {
        docx = match block {
            Block::Para(p) => docx.add_paragraph(p),
            Block::Table(t) => docx.add_table(t),
        };
    }

    let mut buf = Cursor::new(Vec::new());
    docx.build()
        .pack(&mut buf)
        .map_err(|e| ConvertError::GenerationFailed(format!("DOCX packaging failed: {e}")))?;
    Ok(buf.into_inner())
}

fn heading_styles(mut docx: Docx) -> Docx {
    for (level, size) in [(1, 40), (2, 32), (3, 28), (4, 24), (5, 22), (6, 22)] {
        docx = docx.add_style(
            Style::new(format!("Heading{level}"), StyleType::Paragraph)
                .name(format!("Heading {level}"))
                .size(size)
                .bold(),
        );
    }
    docx.add_style(Style::new("Quote", StyleType::Paragraph).name("Quote").italic())
}

impl DocxWriter<'_> {
    /// Children of a block container.
    fn container(&mut self, node: &Handle, indent: i32) {
        for child in node.children.borrow().iter() {
            self.block(child, indent);
        }
    }

    fn block(&mut self, node: &Handle, indent: i32) {
        let Some(tag) = dom::tag_name(node) else {
            self.inline(node, RunStyle::default());
            return;
        };

        match tag.as_str() {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                self.flush(indent);
                let runs = self.inline_runs(node, RunStyle::default());
                let style = format!("Heading{}", &tag[1..]);
                self.push_para(runs, indent, Some(&style));
            }
            "p" => {
                self.flush(indent);
                let runs = self.inline_runs(node, RunStyle::default());
                self.push_para(runs, indent, None);
            }
            "ul" | "ol" => {
                self.flush(indent);
                self.list(node, tag == "ol", indent);
            }
            "blockquote" => {
                self.flush(indent);
                self.container(node, indent + INDENT_STEP);
                self.flush(indent + INDENT_STEP);
            }
            "pre" => {
                self.flush(indent);
                self.preformatted(node, indent);
            }
            "table" => {
                self.flush(indent);
                if let Some(table) = self.table(node) {
                    self.blocks.push(Block::Table(table));
                }
            }
            "hr" => {
                self.flush(indent);
                self.blocks.push(Block::Para(Paragraph::new()));
            }
            "div" | "section" | "article" | "header" | "footer" | "main" | "nav" | "aside"
            | "figure" | "details" | "dl" | "dd" | "dt" | "li" | "thead" | "tbody" => {
                self.flush(indent);
                self.container(node, indent);
                self.flush(indent);
            }
            _ => self.inline(node, RunStyle::default()),
        }
    }

    fn list(&mut self, node: &Handle, ordered: bool, indent: i32) {
        let depth = indent + INDENT_STEP;
        let mut n = 0usize;

        for item in node.children.borrow().iter() {
            if dom::tag_name(item).as_deref() != Some("li") {
                continue;
            }
            n += 1;
            let marker = if ordered { format!("{n}. ") } else { "• ".to_string() };
            self.pending.push(Run::new().add_text(marker));

            for child in item.children.borrow().iter() {
                match dom::tag_name(child).as_deref() {
                    Some("ul") | Some("ol") => {
                        self.flush(depth);
                        self.block(child, depth);
                    }
                    // Loose lists wrap item text in <p>; keep it on the marker line.
                    Some("p") => {
                        if self.pending_has_content {
                            self.flush(depth);
                        }
                        self.inline_children(child, RunStyle::default());
                    }
                    _ => self.block(child, depth),
                }
            }
            self.pending_has_content = true;
            self.flush(depth);
        }
    }

    fn preformatted(&mut self, node: &Handle, indent: i32) {
        let text = dom::text_content(node);
        let text = text.strip_suffix('\n').unwrap_or(&text);
        for line in text.split('\n') {
            let run = Run::new().add_text(line).fonts(mono());
            self.blocks
                .push(Block::Para(Paragraph::new().add_run(run).indent(Some(indent), None, None, None)));
        }
    }

    fn table(&mut self, node: &Handle) -> Option<Table> {
        let mut rows: Vec<Vec<(Vec<Run>, bool)>> = Vec::new();
        collect_rows(node, &mut |tr| {
            let cells = tr
                .children
                .borrow()
                .iter()
                .filter_map(|cell| {
                    let tag = dom::tag_name(cell)?;
                    let header = tag == "th";
                    (header || tag == "td").then(|| {
                        let style = RunStyle {
                            bold: header,
                            ..RunStyle::default()
                        };
                        (self.inline_runs(cell, style), header)
                    })
                })
                .collect::<Vec<_>>();
            if !cells.is_empty() {
                rows.push(cells);
            }
        });

        let columns = rows.iter().map(Vec::len).max()?;
        let table_rows = rows
            .into_iter()
            .map(|cells| {
                let mut row: Vec<TableCell> = cells
                    .into_iter()
                    .map(|(runs, _)| {
                        let para = runs.into_iter().fold(Paragraph::new(), Paragraph::add_run);
                        TableCell::new().add_paragraph(para)
                    })
                    .collect();
                while row.len() < columns {
                    row.push(TableCell::new().add_paragraph(Paragraph::new()));
                }
                TableRow::new(row)
            })
            .collect();

        Some(Table::new(table_rows).set_grid(vec![TABLE_WIDTH_TWIPS / columns; columns]))
    }

    // ── Inline content ────────────────────────────────────────────────────

    fn inline_runs(&mut self, node: &Handle, style: RunStyle) -> Vec<Run> {
        let saved = std::mem::take(&mut self.pending);
        let saved_flag = std::mem::replace(&mut self.pending_has_content, false);
        self.inline_children(node, style);
        let runs = std::mem::replace(&mut self.pending, saved);
        let has_content = std::mem::replace(&mut self.pending_has_content, saved_flag);
        if has_content {
            runs
        } else {
            Vec::new()
        }
    }

    fn inline_children(&mut self, node: &Handle, style: RunStyle) {
        for child in node.children.borrow().iter() {
            self.inline(child, style);
        }
    }

    fn inline(&mut self, node: &Handle, style: RunStyle) {
        match node.data {
            NodeData::Text { ref contents } => {
                let raw = contents.borrow();
                let text = WHITESPACE.replace_all(&raw, " ");
                if text.trim().is_empty() {
                    // Inter-word space only matters once a line has started.
                    if self.pending_has_content && !text.is_empty() {
                        self.pending.push(styled(Run::new().add_text(" "), style));
                    }
                    return;
                }
                let text = if self.pending_has_content {
                    text.into_owned()
                } else {
                    text.trim_start().to_string()
                };
                self.pending.push(styled(Run::new().add_text(text), style));
                self.pending_has_content = true;
            }
            NodeData::Element { ref name, .. } => {
                let mut style = style;
                match name.local.as_ref() {
                    "strong" | "b" => style.bold = true,
                    "em" | "i" | "cite" => style.italic = true,
                    "u" | "ins" => style.underline = true,
                    "s" | "del" | "strike" => style.strike = true,
                    "code" | "kbd" | "samp" | "tt" => style.code = true,
                    "a" => style.link = true,
                    "br" => {
                        self.pending.push(Run::new().add_break(BreakType::TextWrapping));
                        return;
                    }
                    "img" => {
                        let run = self.image(node);
                        self.pending.push(run);
                        self.pending_has_content = true;
                        return;
                    }
                    "script" | "style" | "template" => return,
                    _ => {}
                }
                self.inline_children(node, style);
            }
            _ => {}
        }
    }

    fn image(&mut self, node: &Handle) -> Run {
        match dom::attr(node, "src").and_then(|src| self.decode_image(&src)) {
            Some(pic) => {
                self.images += 1;
                Run::new().add_image(pic)
            }
            None => Run::new().add_text(IMAGE_PLACEHOLDER),
        }
    }

    fn decode_image(&self, src: &str) -> Option<Pic> {
        if !sniff::is_image_data_uri(src) {
            return None;
        }
        let (_, bytes) = sniff::decode_data_uri(src)?;
        let kind = sniff::sniff(&bytes)?;
        let (w, h) = sniff::dimensions(&bytes, kind)?;

        let c = self.config;
        if w == 0
            || h == 0
            || w > c.max_image_dimension
            || h > c.max_image_dimension
            || u64::from(w) * u64::from(h) > c.max_image_pixels
        {
            debug!(width = w, height = h, "Embedded image outside limits; using placeholder");
            return None;
        }

        let png = match sniff::reencode_png(&bytes) {
            Ok(png) => png,
            Err(e) => {
                debug!("Embedded image failed to decode: {e}");
                return None;
            }
        };

        let (dw, dh) = fit_width(w, h, MAX_IMAGE_WIDTH_PX);
        Some(Pic::new_with_dimensions(png, w, h).size(dw * EMU_PER_PX, dh * EMU_PER_PX))
    }

    // ── Paragraph assembly ────────────────────────────────────────────────

    fn flush(&mut self, indent: i32) {
        let runs = std::mem::take(&mut self.pending);
        let has_content = std::mem::replace(&mut self.pending_has_content, false);
        if has_content {
            self.push_para(runs, indent, None);
        }
    }

    fn push_para(&mut self, runs: Vec<Run>, indent: i32, style: Option<&str>) {
        if runs.is_empty() {
            return;
        }
        let mut para = runs.into_iter().fold(Paragraph::new(), Paragraph::add_run);
        if indent > 0 {
            para = para.indent(Some(indent), None, None, None);
        }
        if let Some(style) = style {
            para = para.style(style);
        }
        self.blocks.push(Block::Para(para));
    }
}

fn styled(mut run: Run, style: RunStyle) -> Run {
    if style.bold {
        run = run.bold();
    }
    if style.italic {
        run = run.italic();
    }
    if style.underline || style.link {
        run = run.underline("single");
    }
    if style.link {
        run = run.color(LINK_COLOR);
    }
    if style.strike {
        run = run.strike();
    }
    if style.code {
        run = run.fonts(mono());
    }
    run
}

fn mono() -> RunFonts {
    RunFonts::new().ascii(MONO_FONT).hi_ansi(MONO_FONT).cs(MONO_FONT)
}

/// Table rows in document order, not descending into nested tables.
fn collect_rows(node: &Handle, visit: &mut dyn FnMut(&Handle)) {
    for child in node.children.borrow().iter() {
        match dom::tag_name(child).as_deref() {
            Some("tr") => visit(child),
            Some("table") => {}
            Some(_) => collect_rows(child, visit),
            None => {}
        }
    }
}

/// Scale `(w, h)` down to at most `max_w` wide, keeping aspect ratio.
fn fit_width(w: u32, h: u32, max_w: u32) -> (u32, u32) {
    if w <= max_w {
        return (w, h);
    }
    let scaled_h = (u64::from(h) * u64::from(max_w) / u64::from(w)).max(1) as u32;
    (max_w, scaled_h)
}
