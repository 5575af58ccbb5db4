//! # mdexport
//!
//! Convert Markdown to PDF or DOCX behind an HTTP API, without letting the
//! document reach anything it should not.
//!
//! Markdown is user input, and rendered Markdown can reference remote images.
//! A naive converter will happily fetch `https://169.254.169.254/` on the
//! caller's behalf, or hand a headless browser a page that loads arbitrary
//! URLs. mdexport closes both doors:
//!
//! * remote images are fetched by the server through a validator that
//!   rejects private and reserved address space on every redirect hop, then
//!   embedded as `data:` URIs after magic-byte and size checks;
//! * the PDF renderer runs in a fresh Chromium per request with scripting
//!   disabled, a request interceptor that only admits web fonts, and offline
//!   mode switched on before printing.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Markdown
//!  │
//!  ├─ 1. Validate  non-empty, ≤ 1 MiB
//!  ├─ 2. Render    comrak (GFM) → ammonia
//!  ├─ 3. Scrub     javascript:/vbscript:/file:/non-image data: URLs removed
//!  ├─ 4. Images    SSRF-checked fetch → sniff → inline as data: URIs
//!  ├─ 5a. PDF      print template → sandboxed Chromium → A4 PDF
//!  └─ 5b. DOCX     placeholders → sanitize → docx-rs
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mdexport::{ConversionRequest, Converter, ConverterConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let converter = Converter::new(ConverterConfig::from_env()?)?;
//!     let request = ConversionRequest::new("# Hello\n\nWorld").with_filename("hello.md");
//!     let doc = converter.convert_docx(&request).await?;
//!     std::fs::write(&doc.filename, &doc.bytes)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `mdexport-server` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod browser;
pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod safety;
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{BrowserMode, ConverterConfig, ConverterConfigBuilder};
pub use convert::{ConversionRequest, Converter};
pub use error::{ConvertError, ErrorCode, ImageRejection, Stage};
pub use output::{ConversionResult, OutputFormat};
pub use safety::{check_url, is_safe_url, UrlRejection};
pub use server::router;
