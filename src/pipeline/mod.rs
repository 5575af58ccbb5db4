//! Pipeline stages for Markdown-to-document conversion.
//!
//! Each submodule implements one transformation step and is tested on its
//! own.
//!
//! ## Data Flow
//!
//! ```text
//! markdown ──▶ scrub ──▶ images ──┬─▶ template ──▶ pdf (intercept)
//! (comrak)    (schemes) (fetch,   │
//!                        sniff)   └─▶ docx_sanitize ──▶ docx
//! ```
//!
//! 1. [`markdown`] — render GFM to HTML and run it through `ammonia`
//! 2. [`scrub`]    — drop `href`/`src` values with dangerous schemes
//! 3. [`images`]   — fetch remote images through [`fetch`] and inline the
//!    ones that pass [`sniff`] and the size limits; the only stage with
//!    outbound network I/O
//! 4. [`template`] + [`pdf`] — wrap the body in the print document and
//!    render it in a throw-away Chromium whose requests [`intercept`] judges
//! 5. [`docx_sanitize`] + [`docx`] — placeholder text for missing images,
//!    structural cleanup, then OOXML serialization
//!
//! [`dom`] holds the html5ever tree helpers shared by the DOCX stages.

pub mod docx;
pub mod docx_sanitize;
pub mod dom;
pub mod fetch;
pub mod images;
pub mod intercept;
pub mod markdown;
pub mod pdf;
pub mod scrub;
pub mod sniff;
pub mod template;
