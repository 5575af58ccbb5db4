//! Error types for the mdexport library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ConvertError`] — **Fatal**: the request cannot produce a document
//!   (empty body, oversize input, browser launch failed, render timed out).
//!   Returned as `Err(ConvertError)` from the top-level `convert_*` functions
//!   and mapped to a wire code plus HTTP status by [`ConvertError::code`].
//!
//! * [`ImageRejection`] — **Non-fatal**: one remote image was refused or could
//!   not be fetched. The `<img>` tag is left untouched and the rest of the
//!   document converts normally. Rejections are collected in
//!   [`crate::pipeline::images::ProxyOutcome`] and logged with a stable
//!   `reason` field.

use crate::safety::UrlRejection;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable error codes exposed on the HTTP surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidContent,
    ContentTooLarge,
    GenerationTimeout,
    GenerationFailed,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidContent => "INVALID_CONTENT",
            ErrorCode::ContentTooLarge => "CONTENT_TOO_LARGE",
            ErrorCode::GenerationTimeout => "GENERATION_TIMEOUT",
            ErrorCode::GenerationFailed => "GENERATION_FAILED",
        }
    }

    /// HTTP status code for this error class.
    pub fn status(self) -> u16 {
        match self {
            ErrorCode::InvalidContent => 400,
            ErrorCode::ContentTooLarge => 413,
            ErrorCode::GenerationTimeout => 504,
            ErrorCode::GenerationFailed => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named step of a conversion, carried by timeout errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    BrowserLaunch,
    ContentLoad,
    PdfGeneration,
    Request,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::BrowserLaunch => "browser launch",
            Stage::ContentLoad => "content load",
            Stage::PdfGeneration => "PDF generation",
            Stage::Request => "request",
        })
    }
}

/// All fatal errors returned by the mdexport library.
///
/// Per-image failures use [`ImageRejection`] and never surface here.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Request body is malformed, or `markdown` is missing / not a string / blank.
    #[error("Invalid content: {0}")]
    InvalidContent(String),

    /// Input (or the intermediate print document) exceeds a hard size limit.
    #[error("{what} is {size} bytes, exceeding the {limit}-byte limit")]
    ContentTooLarge {
        what: &'static str,
        size: usize,
        limit: usize,
    },

    // ── Generation errors ─────────────────────────────────────────────────
    /// A time-boxed stage did not finish in time.
    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: Stage, secs: u64 },

    /// No usable browser executable could be located or downloaded.
    #[error("Headless browser unavailable: {0}")]
    BrowserUnavailable(String),

    /// The renderer or serializer failed for a reason other than a timeout.
    #[error("Document generation failed: {0}")]
    GenerationFailed(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    /// Wire code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            ConvertError::InvalidContent(_) => ErrorCode::InvalidContent,
            ConvertError::ContentTooLarge { .. } => ErrorCode::ContentTooLarge,
            ConvertError::Timeout { .. } => ErrorCode::GenerationTimeout,
            ConvertError::BrowserUnavailable(_)
            | ConvertError::GenerationFailed(_)
            | ConvertError::InvalidConfig(_)
            | ConvertError::Internal(_) => ErrorCode::GenerationFailed,
        }
    }

    pub fn status(&self) -> u16 {
        self.code().status()
    }

    /// Message safe to return to a client.
    ///
    /// Generation failures can carry browser stderr or local paths, so only
    /// input-class errors echo their detail.
    pub fn public_message(&self) -> String {
        match self {
            ConvertError::InvalidContent(_) | ConvertError::ContentTooLarge { .. } => {
                self.to_string()
            }
            ConvertError::Timeout { .. } => "Document generation timed out".to_string(),
            _ => "Document generation failed".to_string(),
        }
    }
}

/// A non-fatal refusal for a single remote image.
///
/// The image tag is left as it was; the document still converts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageRejection {
    /// The URL (initial or a redirect hop) failed the safety check.
    #[error("unsafe URL: {0}")]
    UnsafeUrl(UrlRejection),

    /// SVG is refused by path before any request.
    #[error("SVG images are not embedded")]
    Svg,

    /// A redirect response had no usable `Location`.
    #[error("redirect without a valid Location header")]
    BadRedirect,

    /// More redirect hops than allowed.
    #[error("more than {max} redirects")]
    TooManyRedirects { max: usize },

    /// Terminal response was not 2xx.
    #[error("upstream returned HTTP {0}")]
    HttpStatus(u16),

    /// Declared or received size exceeded the per-image cap.
    #[error("image is larger than {limit} bytes")]
    TooLarge { limit: usize },

    /// Magic bytes are not PNG, JPEG, GIF or WebP.
    #[error("unsupported or unrecognised image format")]
    UnsupportedFormat,

    /// Intrinsic dimensions exceed the per-axis or pixel-count limit.
    #[error("image dimensions {width}x{height} exceed limits")]
    DimensionsTooLarge { width: u32, height: u32 },

    /// Dimensions could not be read and the body is above the fallback size.
    #[error("image dimensions unreadable and body exceeds {limit} bytes")]
    UnknownDimensions { limit: usize },

    /// Reserving this image would overrun the per-document byte budget.
    #[error("document image budget exhausted")]
    BudgetExceeded,

    /// Fetch (all hops plus body) did not finish in time.
    #[error("image fetch timed out")]
    Timeout,

    /// Connection, TLS or body read failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ImageRejection {
    /// Stable reason code for structured logs.
    pub fn reason(&self) -> &'static str {
        match self {
            ImageRejection::UnsafeUrl(r) => r.as_str(),
            ImageRejection::Svg => "svg",
            ImageRejection::BadRedirect => "bad_redirect",
            ImageRejection::TooManyRedirects { .. } => "too_many_redirects",
            ImageRejection::HttpStatus(_) => "http_status",
            ImageRejection::TooLarge { .. } => "too_large",
            ImageRejection::UnsupportedFormat => "unsupported_format",
            ImageRejection::DimensionsTooLarge { .. } => "dimensions_too_large",
            ImageRejection::UnknownDimensions { .. } => "unknown_dimensions",
            ImageRejection::BudgetExceeded => "budget_exceeded",
            ImageRejection::Timeout => "timeout",
            ImageRejection::Transport(_) => "transport",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_statuses() {
        assert_eq!(ConvertError::InvalidContent("x".into()).status(), 400);
        assert_eq!(
            ConvertError::ContentTooLarge {
                what: "markdown",
                size: 2,
                limit: 1
            }
            .status(),
            413
        );
        assert_eq!(
            ConvertError::Timeout {
                stage: Stage::Request,
                secs: 45
            }
            .status(),
            504
        );
        assert_eq!(ConvertError::BrowserUnavailable("x".into()).status(), 500);
        assert_eq!(ConvertError::GenerationFailed("x".into()).status(), 500);
    }

    #[test]
    fn timeout_display_names_stage() {
        let e = ConvertError::Timeout {
            stage: Stage::ContentLoad,
            secs: 10,
        };
        assert_eq!(e.to_string(), "content load timed out after 10s");
    }

    #[test]
    fn public_message_hides_internal_detail() {
        let e = ConvertError::GenerationFailed("/tmp/profile-abc: crashed".into());
        assert!(!e.public_message().contains("/tmp"));
        let e = ConvertError::InvalidContent("markdown must not be empty".into());
        assert!(e.public_message().contains("must not be empty"));
    }

    #[test]
    fn error_code_serialises_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::GenerationTimeout).unwrap();
        assert_eq!(json, "\"GENERATION_TIMEOUT\"");
        assert_eq!(ErrorCode::ContentTooLarge.to_string(), "CONTENT_TOO_LARGE");
    }

    #[test]
    fn rejection_reason_delegates_to_url_check() {
        let r = ImageRejection::UnsafeUrl(UrlRejection::PrivateAddress);
        assert_eq!(r.reason(), "private_address");
        assert_eq!(ImageRejection::BudgetExceeded.reason(), "budget_exceeded");
    }
}
