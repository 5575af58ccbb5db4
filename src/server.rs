//! HTTP surface.
//!
//! | Method | Path                 | Handler                         |
//! |--------|----------------------|---------------------------------|
//! | POST   | `/api/convert/pdf`   | Markdown → PDF                  |
//! | POST   | `/api/convert/docx`  | Markdown → DOCX                 |
//! | GET    | `/api/convert/pdf`   | renderer diagnostics            |
//! | GET    | `/health`            | liveness                        |
//!
//! Errors are JSON `{ "error": CODE, "message": text }` with the status the
//! code maps to. Bodies are parsed by hand so malformed JSON reports
//! `INVALID_CONTENT` instead of axum's default rejection.

use crate::convert::{ConversionRequest, Converter};
use crate::error::ConvertError;
use crate::output::{ConversionResult, OutputFormat};
use crate::pipeline::pdf::EngineDiagnostics;
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build the application router around a shared [`Converter`].
pub fn router(converter: Converter) -> Router {
    let body_limit = body_limit(converter.config().max_content_bytes);

    Router::new()
        .route("/api/convert/pdf", post(convert_pdf).get(diagnostics))
        .route("/api/convert/docx", post(convert_docx))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(converter)
}

/// Raw body cap. Leaves room above the Markdown limit for JSON escaping so
/// oversize content still reaches the `CONTENT_TOO_LARGE` check with a size.
fn body_limit(max_content_bytes: usize) -> usize {
    max_content_bytes.saturating_mul(4).saturating_add(64 * 1024)
}

async fn convert_pdf(
    State(converter): State<Converter>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let request = parse_request(body, converter.config().max_content_bytes)?;
    let result = converter.convert(&request, OutputFormat::Pdf).await?;
    document_response(result)
}

async fn convert_docx(
    State(converter): State<Converter>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let request = parse_request(body, converter.config().max_content_bytes)?;
    let result = converter.convert(&request, OutputFormat::Docx).await?;
    document_response(result)
}

#[derive(Serialize)]
struct Diagnostics {
    #[serde(flatten)]
    engine: EngineDiagnostics,
    version: &'static str,
}

async fn diagnostics(State(converter): State<Converter>) -> impl IntoResponse {
    let engine = converter.diagnostics().await;
    no_store(Json(Diagnostics {
        engine,
        version: VERSION,
    }))
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        version: VERSION,
    })
}

fn parse_request(
    body: Result<Bytes, BytesRejection>,
    max_content_bytes: usize,
) -> Result<ConversionRequest, ConvertError> {
    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            let limit = body_limit(max_content_bytes);
            // The body was cut off, so only a lower bound on its size is known.
            ConvertError::ContentTooLarge {
                what: "Request body",
                size: limit.saturating_add(1),
                limit,
            }
        } else {
            ConvertError::InvalidContent(rejection.body_text())
        }
    })?;

    serde_json::from_slice::<ConversionRequest>(&body)
        .map_err(|e| ConvertError::InvalidContent(format!("request body: {e}")))
}

fn document_response(result: ConversionResult) -> Result<Response, ApiError> {
    let disposition = HeaderValue::from_str(&result.content_disposition())
        .map_err(|e| ConvertError::Internal(format!("Content-Disposition: {e}")))?;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(result.content_type)),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
        ],
        result.bytes,
    )
        .into_response())
}

fn no_store(inner: impl IntoResponse) -> Response {
    (
        [(header::CACHE_CONTROL, HeaderValue::from_static("no-store"))],
        inner,
    )
        .into_response()
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

/// [`ConvertError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub ConvertError);

impl From<ConvertError> for ApiError {
    fn from(e: ConvertError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            error!(code = %err.code(), "Conversion failed: {err}");
        } else {
            info!(code = %err.code(), "Request rejected: {err}");
        }

        let body = ErrorBody {
            error: err.code().as_str(),
            message: err.public_message(),
        };
        (status, no_store(Json(body))).into_response()
    }
}
