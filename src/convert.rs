//! Conversion entry points.
//!
//! Both formats share the front half of the pipeline:
//!
//! ```text
//! Markdown ─▶ validate ─▶ render HTML ─▶ scrub URL schemes ─▶ inline images
//!    ├─ PDF:  print template ─▶ size cap ─▶ render sandbox
//!    └─ DOCX: image placeholders ─▶ sanitize ─▶ serialize
//! ```
//!
//! The whole pipeline is raced against `request_timeout`. Dropping the
//! returned future cancels in-flight image fetches and tears the browser
//! session down.

use crate::browser::{provisioner_for, BrowserBinary};
use crate::config::ConverterConfig;
use crate::error::{ConvertError, Stage};
use crate::output::{ConversionResult, OutputFormat};
use crate::pipeline::fetch::{ImageTransport, ReqwestTransport};
use crate::pipeline::images::ImageProxy;
use crate::pipeline::pdf::{ChromiumEngine, EngineDiagnostics, PdfEngine};
use crate::pipeline::{docx, docx_sanitize, markdown, scrub, template};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Body of a conversion request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversionRequest {
    pub markdown: String,
    #[serde(default)]
    pub filename: Option<String>,
}

impl ConversionRequest {
    pub fn new(markdown: impl Into<String>) -> Self {
        Self {
            markdown: markdown.into(),
            filename: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Cheap checks that run before any rendering.
    pub fn validate(&self, config: &ConverterConfig) -> Result<(), ConvertError> {
        // Size first: a huge all-whitespace body is still too large.
        if self.markdown.len() > config.max_content_bytes {
            return Err(ConvertError::ContentTooLarge {
                what: "Markdown content",
                size: self.markdown.len(),
                limit: config.max_content_bytes,
            });
        }
        if self.markdown.trim().is_empty() {
            return Err(ConvertError::InvalidContent(
                "markdown must be a non-empty string".into(),
            ));
        }
        Ok(())
    }
}

/// Shared conversion service; one per process, cheap to clone.
#[derive(Clone)]
pub struct Converter {
    config: Arc<ConverterConfig>,
    images: Arc<ImageProxy>,
    engine: Arc<dyn PdfEngine>,
}

impl Converter {
    /// Production wiring: reqwest image transport and a Chromium engine.
    pub fn new(config: ConverterConfig) -> Result<Self, ConvertError> {
        let config = Arc::new(config);
        let transport: Arc<dyn ImageTransport> = Arc::new(ReqwestTransport::new(
            &config.user_agent,
            config.dns_guard,
            config.image_timeout(),
        )?);
        let binary = Arc::new(BrowserBinary::new(provisioner_for(&config)));
        let engine: Arc<dyn PdfEngine> = Arc::new(ChromiumEngine::new(binary, config.clone()));
        Ok(Self::with_parts(config, transport, engine))
    }

    /// Wire custom transport and engine implementations.
    pub fn with_parts(
        config: Arc<ConverterConfig>,
        transport: Arc<dyn ImageTransport>,
        engine: Arc<dyn PdfEngine>,
    ) -> Self {
        Self {
            images: Arc::new(ImageProxy::new(transport, config.clone())),
            config,
            engine,
        }
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    pub async fn convert_pdf(&self, request: &ConversionRequest) -> Result<ConversionResult, ConvertError> {
        self.convert(request, OutputFormat::Pdf).await
    }

    pub async fn convert_docx(&self, request: &ConversionRequest) -> Result<ConversionResult, ConvertError> {
        self.convert(request, OutputFormat::Docx).await
    }

    pub async fn diagnostics(&self) -> EngineDiagnostics {
        self.engine.diagnostics().await
    }

    pub async fn convert(
        &self,
        request: &ConversionRequest,
        format: OutputFormat,
    ) -> Result<ConversionResult, ConvertError> {
        request.validate(&self.config)?;

        let started = Instant::now();
        info!(format = %format, bytes = request.markdown.len(), "Starting conversion");

        let limit = self.config.request_timeout();
        let bytes = tokio::time::timeout(limit, self.run(request, format))
            .await
            .map_err(|_| ConvertError::Timeout {
                stage: Stage::Request,
                secs: limit.as_secs().max(1),
            })??;

        let result = ConversionResult::new(bytes, request.filename.as_deref(), format);
        info!(
            format = %format,
            filename = %result.filename,
            bytes = result.bytes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Conversion complete"
        );
        Ok(result)
    }

    async fn run(&self, request: &ConversionRequest, format: OutputFormat) -> Result<Vec<u8>, ConvertError> {
        let source = request.markdown.clone();
        let html = tokio::task::spawn_blocking(move || scrub::scrub_urls(&markdown::render_markdown(&source)))
            .await
            .map_err(|e| ConvertError::Internal(format!("render task: {e}")))??;

        let proxied = self.images.proxy_images(&html).await?;
        debug!(
            inlined = proxied.inlined(),
            inlined_bytes = proxied.inlined_bytes,
            rejected = proxied.rejections().count(),
            "Images processed"
        );

        match format {
            OutputFormat::Pdf => self.render_pdf(&proxied.html, request.filename.as_deref()).await,
            OutputFormat::Docx => {
                let config = self.config.clone();
                let html = proxied.html;
                // docx assembly and PNG re-encoding are CPU-bound
                tokio::task::spawn_blocking(move || build_docx(&html, &config))
                    .await
                    .map_err(|e| ConvertError::Internal(format!("DOCX task: {e}")))?
            }
        }
    }

    async fn render_pdf(&self, body: &str, filename: Option<&str>) -> Result<Vec<u8>, ConvertError> {
        let title = crate::output::derive_filename(filename, OutputFormat::Pdf);
        let document = template::wrap_for_print(body, title.trim_end_matches(".pdf"));
        if document.len() > self.config.max_print_html_bytes {
            return Err(ConvertError::ContentTooLarge {
                what: "Rendered HTML document",
                size: document.len(),
                limit: self.config.max_print_html_bytes,
            });
        }
        self.engine.render(&document).await
    }
}

fn build_docx(html: &str, config: &ConverterConfig) -> Result<Vec<u8>, ConvertError> {
    let html = docx_sanitize::replace_unavailable_images(html)?;
    let html = docx_sanitize::sanitize_for_docx(&html)?;
    docx::html_to_docx(&html, config)
}
