//! PDF render sandbox: print a self-contained HTML document with Chromium.
//!
//! Each render gets its own browser process and a throw-away profile
//! directory. The session follows a fixed order:
//!
//! ```text
//! launch ─▶ new page ─▶ scripts off ─▶ interceptor on ─▶ load content (network idle)
//!   ─▶ scripts on + document.fonts.ready (best effort) ─▶ scripts off ─▶ offline
//!   ─▶ print A4 ─▶ close page ─▶ close browser
//! ```
//!
//! Teardown is unconditional: the normal path closes page and browser
//! explicitly, and [`RenderSession`]'s `Drop` aborts the CDP tasks, kills the
//! browser and deletes the profile when the request future is cancelled.
//! Cleanup failures are logged and swallowed.

use crate::browser::BrowserBinary;
use crate::config::ConverterConfig;
use crate::error::{ConvertError, Stage};
use crate::pipeline::intercept::{Decision, InterceptPolicy, ResourceKind};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::emulation::SetScriptExecutionDisabledParams;
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EventRequestPaused, FailRequestParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    EmulateNetworkConditionsParams, ErrorReason, EventLoadingFailed, EventLoadingFinished,
    EventRequestWillBeSent, ResourceType,
};
use chromiumoxide::cdp::browser_protocol::page::{PrintToPdfParams, SetDocumentContentParams};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::{stream, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long the network must stay quiet to count as idle.
const NETWORK_QUIET: Duration = Duration::from_millis(500);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// A4 in inches; margins come from the template's @page rule.
const A4_WIDTH_IN: f64 = 8.27;
const A4_HEIGHT_IN: f64 = 11.69;

/// Renders a complete HTML document to PDF bytes.
#[async_trait]
pub trait PdfEngine: Send + Sync {
    async fn render(&self, html: &str) -> Result<Vec<u8>, ConvertError>;

    /// Environment report for the diagnostics endpoint.
    async fn diagnostics(&self) -> EngineDiagnostics;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineDiagnostics {
    /// `local` or `serverless`.
    pub environment: String,
    pub cached_binary_path: Option<String>,
    pub probe: Probe,
}

/// Outcome of resolving the browser executable.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Probe {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// Production engine driving Chromium over CDP.
pub struct ChromiumEngine {
    binary: Arc<BrowserBinary>,
    config: Arc<ConverterConfig>,
    policy: InterceptPolicy,
}

impl ChromiumEngine {
    pub fn new(binary: Arc<BrowserBinary>, config: Arc<ConverterConfig>) -> Self {
        let policy = InterceptPolicy::new(config.font_hosts.iter().cloned());
        Self {
            binary,
            config,
            policy,
        }
    }

    async fn launch(&self) -> Result<RenderSession, ConvertError> {
        let executable = self.binary.path().await?;
        let profile = tempfile::Builder::new()
            .prefix("mdexport-profile-")
            .tempdir()
            .map_err(|e| ConvertError::Internal(format!("profile directory: {e}")))?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(&executable)
            .user_data_dir(profile.path())
            .args(self.binary.launch_args())
            .launch_timeout(self.config.launch_timeout())
            .request_timeout(self.config.pdf_timeout())
            .enable_request_intercept();
        if !self.binary.sandbox() {
            builder = builder.no_sandbox();
        }
        let browser_config = builder.build().map_err(ConvertError::GenerationFailed)?;

        debug!(executable = %executable.display(), profile = %profile.path().display(), "Launching browser");
        let (browser, mut handler) = time_box(
            Stage::BrowserLaunch,
            self.config.launch_timeout(),
            Browser::launch(browser_config),
        )
        .await?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler: {e}");
                }
            }
        });

        Ok(RenderSession {
            browser: Some(browser),
            handler: Some(handler),
            interceptor: None,
            profile: Some(profile),
        })
    }
}

#[async_trait]
impl PdfEngine for ChromiumEngine {
    async fn render(&self, html: &str) -> Result<Vec<u8>, ConvertError> {
        let started = Instant::now();
        let mut session = self.launch().await?;

        let result = session.print(html, &self.config, &self.policy).await;
        session.close().await;

        match &result {
            Ok(pdf) => info!(bytes = pdf.len(), elapsed_ms = started.elapsed().as_millis() as u64, "PDF rendered"),
            Err(e) => warn!(elapsed_ms = started.elapsed().as_millis() as u64, "PDF render failed: {e}"),
        }
        result
    }

    async fn diagnostics(&self) -> EngineDiagnostics {
        let started = Instant::now();
        let resolved = self.binary.path().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let probe = match resolved {
            Ok(p) => Probe {
                ok: true,
                path: Some(p.display().to_string()),
                error: None,
                elapsed_ms,
            },
            Err(e) => Probe {
                ok: false,
                path: None,
                error: Some(e.to_string()),
                elapsed_ms,
            },
        };

        EngineDiagnostics {
            environment: self.binary.mode().as_str().to_string(),
            cached_binary_path: self.binary.cached().map(|p| p.display().to_string()),
            probe,
        }
    }
}

/// One browser, its CDP tasks and its profile, scoped to a single render.
struct RenderSession {
    browser: Option<Browser>,
    handler: Option<JoinHandle<()>>,
    interceptor: Option<JoinHandle<()>>,
    profile: Option<TempDir>,
}

impl RenderSession {
    async fn print(
        &mut self,
        html: &str,
        config: &ConverterConfig,
        policy: &InterceptPolicy,
    ) -> Result<Vec<u8>, ConvertError> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| ConvertError::Internal("browser already closed".into()))?;

        let page = time_box(Stage::BrowserLaunch, config.launch_timeout(), browser.new_page("about:blank")).await?;

        cdp(page.execute(SetScriptExecutionDisabledParams::new(true))).await?;
        self.interceptor = Some(spawn_interceptor(&page, policy.clone()).await?);

        time_box(Stage::ContentLoad, config.content_load_timeout(), load_content(&page, html)).await?;

        wait_for_fonts(&page, config.font_wait_timeout()).await;

        cdp(page.execute(SetScriptExecutionDisabledParams::new(true))).await?;
        cdp(page.execute(EmulateNetworkConditionsParams::new(true, 0.0, -1.0, -1.0))).await?;

        let params = PrintToPdfParams::builder()
            .paper_width(A4_WIDTH_IN)
            .paper_height(A4_HEIGHT_IN)
            .print_background(true)
            .prefer_css_page_size(true)
            .margin_top(0.0)
            .margin_bottom(0.0)
            .margin_left(0.0)
            .margin_right(0.0)
            .build();
        let pdf = time_box(Stage::PdfGeneration, config.pdf_timeout(), page.pdf(params)).await?;

        if let Err(e) = page.close().await {
            warn!("Closing page failed: {e}");
        }
        Ok(pdf)
    }

    /// Orderly shutdown; `Drop` handles whatever is left.
    async fn close(&mut self) {
        if let Some(mut browser) = self.browser.take() {
            match tokio::time::timeout(CLOSE_TIMEOUT, browser.close()).await {
                Ok(Err(e)) => warn!("Closing browser failed: {e}"),
                Err(_) => warn!("Closing browser timed out"),
                Ok(Ok(_)) => {}
            }
            match tokio::time::timeout(CLOSE_TIMEOUT, browser.wait()).await {
                Ok(Err(e)) => warn!("Waiting for browser exit failed: {e}"),
                Err(_) => {
                    warn!("Browser did not exit; killing");
                    if let Some(Err(e)) = browser.kill().await {
                        warn!("Killing browser failed: {e}");
                    }
                }
                Ok(Ok(_)) => {}
            }
        }
        self.release();
    }

    fn release(&mut self) {
        if let Some(task) = self.interceptor.take() {
            task.abort();
        }
        if let Some(task) = self.handler.take() {
            task.abort();
        }
        // Dropping the Browser kills a still-running child process.
        drop(self.browser.take());
        if let Some(profile) = self.profile.take() {
            let path = profile.path().to_path_buf();
            if let Err(e) = profile.close() {
                warn!(path = %path.display(), "Removing browser profile failed: {e}");
            }
        }
    }
}

impl Drop for RenderSession {
    fn drop(&mut self) {
        if self.browser.is_some() {
            debug!("Render session dropped before close; tearing down");
        }
        self.release();
    }
}

/// Judge every paused request against the policy.
async fn spawn_interceptor(page: &Page, policy: InterceptPolicy) -> Result<JoinHandle<()>, ConvertError> {
    let mut paused = cdp(page.event_listener::<EventRequestPaused>()).await?;
    let page = page.clone();

    Ok(tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let kind = resource_kind(&event.resource_type);
            let outcome = match policy.decide(&event.request.url, kind) {
                Decision::Allow => {
                    debug!(url = %event.request.url, "Renderer request allowed");
                    page.execute(ContinueRequestParams::new(event.request_id.clone()))
                        .await
                        .map(|_| ())
                }
                Decision::Block(reason) => {
                    warn!(url = %truncate(&event.request.url), reason, "Renderer request blocked");
                    page.execute(FailRequestParams::new(
                        event.request_id.clone(),
                        ErrorReason::BlockedByClient,
                    ))
                    .await
                    .map(|_| ())
                }
            };
            if let Err(e) = outcome {
                debug!("Interceptor reply failed: {e}");
            }
        }
    }))
}

/// Replace the blank page's document and wait for the network to go quiet.
async fn load_content(page: &Page, html: &str) -> Result<(), ConvertError> {
    #[derive(Clone, Copy)]
    enum Net {
        Started,
        Done,
    }

    let started = cdp(page.event_listener::<EventRequestWillBeSent>()).await?.map(|_| Net::Started);
    let finished = cdp(page.event_listener::<EventLoadingFinished>()).await?.map(|_| Net::Done);
    let failed = cdp(page.event_listener::<EventLoadingFailed>()).await?.map(|_| Net::Done);
    let mut events = stream::select(started, stream::select(finished, failed));

    let frame = cdp(page.mainframe())
        .await?
        .ok_or_else(|| ConvertError::GenerationFailed("page has no main frame".into()))?;
    cdp(page.execute(SetDocumentContentParams::new(frame, html))).await?;

    let mut inflight: usize = 0;
    loop {
        match tokio::time::timeout(NETWORK_QUIET, events.next()).await {
            Ok(Some(Net::Started)) => inflight += 1,
            Ok(Some(Net::Done)) => inflight = inflight.saturating_sub(1),
            Ok(None) => break,
            Err(_) if inflight == 0 => break,
            Err(_) => {}
        }
    }
    debug!("Content loaded; network idle");
    Ok(())
}

/// Let web fonts settle. Expiry or failure is not an error.
async fn wait_for_fonts(page: &Page, limit: Duration) {
    if let Err(e) = page.execute(SetScriptExecutionDisabledParams::new(false)).await {
        debug!("Could not enable scripting for font wait: {e}");
        return;
    }

    let params = match EvaluateParams::builder()
        .expression("document.fonts.ready.then(() => true)")
        .await_promise(true)
        .build()
    {
        Ok(p) => p,
        Err(e) => {
            debug!("Font wait expression: {e}");
            return;
        }
    };

    match tokio::time::timeout(limit, page.evaluate_expression(params)).await {
        Ok(Ok(_)) => debug!("Fonts ready"),
        Ok(Err(e)) => debug!("Font wait failed: {e}"),
        Err(_) => debug!(limit_ms = limit.as_millis() as u64, "Font wait expired; continuing"),
    }
}

fn resource_kind(rt: &ResourceType) -> ResourceKind {
    match rt {
        ResourceType::Document => ResourceKind::Document,
        ResourceType::Stylesheet => ResourceKind::Stylesheet,
        ResourceType::Font => ResourceKind::Font,
        ResourceType::Image => ResourceKind::Image,
        ResourceType::Script => ResourceKind::Script,
        _ => ResourceKind::Other,
    }
}

/// Keep logged URLs short; data URIs can be megabytes.
fn truncate(url: &str) -> &str {
    match url.char_indices().nth(120) {
        Some((idx, _)) => &url[..idx],
        None => url,
    }
}

async fn cdp<T, E: std::fmt::Display>(fut: impl Future<Output = Result<T, E>>) -> Result<T, ConvertError> {
    fut.await
        .map_err(|e| ConvertError::GenerationFailed(format!("CDP: {e}")))
}

async fn time_box<T, E>(
    stage: Stage,
    limit: Duration,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, ConvertError>
where
    E: Into<ConvertErrorSource>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(e.into().into_convert(stage)),
        Err(_) => Err(ConvertError::Timeout {
            stage,
            secs: limit.as_secs().max(1),
        }),
    }
}

/// Error types that can come out of a time-boxed stage.
enum ConvertErrorSource {
    Convert(ConvertError),
    Cdp(String),
}

impl ConvertErrorSource {
    fn into_convert(self, stage: Stage) -> ConvertError {
        match self {
            ConvertErrorSource::Convert(e) => e,
            ConvertErrorSource::Cdp(msg) => ConvertError::GenerationFailed(format!("{stage}: {msg}")),
        }
    }
}

impl From<ConvertError> for ConvertErrorSource {
    fn from(e: ConvertError) -> Self {
        ConvertErrorSource::Convert(e)
    }
}

impl From<chromiumoxide::error::CdpError> for ConvertErrorSource {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        ConvertErrorSource::Cdp(e.to_string())
    }
}
