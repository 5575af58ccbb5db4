//! Image proxy: inline remote `<img>` sources as data URIs.
//!
//! Every candidate goes through the same gauntlet before its bytes reach the
//! document:
//!
//! ```text
//! src ──▶ safety check ──▶ .svg? ──▶ GET (no redirects) ──┬─▶ 3xx ──▶ join Location ──▶ safety check ──▶ GET …
//!                                                        └─▶ 2xx ──▶ size cap ──▶ magic bytes ──▶ dimensions ──▶ budget
//! ```
//!
//! A rejection at any step is non-fatal: the tag keeps its original `src` and
//! the rest of the document converts normally. Fetches run in fixed-size
//! batches with a per-image timeout covering every hop and the body.

use crate::config::ConverterConfig;
use crate::error::{ConvertError, ImageRejection};
use crate::pipeline::dom;
use crate::pipeline::fetch::{Hop, ImageTransport};
use crate::pipeline::sniff::{self, ImageKind};
use crate::safety;
use futures::future::join_all;
use lol_html::{element, rewrite_str, RewriteStrSettings};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// Lifecycle of one distinct remote `src`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateState {
    Pending,
    Inlined,
    Blocked(ImageRejection),
    Failed(ImageRejection),
}

#[derive(Debug, Clone)]
pub struct ImageCandidate {
    pub original_url: String,
    pub state: CandidateState,
}

/// A fetched, validated image ready for embedding.
#[derive(Debug, Clone)]
pub struct InlinedImage {
    pub data_uri: String,
    pub byte_size: usize,
    pub mime_type: &'static str,
}

/// Result of [`ImageProxy::proxy_images`].
#[derive(Debug, Clone)]
pub struct ProxyOutcome {
    pub html: String,
    /// Remote candidates considered, in document order.
    pub candidates: Vec<ImageCandidate>,
    /// Sum of `byte_size` over inlined images.
    pub inlined_bytes: usize,
}

impl ProxyOutcome {
    pub fn inlined(&self) -> usize {
        self.candidates
            .iter()
            .filter(|c| c.state == CandidateState::Inlined)
            .count()
    }

    pub fn rejections(&self) -> impl Iterator<Item = (&str, &ImageRejection)> {
        self.candidates.iter().filter_map(|c| match &c.state {
            CandidateState::Blocked(r) | CandidateState::Failed(r) => Some((c.original_url.as_str(), r)),
            _ => None,
        })
    }
}

pub struct ImageProxy {
    transport: Arc<dyn ImageTransport>,
    config: Arc<ConverterConfig>,
}

impl ImageProxy {
    pub fn new(transport: Arc<dyn ImageTransport>, config: Arc<ConverterConfig>) -> Self {
        Self { transport, config }
    }

    /// Inline every acceptable remote image in `html`.
    ///
    /// Non-image `data:` sources are dropped from their tags in the same pass.
    pub async fn proxy_images(&self, html: &str) -> Result<ProxyOutcome, ConvertError> {
        let source = html.to_string();
        let (html, sources) = off_thread(move || collect_sources(&source)).await?;

        let mut seen = HashSet::new();
        let remote: Vec<String> = sources
            .into_iter()
            .filter(|s| !sniff::is_image_data_uri(s))
            .filter(|s| seen.insert(s.clone()))
            .collect();

        if remote.len() > self.config.max_images {
            info!(
                found = remote.len(),
                limit = self.config.max_images,
                "Image count over limit; extra images left untouched"
            );
        }

        let mut candidates: Vec<ImageCandidate> = remote
            .into_iter()
            .take(self.config.max_images)
            .map(|original_url| ImageCandidate {
                original_url,
                state: CandidateState::Pending,
            })
            .collect();

        if candidates.is_empty() {
            return Ok(ProxyOutcome {
                html,
                candidates,
                inlined_bytes: 0,
            });
        }

        let budget = AtomicUsize::new(self.config.max_total_image_bytes);
        let mut inlined: HashMap<String, String> = HashMap::new();
        let mut inlined_bytes = 0usize;

        for batch in candidates.chunks_mut(self.config.image_batch_size.max(1)) {
            let results = join_all(batch.iter().map(|c| self.process(&c.original_url, &budget))).await;

            for (candidate, result) in batch.iter_mut().zip(results) {
                candidate.state = match result {
                    Ok(image) => {
                        debug!(
                            url = %candidate.original_url,
                            bytes = image.byte_size,
                            mime = image.mime_type,
                            "Image inlined"
                        );
                        inlined_bytes += image.byte_size;
                        inlined.insert(candidate.original_url.clone(), image.data_uri);
                        CandidateState::Inlined
                    }
                    Err((rejection, fetched)) => {
                        warn!(
                            url = %candidate.original_url,
                            reason = rejection.reason(),
                            "Image rejected: {rejection}"
                        );
                        if fetched {
                            CandidateState::Failed(rejection)
                        } else {
                            CandidateState::Blocked(rejection)
                        }
                    }
                };
            }
        }

        info!(
            candidates = candidates.len(),
            inlined = inlined.len(),
            bytes = inlined_bytes,
            "Image proxy finished"
        );

        let html = if inlined.is_empty() {
            html
        } else {
            off_thread(move || replace_sources(&html, &inlined)).await?
        };

        Ok(ProxyOutcome {
            html,
            candidates,
            inlined_bytes,
        })
    }

    /// Vet, fetch and validate one candidate.
    ///
    /// The error carries `true` once a request has been made, to tell a
    /// policy block from a failed fetch.
    async fn process(&self, raw: &str, budget: &AtomicUsize) -> Result<InlinedImage, (ImageRejection, bool)> {
        let url = safety::check_url(&decode_entities(raw)).map_err(|r| (ImageRejection::UnsafeUrl(r), false))?;
        if is_svg_path(&url) {
            return Err((ImageRejection::Svg, false));
        }

        let timeout = self.config.image_timeout();
        let (bytes, kind) = match tokio::time::timeout(timeout, self.fetch_following(url)).await {
            Ok(Ok(ok)) => ok,
            Ok(Err(rejection)) => return Err((rejection, true)),
            Err(_) => return Err((ImageRejection::Timeout, true)),
        };

        reserve(budget, bytes.len()).map_err(|r| (r, true))?;

        Ok(InlinedImage {
            data_uri: sniff::to_data_uri(&bytes, kind),
            byte_size: bytes.len(),
            mime_type: kind.mime(),
        })
    }

    async fn fetch_following(&self, start: Url) -> Result<(Vec<u8>, ImageKind), ImageRejection> {
        let max_bytes = self.config.max_image_bytes;
        let mut current = start;
        let mut followed = 0usize;

        loop {
            match self.transport.fetch(&current, max_bytes).await? {
                Hop::Redirect { status, location } => {
                    if followed >= self.config.max_redirects {
                        return Err(ImageRejection::TooManyRedirects {
                            max: self.config.max_redirects,
                        });
                    }
                    followed += 1;

                    let location = location
                        .filter(|l| !l.trim().is_empty())
                        .ok_or(ImageRejection::BadRedirect)?;
                    let next = current
                        .join(location.trim())
                        .map_err(|_| ImageRejection::BadRedirect)?;
                    safety::check_parsed(&next).map_err(ImageRejection::UnsafeUrl)?;
                    if is_svg_path(&next) {
                        return Err(ImageRejection::Svg);
                    }

                    debug!(from = %current, to = %next, status, hop = followed, "Following redirect");
                    current = next;
                }
                Hop::Body { content_type, bytes } => {
                    let kind = self.validate(&bytes)?;
                    if let Some(ct) = content_type {
                        if ImageKind::from_mime(ct.split(';').next().unwrap_or_default()) != Some(kind) {
                            debug!(url = %current, declared = %ct, sniffed = kind.mime(), "Content-Type disagrees with magic bytes");
                        }
                    }
                    return Ok((bytes, kind));
                }
            }
        }
    }

    fn validate(&self, bytes: &[u8]) -> Result<ImageKind, ImageRejection> {
        let c = &self.config;
        if bytes.len() > c.max_image_bytes {
            return Err(ImageRejection::TooLarge {
                limit: c.max_image_bytes,
            });
        }

        let kind = sniff::sniff(bytes).ok_or(ImageRejection::UnsupportedFormat)?;

        match sniff::dimensions(bytes, kind) {
            Some((width, height)) => {
                let too_wide = width > c.max_image_dimension || height > c.max_image_dimension;
                if too_wide || u64::from(width) * u64::from(height) > c.max_image_pixels {
                    return Err(ImageRejection::DimensionsTooLarge { width, height });
                }
            }
            None if bytes.len() > c.unknown_dimension_max_bytes => {
                return Err(ImageRejection::UnknownDimensions {
                    limit: c.unknown_dimension_max_bytes,
                });
            }
            None => {}
        }

        Ok(kind)
    }
}

/// Atomically take `size` bytes from the remaining document budget.
fn reserve(budget: &AtomicUsize, size: usize) -> Result<(), ImageRejection> {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(size))
        .map(|_| ())
        .map_err(|_| ImageRejection::BudgetExceeded)
}

fn is_svg_path(url: &Url) -> bool {
    url.path().to_ascii_lowercase().ends_with(".svg")
}

/// Run an HTML rewrite pass on the blocking pool.
async fn off_thread<T, F>(work: F) -> Result<T, ConvertError>
where
    F: FnOnce() -> Result<T, ConvertError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ConvertError::Internal(format!("HTML rewrite task: {e}")))?
}

/// All `<img src>` values in document order; strips non-image `data:` sources.
fn collect_sources(html: &str) -> Result<(String, Vec<String>), ConvertError> {
    let mut sources = Vec::new();

    let rewritten = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("img[src]", |el| {
                if let Some(src) = el.get_attribute("src") {
                    let trimmed = src.trim_start();
                    let is_data = trimmed
                        .get(..5)
                        .is_some_and(|p| p.eq_ignore_ascii_case("data:"));
                    if is_data && !sniff::is_image_data_uri(trimmed) {
                        el.remove_attribute("src");
                    } else if !trimmed.is_empty() {
                        sources.push(src);
                    }
                }
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|e| ConvertError::Internal(format!("HTML rewrite failed: {e}")))?;

    Ok((rewritten, sources))
}

fn replace_sources(html: &str, inlined: &HashMap<String, String>) -> Result<String, ConvertError> {
    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("img[src]", |el| {
                if let Some(data_uri) = el.get_attribute("src").and_then(|src| inlined.get(&src)) {
                    el.set_attribute("src", data_uri)?;
                }
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|e| ConvertError::Internal(format!("HTML rewrite failed: {e}")))
}

/// Resolve character references in a raw attribute value the way the HTML
/// tokenizer does, named and numeric alike.
fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    let doc = dom::parse(&format!("<img src=\"{}\">", raw.replace('"', "&quot;")));
    dom::find_element(&doc.document, "img")
        .and_then(|img| dom::attr(&img, "src"))
        .unwrap_or_else(|| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::sniff::tests::encoded;
    use async_trait::async_trait;
    use image::ImageFormat;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone)]
    enum Scripted {
        Redirect(Option<&'static str>),
        Body(&'static str, Vec<u8>),
        Status(u16),
        Hang,
    }

    #[derive(Default)]
    struct FakeTransport {
        routes: HashMap<String, Scripted>,
        requested: Mutex<Vec<String>>,
    }

    impl FakeTransport {
        fn route(mut self, url: &str, r: Scripted) -> Self {
            self.routes.insert(url.to_string(), r);
            self
        }

        fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ImageTransport for FakeTransport {
        async fn fetch(&self, url: &Url, max_bytes: usize) -> Result<Hop, ImageRejection> {
            self.requested.lock().unwrap().push(url.to_string());
            match self.routes.get(url.as_str()).cloned() {
                Some(Scripted::Redirect(loc)) => Ok(Hop::Redirect {
                    status: 302,
                    location: loc.map(str::to_string),
                }),
                Some(Scripted::Body(ct, bytes)) => {
                    if bytes.len() > max_bytes {
                        return Err(ImageRejection::TooLarge { limit: max_bytes });
                    }
                    Ok(Hop::Body {
                        content_type: Some(ct.to_string()),
                        bytes,
                    })
                }
                Some(Scripted::Status(s)) => Err(ImageRejection::HttpStatus(s)),
                Some(Scripted::Hang) => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Err(ImageRejection::Transport("unreachable".into()))
                }
                None => Err(ImageRejection::HttpStatus(404)),
            }
        }
    }

    fn proxy(transport: FakeTransport, config: ConverterConfig) -> (ImageProxy, Arc<FakeTransport>) {
        let transport = Arc::new(transport);
        (ImageProxy::new(transport.clone(), Arc::new(config)), transport)
    }

    fn png() -> Vec<u8> {
        encoded(4, 3, ImageFormat::Png)
    }

    /// A valid PNG padded after IEND to `size` bytes.
    fn padded_png(size: usize) -> Vec<u8> {
        let mut bytes = png();
        bytes.resize(size, 0xAB);
        bytes
    }

    #[tokio::test]
    async fn inlines_public_png() {
        let t = FakeTransport::default().route("https://cdn.example.com/a.png", Scripted::Body("image/png", png()));
        let (p, _) = proxy(t, ConverterConfig::default());

        let out = p
            .proxy_images(r#"<p><img src="https://cdn.example.com/a.png" alt="a"></p>"#)
            .await
            .unwrap();

        assert_eq!(out.inlined(), 1);
        assert!(out.html.contains(r#"src="data:image/png;base64,"#), "{}", out.html);
        assert!(out.html.contains(r#"alt="a""#));
        assert!(!out.html.contains("cdn.example.com"));
    }

    #[tokio::test]
    async fn private_targets_never_requested() {
        let (p, t) = proxy(FakeTransport::default(), ConverterConfig::default());
        let html = r#"<img src="https://127.0.0.1/a.png"><img src="http://example.com/b.png"><img src="https://printer.local/c.png">"#;

        let out = p.proxy_images(html).await.unwrap();

        assert!(t.requested().is_empty());
        assert_eq!(out.inlined(), 0);
        assert_eq!(out.html, html);
        assert!(out
            .rejections()
            .all(|(_, r)| matches!(r, ImageRejection::UnsafeUrl(_))));
    }

    #[tokio::test]
    async fn redirect_into_private_space_is_refused() {
        let t = FakeTransport::default()
            .route("https://evil.example.com/a.png", Scripted::Redirect(Some("https://169.254.169.254/latest")))
            .route("https://169.254.169.254/latest", Scripted::Body("image/png", png()));
        let (p, t) = proxy(t, ConverterConfig::default());

        let out = p
            .proxy_images(r#"<img src="https://evil.example.com/a.png">"#)
            .await
            .unwrap();

        assert_eq!(out.inlined(), 0);
        assert_eq!(t.requested(), vec!["https://evil.example.com/a.png".to_string()]);
        let (_, r) = out.rejections().next().unwrap();
        assert_eq!(r.reason(), "private_address");
    }

    #[tokio::test]
    async fn follows_three_redirects_but_not_four() {
        let t = FakeTransport::default()
            .route("https://a.example.com/0.png", Scripted::Redirect(Some("/1.png")))
            .route("https://a.example.com/1.png", Scripted::Redirect(Some("https://b.example.com/2.png")))
            .route("https://b.example.com/2.png", Scripted::Redirect(Some("3.png")))
            .route("https://b.example.com/3.png", Scripted::Body("image/png", png()))
            .route("https://c.example.com/0.png", Scripted::Redirect(Some("/1.png")))
            .route("https://c.example.com/1.png", Scripted::Redirect(Some("/2.png")))
            .route("https://c.example.com/2.png", Scripted::Redirect(Some("/3.png")))
            .route("https://c.example.com/3.png", Scripted::Redirect(Some("/4.png")))
            .route("https://c.example.com/4.png", Scripted::Body("image/png", png()));
        let (p, t) = proxy(t, ConverterConfig::default());

        let out = p
            .proxy_images(r#"<img src="https://a.example.com/0.png"><img src="https://c.example.com/0.png">"#)
            .await
            .unwrap();

        assert_eq!(out.candidates[0].state, CandidateState::Inlined);
        assert_eq!(
            out.candidates[1].state,
            CandidateState::Failed(ImageRejection::TooManyRedirects { max: 3 })
        );
        assert!(!t.requested().contains(&"https://c.example.com/4.png".to_string()));
    }

    #[tokio::test]
    async fn redirect_without_location_fails() {
        let t = FakeTransport::default().route("https://a.example.com/x.png", Scripted::Redirect(None));
        let (p, _) = proxy(t, ConverterConfig::default());

        let out = p.proxy_images(r#"<img src="https://a.example.com/x.png">"#).await.unwrap();
        assert_eq!(out.candidates[0].state, CandidateState::Failed(ImageRejection::BadRedirect));
    }

    #[tokio::test]
    async fn content_type_does_not_override_magic_bytes() {
        let t = FakeTransport::default()
            .route("https://a.example.com/fake.png", Scripted::Body("image/png", b"<html>nope</html>".to_vec()))
            .route("https://a.example.com/real", Scripted::Body("application/octet-stream", png()));
        let (p, _) = proxy(t, ConverterConfig::default());

        let out = p
            .proxy_images(r#"<img src="https://a.example.com/fake.png"><img src="https://a.example.com/real">"#)
            .await
            .unwrap();

        assert_eq!(
            out.candidates[0].state,
            CandidateState::Failed(ImageRejection::UnsupportedFormat)
        );
        assert_eq!(out.candidates[1].state, CandidateState::Inlined);
        assert!(out.html.contains(r#"src="https://a.example.com/fake.png""#));
    }

    #[tokio::test]
    async fn svg_is_refused_before_fetch() {
        let (p, t) = proxy(FakeTransport::default(), ConverterConfig::default());
        let out = p.proxy_images(r#"<img src="https://a.example.com/logo.SVG?v=2">"#).await.unwrap();
        assert!(t.requested().is_empty());
        assert_eq!(out.candidates[0].state, CandidateState::Blocked(ImageRejection::Svg));
    }

    #[tokio::test]
    async fn oversized_dimensions_are_refused() {
        let t = FakeTransport::default()
            .route("https://a.example.com/wide.png", Scripted::Body("image/png", encoded(5000, 1, ImageFormat::Png)))
            .route("https://a.example.com/big.png", Scripted::Body("image/png", encoded(40, 30, ImageFormat::Png)));
        let config = ConverterConfig::builder().max_image_pixels(1000).build().unwrap();
        let (p, _) = proxy(t, config);

        let out = p
            .proxy_images(r#"<img src="https://a.example.com/wide.png"><img src="https://a.example.com/big.png">"#)
            .await
            .unwrap();

        assert_eq!(
            out.candidates[0].state,
            CandidateState::Failed(ImageRejection::DimensionsTooLarge { width: 5000, height: 1 })
        );
        assert_eq!(
            out.candidates[1].state,
            CandidateState::Failed(ImageRejection::DimensionsTooLarge { width: 40, height: 30 })
        );
    }

    #[tokio::test]
    async fn per_image_cap_applies() {
        let t = FakeTransport::default().route("https://a.example.com/x.png", Scripted::Body("image/png", padded_png(2 * 1024 * 1024 + 1)));
        let (p, _) = proxy(t, ConverterConfig::default());
        let out = p.proxy_images(r#"<img src="https://a.example.com/x.png">"#).await.unwrap();
        assert!(matches!(out.candidates[0].state, CandidateState::Failed(ImageRejection::TooLarge { .. })));
    }

    #[tokio::test]
    async fn total_budget_is_never_exceeded() {
        let size = 1_900_000;
        let mut t = FakeTransport::default();
        let mut html = String::new();
        for i in 0..5 {
            let url = format!("https://a.example.com/{i}.png");
            html.push_str(&format!(r#"<img src="{url}">"#));
            t = t.route(&url, Scripted::Body("image/png", padded_png(size)));
        }
        let (p, _) = proxy(t, ConverterConfig::default());

        let out = p.proxy_images(&html).await.unwrap();

        assert_eq!(out.inlined(), 4);
        assert!(out.inlined_bytes <= 8 * 1024 * 1024);
        assert_eq!(
            out.rejections().filter(|(_, r)| **r == ImageRejection::BudgetExceeded).count(),
            1
        );
    }

    #[tokio::test]
    async fn only_first_twenty_distinct_images_are_processed() {
        let mut html = String::new();
        for i in 0..25 {
            html.push_str(&format!(r#"<img src="https://a.example.com/{i}.png">"#));
        }
        // duplicates do not count twice
        html.push_str(r#"<img src="https://a.example.com/0.png">"#);
        let (p, t) = proxy(FakeTransport::default(), ConverterConfig::default());

        let out = p.proxy_images(&html).await.unwrap();

        assert_eq!(out.candidates.len(), 20);
        assert_eq!(t.requested().len(), 20);
        assert!(!t.requested().contains(&"https://a.example.com/20.png".to_string()));
    }

    #[tokio::test]
    async fn data_sources_are_filtered() {
        let (p, t) = proxy(FakeTransport::default(), ConverterConfig::default());
        let html = r#"<img src="data:text/html,<b>x</b>" alt="bad"><img src="data:image/gif;base64,R0lGODlhAQABAAAAACw=">"#;

        let out = p.proxy_images(html).await.unwrap();

        assert!(t.requested().is_empty());
        assert!(!out.html.contains("text/html"));
        assert!(out.html.contains(r#"alt="bad""#));
        assert!(out.html.contains("data:image/gif;base64,R0lGODlhAQABAAAAACw="));
    }

    #[tokio::test]
    async fn slow_fetch_times_out_without_failing_document() {
        let t = FakeTransport::default()
            .route("https://a.example.com/slow.png", Scripted::Hang)
            .route("https://a.example.com/ok.png", Scripted::Body("image/png", png()));
        let config = ConverterConfig::builder().image_timeout_ms(50).build().unwrap();
        let (p, _) = proxy(t, config);

        let out = p
            .proxy_images(r#"<img src="https://a.example.com/slow.png"><img src="https://a.example.com/ok.png">"#)
            .await
            .unwrap();

        assert_eq!(out.candidates[0].state, CandidateState::Failed(ImageRejection::Timeout));
        assert_eq!(out.candidates[1].state, CandidateState::Inlined);
    }

    #[tokio::test]
    async fn upstream_error_leaves_tag() {
        let t = FakeTransport::default().route("https://a.example.com/x.png", Scripted::Status(500));
        let (p, _) = proxy(t, ConverterConfig::default());
        let html = r#"<img src="https://a.example.com/x.png">"#;
        let out = p.proxy_images(html).await.unwrap();
        assert_eq!(out.html, html);
        assert_eq!(out.candidates[0].state, CandidateState::Failed(ImageRejection::HttpStatus(500)));
    }

    #[tokio::test]
    async fn unknown_dimensions_fall_back_to_byte_cap() {
        // PNG signature with no readable IHDR
        let truncated = |size: usize| {
            let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
            bytes.resize(size, 0);
            bytes
        };
        let t = FakeTransport::default()
            .route("https://a.example.com/small.png", Scripted::Body("image/png", truncated(400 * 1024)))
            .route("https://a.example.com/large.png", Scripted::Body("image/png", truncated(600 * 1024)));
        let (p, _) = proxy(t, ConverterConfig::default());

        let out = p
            .proxy_images(r#"<img src="https://a.example.com/small.png"><img src="https://a.example.com/large.png">"#)
            .await
            .unwrap();

        assert_eq!(out.candidates[0].state, CandidateState::Inlined);
        assert_eq!(
            out.candidates[1].state,
            CandidateState::Failed(ImageRejection::UnknownDimensions { limit: 500 * 1024 })
        );
    }

    /// Serves a PNG after a short delay and records peak concurrency.
    #[derive(Default)]
    struct InFlight {
        current: AtomicUsize,
        peak: AtomicUsize,
        total: AtomicUsize,
    }

    #[async_trait]
    impl ImageTransport for InFlight {
        async fn fetch(&self, _url: &Url, _max_bytes: usize) -> Result<Hop, ImageRejection> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.total.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(Hop::Body {
                content_type: Some("image/png".into()),
                bytes: png(),
            })
        }
    }

    #[tokio::test]
    async fn at_most_five_fetches_in_flight() {
        let transport = Arc::new(InFlight::default());
        let p = ImageProxy::new(transport.clone(), Arc::new(ConverterConfig::default()));
        let html: String = (0..12)
            .map(|i| format!(r#"<img src="https://a.example.com/{i}.png">"#))
            .collect();

        let out = p.proxy_images(&html).await.unwrap();

        assert_eq!(out.inlined(), 12);
        assert_eq!(transport.total.load(Ordering::SeqCst), 12);
        assert_eq!(transport.peak.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn redirect_onto_svg_path_is_refused() {
        let t = FakeTransport::default()
            .route("https://a.example.com/img", Scripted::Redirect(Some("/assets/logo.svg")))
            .route("https://a.example.com/assets/logo.svg", Scripted::Body("image/png", png()));
        let (p, t) = proxy(t, ConverterConfig::default());

        let out = p.proxy_images(r#"<img src="https://a.example.com/img">"#).await.unwrap();

        assert_eq!(out.candidates[0].state, CandidateState::Failed(ImageRejection::Svg));
        assert_eq!(t.requested(), vec!["https://a.example.com/img".to_string()]);
    }

    #[test]
    fn entity_decoding() {
        assert_eq!(decode_entities("https://a/b?x=1&amp;y=2"), "https://a/b?x=1&y=2");
        assert_eq!(decode_entities("https://a/b?x=1&#38;y=2"), "https://a/b?x=1&y=2");
        assert_eq!(decode_entities("https://a/b?x=1&#x26;y=2"), "https://a/b?x=1&y=2");
        assert_eq!(decode_entities("https://a/&quot;q&quot;"), "https://a/\"q\"");
        assert_eq!(decode_entities("plain"), "plain");
    }

    #[tokio::test]
    async fn numeric_references_in_src_are_resolved_before_fetch() {
        let t = FakeTransport::default().route("https://a.example.com/i.png?a=1&b=2", Scripted::Body("image/png", png()));
        let (p, t) = proxy(t, ConverterConfig::default());

        let out = p
            .proxy_images(r#"<img src="https://a.example.com/i.png?a=1&#x26;b=2">"#)
            .await
            .unwrap();

        assert_eq!(t.requested(), vec!["https://a.example.com/i.png?a=1&b=2".to_string()]);
        assert_eq!(out.inlined(), 1);
    }
}
