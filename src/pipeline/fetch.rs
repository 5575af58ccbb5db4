//! One-hop image transport.
//!
//! The transport never follows redirects itself: it reports a redirect back
//! to the image proxy, which validates the next URL before asking for it.
//! Bodies are streamed against a byte cap so an endless response cannot
//! exhaust memory.
//!
//! [`ImageTransport`] is a trait so tests can script hops without a network.

use crate::error::{ConvertError, ImageRejection};
use crate::safety::is_blocked_ip;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Result of a single request.
#[derive(Debug, Clone)]
pub enum Hop {
    /// 301, 302, 303, 307 or 308. `location` is the raw header value.
    Redirect { status: u16, location: Option<String> },
    /// 2xx with the body read (at most `max_bytes`).
    Body {
        content_type: Option<String>,
        bytes: Vec<u8>,
    },
}

#[async_trait]
pub trait ImageTransport: Send + Sync {
    /// Issue one GET for `url` without following redirects.
    ///
    /// Non-2xx, non-redirect statuses are `Err(ImageRejection::HttpStatus)`.
    /// A declared or streamed body above `max_bytes` is `Err(TooLarge)`.
    async fn fetch(&self, url: &Url, max_bytes: usize) -> Result<Hop, ImageRejection>;
}

pub(crate) fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

/// Production transport backed by `reqwest`.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str, dns_guard: bool, connect_timeout: Duration) -> Result<Self, ConvertError> {
        let mut builder = reqwest::Client::builder()
            .redirect(Policy::none())
            .user_agent(user_agent)
            .connect_timeout(connect_timeout)
            .https_only(true);
        if dns_guard {
            builder = builder.dns_resolver(Arc::new(GuardedResolver));
        }
        let client = builder
            .build()
            .map_err(|e| ConvertError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageTransport for ReqwestTransport {
    async fn fetch(&self, url: &Url, max_bytes: usize) -> Result<Hop, ImageRejection> {
        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "image/png,image/jpeg,image/gif,image/webp")
            .send()
            .await
            .map_err(|e| ImageRejection::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if is_redirect(status) {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Ok(Hop::Redirect { status, location });
        }
        if !response.status().is_success() {
            return Err(ImageRejection::HttpStatus(status));
        }

        if let Some(declared) = response.content_length() {
            if declared > max_bytes as u64 {
                debug!(%url, declared, "Content-Length over cap");
                return Err(ImageRejection::TooLarge { limit: max_bytes });
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ImageRejection::Transport(e.to_string()))?;
            if bytes.len() + chunk.len() > max_bytes {
                return Err(ImageRejection::TooLarge { limit: max_bytes });
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(Hop::Body { content_type, bytes })
    }
}

/// DNS resolver that drops loopback, private and reserved addresses.
///
/// A public-looking hostname pointing at `127.0.0.1` resolves to nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct GuardedResolver;

impl Resolve for GuardedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(async move {
            let host = name.as_str().to_string();
            let resolved = tokio::net::lookup_host((host.as_str(), 0)).await?;
            let allowed: Vec<SocketAddr> = resolved.filter(|a| !is_blocked_ip(a.ip())).collect();
            if allowed.is_empty() {
                debug!(host = %host, "all resolved addresses are blocked");
                return Err(format!("{host} resolves only to blocked addresses").into());
            }
            let addrs: Addrs = Box::new(allowed.into_iter());
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(addrs)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_statuses() {
        for s in [301, 302, 303, 307, 308] {
            assert!(is_redirect(s));
        }
        for s in [200, 204, 300, 304, 305, 404] {
            assert!(!is_redirect(s));
        }
    }

    #[tokio::test]
    async fn guarded_resolver_drops_loopback() {
        let name: Name = "localhost".parse().unwrap();
        let err = GuardedResolver.resolve(name).await;
        assert!(err.is_err());
    }

    #[test]
    fn client_builds() {
        assert!(ReqwestTransport::new("mdexport-test", true, Duration::from_secs(1)).is_ok());
    }
}
