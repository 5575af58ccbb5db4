//! Network policy for the render sandbox.
//!
//! Every request the page makes is paused and judged here. The printed
//! document needs nothing from the network except web fonts; images were
//! already inlined as data URIs upstream.

use crate::pipeline::sniff::is_image_data_uri;
use url::Url;

/// Resource classes the policy distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Document,
    Stylesheet,
    Font,
    Image,
    Script,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Block(&'static str),
}

/// Hosts and rules applied to paused requests.
#[derive(Debug, Clone)]
pub struct InterceptPolicy {
    font_hosts: Vec<String>,
}

impl InterceptPolicy {
    pub fn new<I, S>(font_hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            font_hosts: font_hosts
                .into_iter()
                .map(|h| h.into().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn decide(&self, url: &str, kind: ResourceKind) -> Decision {
        if url
            .get(..5)
            .is_some_and(|p| p.eq_ignore_ascii_case("data:"))
        {
            return if is_image_data_uri(url) {
                Decision::Allow
            } else {
                Decision::Block("data_non_image")
            };
        }

        let Ok(parsed) = Url::parse(url) else {
            return Decision::Block("unparseable");
        };
        if parsed.scheme() != "https" {
            return Decision::Block("scheme");
        }
        let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
        if !self.font_hosts.iter().any(|h| *h == host) {
            return Decision::Block("host");
        }
        match kind {
            ResourceKind::Stylesheet | ResourceKind::Font => Decision::Allow,
            _ => Decision::Block("resource_type"),
        }
    }
}
