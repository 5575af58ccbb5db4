//! Configuration types for Markdown conversion.
//!
//! All conversion behaviour is controlled through [`ConverterConfig`], built
//! via its [`ConverterConfigBuilder`] or read from `MDEXPORT_*` environment
//! variables with [`ConverterConfig::from_env`]. Defaults are the production
//! limits; tests shrink the timeouts through the builder.

use crate::error::ConvertError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const KIB: usize = 1024;
const MIB: usize = 1024 * 1024;

/// Configuration for the conversion pipeline.
///
/// # Example
/// ```rust
/// use mdexport::ConverterConfig;
///
/// let config = ConverterConfig::builder()
///     .request_timeout_ms(30_000)
///     .dns_guard(false)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_images, 20);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    // ── Input ─────────────────────────────────────────────────────────────
    /// Maximum Markdown size in UTF-8 bytes. Default: 1 MiB.
    pub max_content_bytes: usize,

    // ── Image proxy ───────────────────────────────────────────────────────
    /// Per-image byte cap. Default: 2 MiB.
    pub max_image_bytes: usize,

    /// Per-document total of embedded image bytes. Default: 8 MiB.
    pub max_total_image_bytes: usize,

    /// Distinct remote images processed per document. Default: 20.
    ///
    /// Candidates past this count are left untouched.
    pub max_images: usize,

    /// Concurrent fetches per batch. Default: 5.
    pub image_batch_size: usize,

    /// Budget for one image: every redirect hop plus the body. Default: 5000 ms.
    pub image_timeout_ms: u64,

    /// Redirect hops followed before giving up. Default: 3.
    pub max_redirects: usize,

    /// Largest accepted width or height in pixels. Default: 4096.
    pub max_image_dimension: u32,

    /// Largest accepted `width * height`. Default: 16 000 000.
    pub max_image_pixels: u64,

    /// Images whose dimensions cannot be read are accepted up to this size.
    /// Default: 500 KiB.
    pub unknown_dimension_max_bytes: usize,

    /// Resolve hostnames through a resolver that drops blocked addresses.
    /// Default: true.
    pub dns_guard: bool,

    /// `User-Agent` sent with image requests.
    pub user_agent: String,

    // ── PDF ───────────────────────────────────────────────────────────────
    /// Cap on the complete print document handed to the browser. Default: 10 MiB.
    pub max_print_html_bytes: usize,

    /// Hosts the renderer may load stylesheets and fonts from.
    pub font_hosts: Vec<String>,

    /// How the browser executable is located.
    pub browser_mode: BrowserMode,

    /// Explicit browser executable, bypassing discovery and download.
    pub chromium_path: Option<PathBuf>,

    /// Keep Chromium's sandbox on for local launches. Default: true.
    ///
    /// Containers running as root usually need this off. Serverless launches
    /// always run without it.
    pub browser_sandbox: bool,

    /// Default: 20 000 ms.
    pub launch_timeout_ms: u64,

    /// Load plus network idle. Default: 10 000 ms.
    pub content_load_timeout_ms: u64,

    /// Wait for web fonts; expiry is not an error. Default: 3000 ms.
    pub font_wait_timeout_ms: u64,

    /// Default: 20 000 ms.
    pub pdf_timeout_ms: u64,

    // ── Request ───────────────────────────────────────────────────────────
    /// Whole-request ceiling for either format. Default: 45 000 ms.
    pub request_timeout_ms: u64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            max_content_bytes: MIB,
            max_image_bytes: 2 * MIB,
            max_total_image_bytes: 8 * MIB,
            max_images: 20,
            image_batch_size: 5,
            image_timeout_ms: 5_000,
            max_redirects: 3,
            max_image_dimension: 4096,
            max_image_pixels: 16_000_000,
            unknown_dimension_max_bytes: 500 * KIB,
            dns_guard: true,
            user_agent: concat!("mdexport/", env!("CARGO_PKG_VERSION")).to_string(),
            max_print_html_bytes: 10 * MIB,
            font_hosts: vec![
                "fonts.googleapis.com".to_string(),
                "fonts.gstatic.com".to_string(),
            ],
            browser_mode: BrowserMode::default(),
            chromium_path: None,
            browser_sandbox: true,
            launch_timeout_ms: 20_000,
            content_load_timeout_ms: 10_000,
            font_wait_timeout_ms: 3_000,
            pdf_timeout_ms: 20_000,
            request_timeout_ms: 45_000,
        }
    }
}

impl ConverterConfig {
    /// Create a new builder for `ConverterConfig`.
    pub fn builder() -> ConverterConfigBuilder {
        ConverterConfigBuilder {
            config: Self::default(),
        }
    }

    /// Defaults overridden by `MDEXPORT_*` environment variables.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `MDEXPORT_BROWSER_MODE` | `browser_mode` (`auto`, `local`, `serverless`) |
    /// | `MDEXPORT_CHROMIUM_PATH` | `chromium_path` |
    /// | `MDEXPORT_REQUEST_TIMEOUT_MS` | `request_timeout_ms` |
    /// | `MDEXPORT_LAUNCH_TIMEOUT_MS` | `launch_timeout_ms` |
    /// | `MDEXPORT_PDF_TIMEOUT_MS` | `pdf_timeout_ms` |
    /// | `MDEXPORT_IMAGE_TIMEOUT_MS` | `image_timeout_ms` |
    /// | `MDEXPORT_DNS_GUARD` | `dns_guard` (`0`/`false` disables) |
    /// | `MDEXPORT_BROWSER_SANDBOX` | `browser_sandbox` (`0`/`false` disables) |
    pub fn from_env() -> Result<Self, ConvertError> {
        let mut b = Self::builder();

        if let Some(mode) = env_var("MDEXPORT_BROWSER_MODE") {
            b = b.browser_mode(mode.parse()?);
        }
        if let Some(path) = env_var("MDEXPORT_CHROMIUM_PATH") {
            b = b.chromium_path(path);
        }
        if let Some(ms) = env_parse::<u64>("MDEXPORT_REQUEST_TIMEOUT_MS")? {
            b = b.request_timeout_ms(ms);
        }
        if let Some(ms) = env_parse::<u64>("MDEXPORT_LAUNCH_TIMEOUT_MS")? {
            b = b.launch_timeout_ms(ms);
        }
        if let Some(ms) = env_parse::<u64>("MDEXPORT_PDF_TIMEOUT_MS")? {
            b = b.pdf_timeout_ms(ms);
        }
        if let Some(ms) = env_parse::<u64>("MDEXPORT_IMAGE_TIMEOUT_MS")? {
            b = b.image_timeout_ms(ms);
        }
        if let Some(flag) = env_var("MDEXPORT_DNS_GUARD") {
            b = b.dns_guard(env_flag(&flag));
        }
        if let Some(flag) = env_var("MDEXPORT_BROWSER_SANDBOX") {
            b = b.browser_sandbox(env_flag(&flag));
        }

        b.build()
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_millis(self.image_timeout_ms)
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_timeout_ms)
    }

    pub fn content_load_timeout(&self) -> Duration {
        Duration::from_millis(self.content_load_timeout_ms)
    }

    pub fn font_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.font_wait_timeout_ms)
    }

    pub fn pdf_timeout(&self) -> Duration {
        Duration::from_millis(self.pdf_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_flag(raw: &str) -> bool {
    !matches!(raw.trim().to_ascii_lowercase().as_str(), "0" | "false" | "off" | "no")
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConvertError> {
    match env_var(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConvertError::InvalidConfig(format!("{key}={raw:?} is not a valid number"))),
    }
}

/// Builder for [`ConverterConfig`].
#[derive(Debug)]
pub struct ConverterConfigBuilder {
    config: ConverterConfig,
}

impl ConverterConfigBuilder {
    pub fn max_content_bytes(mut self, n: usize) -> Self {
        self.config.max_content_bytes = n;
        self
    }

    pub fn max_image_bytes(mut self, n: usize) -> Self {
        self.config.max_image_bytes = n;
        self
    }

    pub fn max_total_image_bytes(mut self, n: usize) -> Self {
        self.config.max_total_image_bytes = n;
        self
    }

    pub fn max_images(mut self, n: usize) -> Self {
        self.config.max_images = n;
        self
    }

    pub fn image_batch_size(mut self, n: usize) -> Self {
        self.config.image_batch_size = n.max(1);
        self
    }

    pub fn image_timeout_ms(mut self, ms: u64) -> Self {
        self.config.image_timeout_ms = ms;
        self
    }

    pub fn max_redirects(mut self, n: usize) -> Self {
        self.config.max_redirects = n;
        self
    }

    pub fn max_image_dimension(mut self, px: u32) -> Self {
        self.config.max_image_dimension = px;
        self
    }

    pub fn max_image_pixels(mut self, px: u64) -> Self {
        self.config.max_image_pixels = px;
        self
    }

    pub fn unknown_dimension_max_bytes(mut self, n: usize) -> Self {
        self.config.unknown_dimension_max_bytes = n;
        self
    }

    pub fn dns_guard(mut self, v: bool) -> Self {
        self.config.dns_guard = v;
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn max_print_html_bytes(mut self, n: usize) -> Self {
        self.config.max_print_html_bytes = n;
        self
    }

    pub fn font_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.font_hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn browser_mode(mut self, mode: BrowserMode) -> Self {
        self.config.browser_mode = mode;
        self
    }

    pub fn chromium_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.chromium_path = Some(path.into());
        self
    }

    pub fn browser_sandbox(mut self, v: bool) -> Self {
        self.config.browser_sandbox = v;
        self
    }

    pub fn launch_timeout_ms(mut self, ms: u64) -> Self {
        self.config.launch_timeout_ms = ms;
        self
    }

    pub fn content_load_timeout_ms(mut self, ms: u64) -> Self {
        self.config.content_load_timeout_ms = ms;
        self
    }

    pub fn font_wait_timeout_ms(mut self, ms: u64) -> Self {
        self.config.font_wait_timeout_ms = ms;
        self
    }

    pub fn pdf_timeout_ms(mut self, ms: u64) -> Self {
        self.config.pdf_timeout_ms = ms;
        self
    }

    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.config.request_timeout_ms = ms;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConverterConfig, ConvertError> {
        let c = &self.config;
        if c.max_content_bytes == 0 {
            return Err(ConvertError::InvalidConfig(
                "max_content_bytes must be ≥ 1".into(),
            ));
        }
        if c.max_image_bytes > c.max_total_image_bytes {
            return Err(ConvertError::InvalidConfig(format!(
                "max_image_bytes ({}) exceeds max_total_image_bytes ({})",
                c.max_image_bytes, c.max_total_image_bytes
            )));
        }
        for (name, ms) in [
            ("image_timeout_ms", c.image_timeout_ms),
            ("launch_timeout_ms", c.launch_timeout_ms),
            ("content_load_timeout_ms", c.content_load_timeout_ms),
            ("pdf_timeout_ms", c.pdf_timeout_ms),
            ("request_timeout_ms", c.request_timeout_ms),
        ] {
            if ms == 0 {
                return Err(ConvertError::InvalidConfig(format!("{name} must be > 0")));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Where the headless browser comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserMode {
    /// Serverless when `AWS_LAMBDA_FUNCTION_NAME` or `VERCEL` is set, else local. (default)
    #[default]
    Auto,
    /// Use an installed Chrome/Chromium.
    Local,
    /// Download and cache a headless-shell build; single-process flags.
    Serverless,
}

impl BrowserMode {
    /// Resolve `Auto` against the current environment.
    pub fn resolve(self) -> BrowserMode {
        match self {
            BrowserMode::Auto => {
                if env_var("AWS_LAMBDA_FUNCTION_NAME").is_some() || env_var("VERCEL").is_some() {
                    BrowserMode::Serverless
                } else {
                    BrowserMode::Local
                }
            }
            other => other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BrowserMode::Auto => "auto",
            BrowserMode::Local => "local",
            BrowserMode::Serverless => "serverless",
        }
    }
}

impl FromStr for BrowserMode {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(BrowserMode::Auto),
            "local" => Ok(BrowserMode::Local),
            "serverless" => Ok(BrowserMode::Serverless),
            other => Err(ConvertError::InvalidConfig(format!(
                "unknown browser mode '{other}' (expected auto, local or serverless)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_production_limits() {
        let c = ConverterConfig::default();
        assert_eq!(c.max_content_bytes, 1_048_576);
        assert_eq!(c.max_image_bytes, 2 * 1_048_576);
        assert_eq!(c.max_total_image_bytes, 8 * 1_048_576);
        assert_eq!(c.max_images, 20);
        assert_eq!(c.image_batch_size, 5);
        assert_eq!(c.max_redirects, 3);
        assert_eq!(c.max_print_html_bytes, 10 * 1_048_576);
        assert_eq!(c.request_timeout(), Duration::from_secs(45));
        assert!(c.dns_guard);
    }

    #[test]
    fn builder_rejects_zero_timeout() {
        let err = ConverterConfig::builder().pdf_timeout_ms(0).build().unwrap_err();
        assert!(err.to_string().contains("pdf_timeout_ms"));
    }

    #[test]
    fn builder_rejects_image_cap_above_budget() {
        assert!(ConverterConfig::builder()
            .max_image_bytes(10)
            .max_total_image_bytes(5)
            .build()
            .is_err());
    }

    #[test]
    fn browser_mode_parses() {
        assert_eq!("Serverless".parse::<BrowserMode>().unwrap(), BrowserMode::Serverless);
        assert_eq!(" local ".parse::<BrowserMode>().unwrap(), BrowserMode::Local);
        assert!("lambda".parse::<BrowserMode>().is_err());
        assert_eq!(BrowserMode::Local.resolve(), BrowserMode::Local);
    }
}
