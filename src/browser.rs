//! Headless browser provisioning.
//!
//! A [`BrowserProvisioner`] knows where a Chromium executable comes from and
//! which extra flags its environment needs:
//!
//! * [`LocalBrowser`] — an installed Chrome / Chromium (explicit path, the
//!   `CHROMIUM_PATH` override, well-known install locations, or a build that
//!   `chromium-auto` already cached).
//! * [`ServerlessBrowser`] — downloads and caches a headless-shell build via
//!   `chromium-auto` and runs it single-process without the sandbox, as
//!   Lambda-style hosts require.
//!
//! [`BrowserBinary`] memoises the resolved path process-wide. Concurrent cold
//! starts share one resolution; a failed resolution leaves the cell empty so
//! the next request tries again. Only the path is shared, never a browser.

use crate::config::{BrowserMode, ConverterConfig};
use crate::error::ConvertError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Flags applied to every launch.
const BASE_ARGS: &[&str] = &[
    "--disable-gpu",
    "--disable-dev-shm-usage",
    "--disable-extensions",
    "--disable-background-networking",
    "--disable-component-update",
    "--disable-default-apps",
    "--disable-sync",
    "--disable-translate",
    "--no-first-run",
    "--no-default-browser-check",
    "--mute-audio",
    "--hide-scrollbars",
    "--font-render-hinting=none",
];

const SERVERLESS_ARGS: &[&str] = &["--single-process", "--no-zygote"];

#[cfg(target_os = "linux")]
const WELL_KNOWN_PATHS: &[&str] = &[
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/snap/bin/chromium",
    "/opt/google/chrome/chrome",
];

#[cfg(target_os = "macos")]
const WELL_KNOWN_PATHS: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary",
];

#[cfg(target_os = "windows")]
const WELL_KNOWN_PATHS: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files\Chromium\Application\chrome.exe",
];

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
const WELL_KNOWN_PATHS: &[&str] = &[];

#[async_trait]
pub trait BrowserProvisioner: Send + Sync {
    /// Resolved mode this provisioner serves (`local` or `serverless`).
    fn mode(&self) -> BrowserMode;

    /// Locate (and if necessary fetch) the executable.
    async fn executable(&self) -> Result<PathBuf, ConvertError>;

    /// Launch flags beyond [`BASE_ARGS`].
    fn extra_args(&self) -> &'static [&'static str] {
        &[]
    }

    /// Whether Chromium's own sandbox stays on.
    fn sandbox(&self) -> bool;
}

/// An installed browser.
#[derive(Debug, Clone, Default)]
pub struct LocalBrowser {
    explicit: Option<PathBuf>,
    sandbox: bool,
}

impl LocalBrowser {
    pub fn new(explicit: Option<PathBuf>, sandbox: bool) -> Self {
        Self { explicit, sandbox }
    }
}

#[async_trait]
impl BrowserProvisioner for LocalBrowser {
    fn mode(&self) -> BrowserMode {
        BrowserMode::Local
    }

    async fn executable(&self) -> Result<PathBuf, ConvertError> {
        if let Some(p) = &self.explicit {
            return existing(p);
        }

        let from_env = std::env::var_os("CHROMIUM_PATH").map(PathBuf::from);
        let candidate = from_env
            .into_iter()
            .chain(WELL_KNOWN_PATHS.iter().map(PathBuf::from))
            .find(|p| p.is_file())
            .or_else(chromium_auto::cached_chromium_path);

        match candidate {
            Some(p) => {
                debug!(path = %p.display(), "Found local browser");
                Ok(p)
            }
            None => Err(ConvertError::BrowserUnavailable(
                "no Chrome/Chromium found; install one, set MDEXPORT_CHROMIUM_PATH, \
                 or run with --browser-mode serverless to download a headless build"
                    .into(),
            )),
        }
    }

    fn sandbox(&self) -> bool {
        self.sandbox
    }
}

/// A downloaded headless-shell build for hosts with no browser installed.
#[derive(Debug, Clone, Default)]
pub struct ServerlessBrowser {
    explicit: Option<PathBuf>,
}

impl ServerlessBrowser {
    pub fn new(explicit: Option<PathBuf>) -> Self {
        Self { explicit }
    }
}

#[async_trait]
impl BrowserProvisioner for ServerlessBrowser {
    fn mode(&self) -> BrowserMode {
        BrowserMode::Serverless
    }

    async fn executable(&self) -> Result<PathBuf, ConvertError> {
        if let Some(p) = &self.explicit {
            return existing(p);
        }

        info!("Resolving headless Chromium (downloads on first use)");
        tokio::task::spawn_blocking(|| chromium_auto::ensure_chromium(None))
            .await
            .map_err(|e| ConvertError::Internal(format!("browser download task: {e}")))?
            .map_err(|e| ConvertError::BrowserUnavailable(e.to_string()))
    }

    fn extra_args(&self) -> &'static [&'static str] {
        SERVERLESS_ARGS
    }

    fn sandbox(&self) -> bool {
        false
    }
}

fn existing(p: &Path) -> Result<PathBuf, ConvertError> {
    if p.is_file() {
        Ok(p.to_path_buf())
    } else {
        Err(ConvertError::BrowserUnavailable(format!(
            "configured browser '{}' does not exist",
            p.display()
        )))
    }
}

/// Pick the provisioner for `config.browser_mode`.
pub fn provisioner_for(config: &ConverterConfig) -> Arc<dyn BrowserProvisioner> {
    match config.browser_mode.resolve() {
        BrowserMode::Serverless => Arc::new(ServerlessBrowser::new(config.chromium_path.clone())),
        _ => Arc::new(LocalBrowser::new(
            config.chromium_path.clone(),
            config.browser_sandbox,
        )),
    }
}

/// Process-wide, single-flight browser path.
pub struct BrowserBinary {
    provisioner: Arc<dyn BrowserProvisioner>,
    path: OnceCell<PathBuf>,
}

impl BrowserBinary {
    pub fn new(provisioner: Arc<dyn BrowserProvisioner>) -> Self {
        Self {
            provisioner,
            path: OnceCell::new(),
        }
    }

    /// Resolve once; concurrent callers wait for the same resolution.
    pub async fn path(&self) -> Result<PathBuf, ConvertError> {
        self.path
            .get_or_try_init(|| self.provisioner.executable())
            .await
            .cloned()
    }

    /// Path if already resolved; never triggers resolution.
    pub fn cached(&self) -> Option<&Path> {
        self.path.get().map(PathBuf::as_path)
    }

    pub fn mode(&self) -> BrowserMode {
        self.provisioner.mode()
    }

    /// Full launch flag set for this provisioner.
    pub fn launch_args(&self) -> Vec<String> {
        BASE_ARGS
            .iter()
            .chain(self.provisioner.extra_args())
            .map(|s| s.to_string())
            .collect()
    }

    pub fn sandbox(&self) -> bool {
        self.provisioner.sandbox()
    }
}
