//! HTTP server binary for mdexport.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ConverterConfig`, optionally pre-fetches the headless browser, and serves
//! the conversion router until Ctrl-C / SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use mdexport::{router, BrowserMode, Converter, ConverterConfig};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r##"EXAMPLES:
  # Serve on the default port with an installed Chrome/Chromium
  mdexport-server

  # Serverless-style host: download a headless build up front
  mdexport-server --browser-mode serverless --prefetch-browser

  # Convert a file
  curl -s localhost:3000/api/convert/pdf \
    -H 'content-type: application/json' \
    -d '{"markdown":"# Hello","filename":"hello.md"}' -o hello.pdf

ENVIRONMENT VARIABLES:
  MDEXPORT_BROWSER_MODE        auto | local | serverless
  MDEXPORT_CHROMIUM_PATH       Explicit browser executable
  MDEXPORT_REQUEST_TIMEOUT_MS  Overall conversion time box (default 45000)
  MDEXPORT_LAUNCH_TIMEOUT_MS   Browser launch time box (default 20000)
  MDEXPORT_PDF_TIMEOUT_MS      PDF print time box (default 20000)
  MDEXPORT_IMAGE_TIMEOUT_MS    Per-image fetch time box (default 5000)
  MDEXPORT_DNS_GUARD           Refuse hostnames resolving to private space (default on)
  MDEXPORT_BROWSER_SANDBOX     Keep Chromium's sandbox in local mode (default on)
  CHROMIUM_PATH                Browser override used by local discovery
  CHROMIUM_AUTO_CACHE_DIR      Override the downloaded-browser cache directory
  RUST_LOG                     Log filter (overrides --verbose)
"##;

/// Secure Markdown to PDF / DOCX conversion service.
#[derive(Parser, Debug)]
#[command(
    name = "mdexport-server",
    version,
    about = "Secure Markdown to PDF / DOCX conversion service",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Address to bind.
    #[arg(long, env = "MDEXPORT_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on.
    #[arg(short, long, env = "MDEXPORT_PORT", default_value_t = 3000)]
    port: u16,

    /// Browser provisioning: auto, local, serverless.
    #[arg(long, env = "MDEXPORT_BROWSER_MODE")]
    browser_mode: Option<BrowserMode>,

    /// Explicit Chrome/Chromium executable.
    #[arg(long, env = "MDEXPORT_CHROMIUM_PATH")]
    chromium_path: Option<PathBuf>,

    /// Download the headless browser before accepting requests.
    #[arg(long, env = "MDEXPORT_PREFETCH_BROWSER")]
    prefetch_browser: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MDEXPORT_VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "mdexport=debug,tower_http=debug"
    } else {
        "mdexport=info,tower_http=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let mut config = ConverterConfig::from_env().context("Invalid MDEXPORT_* environment")?;
    if let Some(mode) = cli.browser_mode {
        config.browser_mode = mode;
    }
    if let Some(path) = cli.chromium_path.clone() {
        config.chromium_path = Some(path);
    }

    if cli.prefetch_browser && config.chromium_path.is_none() {
        prefetch_browser().context("Failed to download headless Chromium")?;
    }

    let converter = Converter::new(config).context("Failed to initialise converter")?;
    info!(
        mode = converter.config().browser_mode.resolve().as_str(),
        "Browser mode resolved"
    );

    // ── Serve ────────────────────────────────────────────────────────────
    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", cli.host, cli.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("mdexport v{} listening on http://{addr}", mdexport::server::VERSION);
    axum::serve(listener, router(converter))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Download the headless browser with a progress bar, unless already cached.
fn prefetch_browser() -> Result<()> {
    if chromium_auto::is_chromium_cached() {
        return Ok(());
    }

    let dl_bar = ProgressBar::new(0);
    dl_bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
    );
    dl_bar.set_prefix("Chromium");
    dl_bar.enable_steady_tick(Duration::from_millis(80));

    let bar = dl_bar.clone();
    // block_in_place lets the callback borrow `bar` without a 'static bound.
    let path = tokio::task::block_in_place(|| {
        chromium_auto::ensure_chromium(Some(&|downloaded, total| {
            if let Some(t) = total {
                if bar.length().unwrap_or(0) != t {
                    bar.set_length(t);
                }
            }
            bar.set_position(downloaded);
        }))
    })?;

    dl_bar.finish_with_message("ready ✓");
    info!(path = %path.display(), "Headless Chromium ready");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, starting graceful shutdown"),
    }
}
