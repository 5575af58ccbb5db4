//! # chromium-auto
//!
//! Auto-download and cache a headless Chromium build at runtime, so that a
//! rendering service deployed to a bare container or a serverless host does not
//! need a system-wide browser installation.
//!
//! ## How it works
//!
//! On first call to [`ensure_chromium`]:
//!
//! 1. Honours `CHROMIUM_PATH` when it points at an existing executable.
//! 2. Checks `~/.cache/mdexport/chromium-{VERSION}/` for an extracted build.
//! 3. If absent, downloads the platform archive (by default the
//!    [Chrome for Testing](https://googlechromelabs.github.io/chrome-for-testing/)
//!    `chrome-headless-shell` build) and extracts the whole archive, since the
//!    executable needs its sibling resources and shared libraries.
//! 4. Marks the executable as runnable and returns its path.
//!
//! Subsequent calls skip the network entirely.
//!
//! ## Environment variable overrides
//!
//! - `CHROMIUM_PATH` — path to an existing browser executable; skips download.
//! - `CHROMIUM_AUTO_CACHE_DIR` — override the default cache directory.
//! - `CHROMIUM_ARCHIVE_URL` — download a custom `.zip` / `.tar.gz` pack instead.
//! - `CHROMIUM_ARCHIVE_BINARY` — path of the executable inside that pack.

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;

// ── Public constants ─────────────────────────────────────────────────────────

/// The Chrome for Testing release used for downloads.
pub const CHROMIUM_VERSION: &str = "131.0.6778.85";

/// Chrome for Testing storage bucket.
const BASE_URL: &str = "https://storage.googleapis.com/chrome-for-testing-public";

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by chromium-auto operations.
#[derive(Error, Debug)]
pub enum ChromiumAutoError {
    /// The current OS/architecture combination has no published build.
    #[error("Unsupported platform: {os}/{arch} (set CHROMIUM_ARCHIVE_URL or CHROMIUM_PATH)")]
    UnsupportedPlatform { os: String, arch: String },

    /// Could not create or navigate the local cache directory.
    #[error("Cache directory error: {0}")]
    CacheDir(#[source] std::io::Error),

    /// Network download failed.
    #[error("Download failed: {0}")]
    Download(String),

    /// zip / gzip / tar extraction failed.
    #[error("Archive extraction failed: {0}")]
    Extract(String),

    /// The archive was extracted but the executable is not where expected.
    #[error("Browser executable not found at '{path}' after extraction")]
    MissingBinary { path: PathBuf },
}

// ── Internal: platform metadata ──────────────────────────────────────────────

/// Where to fetch a build from and where its executable lives once unpacked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSource {
    /// Fully-qualified archive URL.
    pub url: String,
    /// Executable path relative to the extraction root.
    pub binary_in_archive: String,
}

fn platform_slug() -> Result<&'static str, ChromiumAutoError> {
    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;

    match (os, arch) {
        ("linux", "x86_64") => Ok("linux64"),
        ("macos", "aarch64") => Ok("mac-arm64"),
        ("macos", "x86_64") => Ok("mac-x64"),
        ("windows", "x86_64") => Ok("win64"),
        ("windows", "x86") => Ok("win32"),
        (os, arch) => Err(ChromiumAutoError::UnsupportedPlatform {
            os: os.to_string(),
            arch: arch.to_string(),
        }),
    }
}

/// Resolve the archive to download for this host.
///
/// `CHROMIUM_ARCHIVE_URL` wins; it must be paired with
/// `CHROMIUM_ARCHIVE_BINARY` unless the pack keeps the binary at `chromium`.
pub fn archive_source() -> Result<ArchiveSource, ChromiumAutoError> {
    if let Ok(url) = std::env::var("CHROMIUM_ARCHIVE_URL") {
        if !url.is_empty() {
            let binary_in_archive = std::env::var("CHROMIUM_ARCHIVE_BINARY")
                .ok()
                .filter(|b| !b.is_empty())
                .unwrap_or_else(|| "chromium".to_string());
            return Ok(ArchiveSource {
                url,
                binary_in_archive,
            });
        }
    }

    let slug = platform_slug()?;
    let exe = if slug.starts_with("win") {
        "chrome-headless-shell.exe"
    } else {
        "chrome-headless-shell"
    };

    Ok(ArchiveSource {
        url: format!("{BASE_URL}/{CHROMIUM_VERSION}/{slug}/chrome-headless-shell-{slug}.zip"),
        binary_in_archive: format!("chrome-headless-shell-{slug}/{exe}"),
    })
}

// ── Cache directory resolution ───────────────────────────────────────────────

/// Returns the per-version cache directory for the browser build.
///
/// Default locations:
/// - **macOS**: `~/Library/Caches/mdexport/chromium-{VERSION}/`
/// - **Linux**: `~/.cache/mdexport/chromium-{VERSION}/`
/// - **Windows**: `%LOCALAPPDATA%\mdexport\chromium-{VERSION}\`
///
/// Override by setting `CHROMIUM_AUTO_CACHE_DIR`.
pub fn chromium_cache_dir() -> PathBuf {
    if let Ok(override_dir) = std::env::var("CHROMIUM_AUTO_CACHE_DIR") {
        return PathBuf::from(override_dir).join(format!("chromium-{CHROMIUM_VERSION}"));
    }

    let base = dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(std::env::temp_dir);

    base.join("mdexport").join(format!("chromium-{CHROMIUM_VERSION}"))
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Returns `true` if a browser executable is available without network access.
///
/// Also returns `true` when `CHROMIUM_PATH` points to an existing file.
pub fn is_chromium_cached() -> bool {
    cached_chromium_path().is_some()
}

/// Returns the on-disk path to the browser executable, or `None` if not cached.
pub fn cached_chromium_path() -> Option<PathBuf> {
    if let Some(p) = env_override() {
        return Some(p);
    }
    let source = archive_source().ok()?;
    let p = chromium_cache_dir().join(&source.binary_in_archive);
    p.exists().then_some(p)
}

/// Ensures a headless browser executable is present in the local cache.
///
/// - If `CHROMIUM_PATH` is set (and the file exists), that path is used.
/// - Otherwise, checks [`chromium_cache_dir`] for an extracted build.
/// - If absent, downloads and extracts the platform archive.
///
/// `on_progress` receives `(bytes_downloaded, total_size_option)` during
/// the download.  Pass `None` to suppress progress callbacks.
///
/// This function does not memoise across calls beyond the on-disk cache;
/// callers that need single-flight semantics wrap it themselves.
pub fn ensure_chromium(
    on_progress: Option<&dyn Fn(u64, Option<u64>)>,
) -> Result<PathBuf, ChromiumAutoError> {
    if let Some(p) = env_override() {
        return Ok(p);
    }

    let source = archive_source()?;
    let cache_dir = chromium_cache_dir();
    let binary = cache_dir.join(&source.binary_in_archive);

    if binary.exists() {
        return Ok(binary);
    }

    if let Some(parent) = cache_dir.parent() {
        std::fs::create_dir_all(parent).map_err(ChromiumAutoError::CacheDir)?;
    }
    if cache_dir.exists() {
        // Leftover from an interrupted run: no executable inside.
        std::fs::remove_dir_all(&cache_dir).map_err(ChromiumAutoError::CacheDir)?;
    }

    let archive_bytes = download_bytes(&source.url, on_progress)?;

    // Extract next to the final location, then move into place so a half
    // written tree is never observed as a valid cache.
    let staging = cache_dir.with_extension(format!("staging-{}", std::process::id()));
    if staging.exists() {
        std::fs::remove_dir_all(&staging).map_err(ChromiumAutoError::CacheDir)?;
    }
    std::fs::create_dir_all(&staging).map_err(ChromiumAutoError::CacheDir)?;

    let extracted = if is_tarball(&source.url) {
        extract_tarball(&archive_bytes, &staging)
    } else {
        extract_zip(&archive_bytes, &staging)
    };
    if let Err(e) = extracted {
        let _ = std::fs::remove_dir_all(&staging);
        return Err(e);
    }

    let staged_binary = staging.join(&source.binary_in_archive);
    if !staged_binary.exists() {
        let _ = std::fs::remove_dir_all(&staging);
        return Err(ChromiumAutoError::MissingBinary {
            path: staged_binary,
        });
    }
    make_executable(&staged_binary)?;

    // Another process may have won the race; its tree is equally valid.
    if std::fs::rename(&staging, &cache_dir).is_err() {
        let _ = std::fs::remove_dir_all(&staging);
        if !binary.exists() {
            return Err(ChromiumAutoError::MissingBinary { path: binary });
        }
    }

    Ok(binary)
}

// ── Internal helpers ─────────────────────────────────────────────────────────

fn env_override() -> Option<PathBuf> {
    let p = PathBuf::from(std::env::var("CHROMIUM_PATH").ok()?);
    p.exists().then_some(p)
}

fn is_tarball(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.ends_with(".tar.gz") || path.ends_with(".tgz")
}

/// Streams a URL into a `Vec<u8>`, calling `on_progress` every 64 KiB.
fn download_bytes(
    url: &str,
    on_progress: Option<&dyn Fn(u64, Option<u64>)>,
) -> Result<Vec<u8>, ChromiumAutoError> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("chromium-auto/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| ChromiumAutoError::Download(e.to_string()))?;

    let response = client
        .get(url)
        .send()
        .map_err(|e| ChromiumAutoError::Download(format!("GET {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(ChromiumAutoError::Download(format!(
            "HTTP {} for {url}",
            response.status()
        )));
    }

    let total = response.content_length();
    let capacity = total.unwrap_or(90 * 1024 * 1024) as usize;
    let mut buf = Vec::with_capacity(capacity);

    let mut stream = response;
    let mut chunk = vec![0u8; 64 * 1024]; // 64 KiB
    let mut downloaded: u64 = 0;

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                downloaded += n as u64;
                if let Some(cb) = on_progress {
                    cb(downloaded, total);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(ChromiumAutoError::Download(format!("Read error: {e}")));
            }
        }
    }

    Ok(buf)
}

/// Extracts a zip archive (Chrome for Testing layout) into `dest`.
fn extract_zip(archive_bytes: &[u8], dest: &Path) -> Result<(), ChromiumAutoError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(archive_bytes))
        .map_err(|e| ChromiumAutoError::Extract(e.to_string()))?;
    archive
        .extract(dest)
        .map_err(|e| ChromiumAutoError::Extract(format!("Unzip failed: {e}")))
}

/// Extracts a gzipped tar archive into `dest`.
fn extract_tarball(archive_bytes: &[u8], dest: &Path) -> Result<(), ChromiumAutoError> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    let gz = GzDecoder::new(archive_bytes);
    let mut archive = Archive::new(gz);
    archive
        .unpack(dest)
        .map_err(|e| ChromiumAutoError::Extract(format!("Unpack failed: {e}")))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), ChromiumAutoError> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = std::fs::metadata(path)
        .map_err(ChromiumAutoError::CacheDir)?
        .permissions();
    perms.set_mode(perms.mode() | 0o755);
    std::fs::set_permissions(path, perms).map_err(ChromiumAutoError::CacheDir)
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), ChromiumAutoError> {
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn cache_dir_is_deterministic() {
        let d1 = chromium_cache_dir();
        let d2 = chromium_cache_dir();
        assert_eq!(d1, d2);
        assert!(d1.to_str().unwrap().contains(CHROMIUM_VERSION));
    }

    #[test]
    fn tarball_detection_ignores_query() {
        assert!(is_tarball("https://example.com/pack.tar.gz"));
        assert!(is_tarball("https://example.com/pack.tgz?sig=abc"));
        assert!(!is_tarball("https://example.com/pack.zip"));
        assert!(!is_tarball("https://example.com/pack.zip?x=.tgz"));
    }

    #[test]
    fn default_source_points_at_headless_shell() {
        if platform_slug().is_err() || std::env::var("CHROMIUM_ARCHIVE_URL").is_ok() {
            return;
        }
        let source = archive_source().unwrap();
        assert!(source.url.contains(CHROMIUM_VERSION));
        assert!(source.url.ends_with(".zip"));
        assert!(source.binary_in_archive.contains("chrome-headless-shell"));
    }

    #[test]
    fn zip_extraction_keeps_directory_layout() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut w = zip::ZipWriter::new(&mut buf);
            let opts = zip::write::SimpleFileOptions::default();
            w.start_file("pack/chromium", opts).unwrap();
            w.write_all(b"#!/bin/sh\n").unwrap();
            w.finish().unwrap();
        }

        let dir = tempfile::tempdir().unwrap();
        extract_zip(buf.get_ref(), dir.path()).unwrap();
        let bin = dir.path().join("pack/chromium");
        assert!(bin.exists());
        make_executable(&bin).unwrap();
    }

    #[test]
    fn corrupt_archive_is_an_extract_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_zip(b"not a zip", dir.path()).unwrap_err();
        assert!(matches!(err, ChromiumAutoError::Extract(_)));
    }
}
