//! Image sniffing and data-URI encoding.
//!
//! The MIME type of an embedded image comes from its magic bytes only. A
//! `Content-Type: image/png` header on an HTML body does not make it an image,
//! and a correct PNG served as `application/octet-stream` is still a PNG.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageFormat, ImageReader};
use std::io::Cursor;
use tracing::debug;

/// Raster formats the pipeline will embed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Png,
    Jpeg,
    Gif,
    WebP,
}

impl ImageKind {
    pub fn mime(self) -> &'static str {
        match self {
            ImageKind::Png => "image/png",
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Gif => "image/gif",
            ImageKind::WebP => "image/webp",
        }
    }

    fn format(self) -> ImageFormat {
        match self {
            ImageKind::Png => ImageFormat::Png,
            ImageKind::Jpeg => ImageFormat::Jpeg,
            ImageKind::Gif => ImageFormat::Gif,
            ImageKind::WebP => ImageFormat::WebP,
        }
    }

    fn from_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Png => Some(ImageKind::Png),
            ImageFormat::Jpeg => Some(ImageKind::Jpeg),
            ImageFormat::Gif => Some(ImageKind::Gif),
            ImageFormat::WebP => Some(ImageKind::WebP),
            _ => None,
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/png" => Some(ImageKind::Png),
            "image/jpeg" | "image/jpg" => Some(ImageKind::Jpeg),
            "image/gif" => Some(ImageKind::Gif),
            "image/webp" => Some(ImageKind::WebP),
            _ => None,
        }
    }
}

/// Identify the format from leading magic bytes.
pub fn sniff(bytes: &[u8]) -> Option<ImageKind> {
    image::guess_format(bytes).ok().and_then(ImageKind::from_format)
}

/// Intrinsic `(width, height)` read from the header, without decoding pixels.
pub fn dimensions(bytes: &[u8], kind: ImageKind) -> Option<(u32, u32)> {
    ImageReader::with_format(Cursor::new(bytes), kind.format())
        .into_dimensions()
        .ok()
}

/// `data:<mime>;base64,<payload>`
pub fn to_data_uri(bytes: &[u8], kind: ImageKind) -> String {
    let b64 = STANDARD.encode(bytes);
    debug!("Encoded {} image → {} bytes base64", kind.mime(), b64.len());
    format!("data:{};base64,{}", kind.mime(), b64)
}

/// `true` for `data:image/...` URIs (case-insensitive scheme and type).
pub fn is_image_data_uri(src: &str) -> bool {
    src.trim_start()
        .get(..11)
        .is_some_and(|p| p.eq_ignore_ascii_case("data:image/"))
}

/// Decode a `data:` URI into `(mime, bytes)`.
pub fn decode_data_uri(src: &str) -> Option<(String, Vec<u8>)> {
    let rest = src.trim();
    if !rest.get(..5)?.eq_ignore_ascii_case("data:") {
        return None;
    }
    let (header, payload) = rest[5..].split_once(',')?;
    let mut parts = header.split(';');
    let mime = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
    let is_b64 = parts.any(|p| p.trim().eq_ignore_ascii_case("base64"));

    let bytes = if is_b64 {
        let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        STANDARD.decode(compact).ok()?
    } else {
        urlencoding::decode_binary(payload.as_bytes()).into_owned()
    };
    Some((mime, bytes))
}

/// Re-encode any supported raster as PNG (the DOCX writer does not take WebP).
pub fn reencode_png(bytes: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}
