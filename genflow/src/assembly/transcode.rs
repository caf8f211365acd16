//! Image re-encoding behind a trait seam, plus media type detection.

use thiserror::Error;

use super::scan::extension_of;

/// One re-encoding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodeRequest {
    /// Longest edge of the output; images are never upscaled.
    pub max_dimension: u32,
    /// Lossy encoder quality (1-100).
    pub quality: u8,
    /// Keep transparency (lossless output) when the source has it.
    pub preserve_alpha: bool,
}

/// Re-encoded image bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcoded {
    /// Encoded bytes.
    pub bytes: Vec<u8>,
    /// Media type of `bytes`.
    pub media_type: String,
    /// Quality used, or `None` for lossless output (lower rungs cannot help).
    pub quality: Option<u8>,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
}

/// Decoder or encoder failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct TranscodeError(pub String);

/// Resizes and re-encodes images for the compression ladder.
#[cfg_attr(test, mockall::automock)]
pub trait ImageTranscoder: Send + Sync {
    /// Produces a smaller rendition of `bytes` according to `request`.
    fn transcode(&self, bytes: &[u8], request: &TranscodeRequest) -> Result<Transcoded, TranscodeError>;
}

/// Transcoder used when raster support is compiled out: every request fails,
/// so oversized assets are dropped instead of re-encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughTranscoder;

impl ImageTranscoder for PassthroughTranscoder {
    fn transcode(&self, _bytes: &[u8], _request: &TranscodeRequest) -> Result<Transcoded, TranscodeError> {
        Err(TranscodeError("raster re-encoding is not available".to_string()))
    }
}

/// `image`-crate transcoder: Lanczos3 downscale, JPEG for opaque images,
/// PNG when alpha must be preserved.
#[cfg(feature = "raster")]
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterTranscoder;

#[cfg(feature = "raster")]
impl ImageTranscoder for RasterTranscoder {
    fn transcode(&self, bytes: &[u8], request: &TranscodeRequest) -> Result<Transcoded, TranscodeError> {
        use image::codecs::jpeg::JpegEncoder;
        use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
        use image::imageops::FilterType;
        use image::DynamicImage;

        let source = image::load_from_memory(bytes).map_err(|e| TranscodeError(e.to_string()))?;

        let edge = request.max_dimension.max(1);
        let resized = if source.width() > edge || source.height() > edge {
            source.resize(edge, edge, FilterType::Lanczos3)
        } else {
            source
        };
        let (width, height) = (resized.width(), resized.height());

        let mut out = Vec::new();
        if request.preserve_alpha && resized.color().has_alpha() {
            let encoder = PngEncoder::new_with_quality(&mut out, CompressionType::Best, PngFilter::Adaptive);
            resized
                .write_with_encoder(encoder)
                .map_err(|e| TranscodeError(e.to_string()))?;
            return Ok(Transcoded {
                bytes: out,
                media_type: "image/png".to_string(),
                quality: None,
                width,
                height,
            });
        }

        let quality = request.quality.clamp(1, 100);
        let encoder = JpegEncoder::new_with_quality(&mut out, quality);
        DynamicImage::ImageRgb8(resized.to_rgb8())
            .write_with_encoder(encoder)
            .map_err(|e| TranscodeError(e.to_string()))?;
        Ok(Transcoded {
            bytes: out,
            media_type: "image/jpeg".to_string(),
            quality: Some(quality),
            width,
            height,
        })
    }
}

/// The best transcoder compiled into this build.
#[must_use]
pub fn default_transcoder() -> std::sync::Arc<dyn ImageTranscoder> {
    #[cfg(feature = "raster")]
    {
        std::sync::Arc::new(RasterTranscoder)
    }
    #[cfg(not(feature = "raster"))]
    {
        std::sync::Arc::new(PassthroughTranscoder)
    }
}

/// Media type from magic bytes alone.
#[must_use]
pub fn sniff_magic(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" && matches!(&bytes[8..12], b"avif" | b"avis") {
        return Some("image/avif");
    }
    if bytes.starts_with(&[0x00, 0x00, 0x01, 0x00]) {
        return Some("image/x-icon");
    }
    let head = &bytes[..bytes.len().min(512)];
    let text = String::from_utf8_lossy(head);
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    if trimmed.starts_with("<svg") || (trimmed.starts_with("<?xml") && trimmed.contains("<svg")) {
        return Some("image/svg+xml");
    }
    None
}

/// Media type implied by a locator's extension.
#[must_use]
pub fn media_type_for_extension(locator: &str) -> Option<&'static str> {
    let ext = extension_of(locator)?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "avif" => Some("image/avif"),
        "svg" => Some("image/svg+xml"),
        "ico" => Some("image/x-icon"),
        _ => None,
    }
}

/// Magic bytes first, then the locator's extension.
#[must_use]
pub fn sniff_media_type(bytes: &[u8], locator: &str) -> Option<&'static str> {
    sniff_magic(bytes).or_else(|| media_type_for_extension(locator))
}
