//! Camera/gallery capture boundary and image compression.
//!
//! The capture provider is an external collaborator (native camera plugin,
//! file picker); the core only sees the trait. User cancellation is detected
//! by message keyword and treated as a silent no-op by callers.

use std::io::Cursor;

use async_trait::async_trait;
use image::{codecs::jpeg::JpegEncoder, GenericImageView};

use crate::error::{Error, Result};

/// Raw capture output handed to the core by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFile {
    /// Original file name, for diagnostics only.
    pub file_name: String,
    /// Raw encoded bytes.
    pub bytes: Vec<u8>,
}

impl CapturedFile {
    /// Convenience constructor.
    #[must_use]
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }
}

/// Keywords that identify a user-cancelled capture in provider errors.
const CANCELLATION_KEYWORDS: &[&str] = &["cancel", "cancelled", "canceled", "dismissed"];

/// Whether a provider error message means the user backed out.
#[must_use]
pub fn is_cancellation(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    CANCELLATION_KEYWORDS
        .iter()
        .any(|keyword| message.contains(keyword))
}

/// Camera/gallery provider boundary.
#[async_trait]
pub trait CaptureProvider: Send + Sync {
    /// Take a single photo with the camera.
    async fn get_photo(&self) -> Result<CapturedFile>;

    /// Pick one or more photos from the gallery.
    async fn pick_images(&self) -> Result<Vec<CapturedFile>>;
}

/// Options for on-device image compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionOptions {
    /// Target upper bound for the encoded output, in bytes.
    pub max_bytes: usize,
    /// Longest allowed edge in pixels.
    pub max_dimension: u32,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            max_bytes: 900 * 1024,
            max_dimension: 1920,
        }
    }
}

/// Image compression boundary. Implementations must never silently grow the
/// payload past `max_bytes`.
#[async_trait]
pub trait ImageCompressor: Send + Sync {
    /// Compress encoded image bytes down to the stated bounds.
    async fn compress(&self, bytes: &[u8], options: CompressionOptions) -> Result<Vec<u8>>;
}

/// Default compressor built on the `image` crate: resize to fit the dimension
/// bound, then step JPEG quality down until the byte bound is met.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardCompressor;

impl StandardCompressor {
    fn compress_sync(bytes: &[u8], options: CompressionOptions) -> Result<Vec<u8>> {
        if bytes.is_empty() {
            return Err(Error::Capture("Refusing to compress empty file".to_string()));
        }

        let source = image::load_from_memory(bytes)
            .map_err(|error| Error::Capture(format!("Unreadable image: {error}")))?;

        let (width, height) = source.dimensions();
        let resized = if width > options.max_dimension || height > options.max_dimension {
            source.thumbnail(options.max_dimension, options.max_dimension)
        } else {
            source
        };

        let rgb = resized.to_rgb8();
        for quality in [85u8, 70, 55, 40, 25] {
            let mut output = Vec::new();
            let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut output), quality);
            rgb.write_with_encoder(encoder)
                .map_err(|error| Error::Capture(format!("JPEG encode failed: {error}")))?;
            if output.len() <= options.max_bytes {
                // Re-encoding a small source can inflate it; keep the original
                // whenever it already fits and is smaller.
                if bytes.len() <= options.max_bytes && bytes.len() < output.len() {
                    return Ok(bytes.to_vec());
                }
                return Ok(output);
            }
        }

        Err(Error::Capture(format!(
            "Could not compress image under {} bytes",
            options.max_bytes
        )))
    }
}

#[async_trait]
impl ImageCompressor for StandardCompressor {
    async fn compress(&self, bytes: &[u8], options: CompressionOptions) -> Result<Vec<u8>> {
        Self::compress_sync(bytes, options)
    }
}
