//! Annotation payload handling.
//!
//! Drawings are stored as a DEFLATE-compressed JSON payload with a hard size
//! cap. Overflow is an error surfaced to the user; the save is rejected
//! rather than truncated.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::error::{Error, Result};

/// Hard cap for the compressed drawing payload, in bytes.
pub const MAX_COMPRESSED_DRAWING_BYTES: usize = 64 * 1024;

/// Result of an annotation editor session. The editor itself is an external
/// modal; the core owns persistence of whatever it returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationOutcome {
    /// User saved: re-rendered image bytes, drawing data, updated caption.
    Saved {
        blob: Vec<u8>,
        annotation_data: serde_json::Value,
        caption: String,
    },
    /// User backed out; nothing to persist.
    Cancelled,
}

/// Compress drawing data for storage, enforcing the hard size cap.
pub fn compress_drawings(annotation_data: &serde_json::Value) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(annotation_data)?;
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;

    if compressed.len() > MAX_COMPRESSED_DRAWING_BYTES {
        return Err(Error::AnnotationTooLarge {
            size: compressed.len(),
            limit: MAX_COMPRESSED_DRAWING_BYTES,
        });
    }
    Ok(compressed)
}

/// Decompress a stored drawing payload.
pub fn decompress_drawings(compressed: &[u8]) -> Result<serde_json::Value> {
    let mut decoder = DeflateDecoder::new(compressed);
    let mut json = Vec::new();
    decoder.read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trip_preserves_data() {
        let data = json!({
            "strokes": [
                {"tool": "arrow", "points": [[10, 20], [110, 220]], "color": "#ff0000"},
                {"tool": "circle", "center": [50, 50], "radius": 12},
            ],
            "version": 2,
        });
        let compressed = compress_drawings(&data).unwrap();
        assert!(compressed.len() <= MAX_COMPRESSED_DRAWING_BYTES);
        assert_eq!(decompress_drawings(&compressed).unwrap(), data);
    }

    #[test]
    fn oversized_payload_is_a_hard_error() {
        // Random-ish digits compress poorly enough to blow the 64KB cap.
        let noise: Vec<u64> = (0..200_000u64).map(|i| i.wrapping_mul(2_654_435_761)).collect();
        let data = json!({ "strokes": noise });

        let result = compress_drawings(&data);
        match result {
            Err(Error::AnnotationTooLarge { size, limit }) => {
                assert!(size > limit);
                assert_eq!(limit, MAX_COMPRESSED_DRAWING_BYTES);
            }
            other => panic!("expected AnnotationTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn decompress_rejects_garbage() {
        assert!(decompress_drawings(b"definitely not deflate").is_err());
    }
}
