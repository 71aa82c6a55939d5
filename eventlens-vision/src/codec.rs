//! Image byte codecs: whatever arrives over the wire becomes an RGB pixel grid,
//! and matched images leave again as JPEG.

use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::{codecs::jpeg::JpegEncoder, RgbImage};

use crate::error::{Result, VisionError};

/// Decoded 8-bit RGB image, row-major HxWx3.
pub type Image = RgbImage;

const BASE64_MARKER: &str = "base64,";

/// Decode JPEG/PNG (or any format `image` recognises) into an RGB grid.
pub fn decode(bytes: &[u8]) -> Result<Image> {
    if bytes.is_empty() {
        return Err(VisionError::Decode("empty payload".to_string()));
    }
    let img = image::load_from_memory(bytes).map_err(|e| VisionError::Decode(e.to_string()))?;
    if img.width() == 0 || img.height() == 0 {
        return Err(VisionError::Decode("image has no pixels".to_string()));
    }
    // Grey, RGBA and 16-bit sources all collapse to RGB8 here
    Ok(img.to_rgb8())
}

/// Decode a base64 text payload, tolerating a `data:image/...;base64,` header.
pub fn decode_base64(payload: &str) -> Result<Image> {
    let data = match payload.find(BASE64_MARKER) {
        Some(idx) => &payload[idx + BASE64_MARKER.len()..],
        None => payload,
    };
    let bytes = BASE64
        .decode(data.trim())
        .map_err(|e| VisionError::Decode(format!("invalid base64: {e}")))?;
    decode(&bytes)
}

/// Re-encode an image as JPEG with the given quality (1-100).
pub fn encode_jpeg(img: &Image, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .encode_image(img)
        .map_err(|e| VisionError::Encode(e.to_string()))?;
    Ok(buf.into_inner())
}
