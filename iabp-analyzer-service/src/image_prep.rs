//! Upload validation and image preparation for the vision model.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::{DynamicImage, ImageFormat, codecs::jpeg::JpegEncoder, imageops::FilterType};
use tracing::{debug, info};

use crate::error::AnalysisError;

/// Longest edge sent to the model.
pub const MAX_DIMENSION: u32 = 1568;
/// Binary ceiling so the base64 payload stays under the provider's 5 MB image limit.
pub const MAX_ENCODED_BYTES: usize = 3_879_731;
pub const JPEG_QUALITY_LADDER: [u8; 4] = [85, 70, 50, 30];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFormat {
    Png,
    Jpeg,
}

impl UploadFormat {
    pub fn media_type(&self) -> &'static str {
        match self {
            UploadFormat::Png => "image/png",
            UploadFormat::Jpeg => "image/jpeg",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub base64_data: String,
    pub media_type: &'static str,
    pub encoded_bytes: usize,
    pub quality: u8,
    pub width: u32,
    pub height: u32,
}

impl PreparedImage {
    pub fn payload_mb(&self) -> f64 {
        self.base64_data.len() as f64 / (1024.0 * 1024.0)
    }
}

/// Check size and format of an upload before anything else touches it.
pub fn validate_upload(bytes: &[u8], max_bytes: usize) -> Result<UploadFormat, AnalysisError> {
    if bytes.len() > max_bytes {
        return Err(AnalysisError::ImageTooLarge {
            size: bytes.len(),
            limit: max_bytes,
        });
    }
    if bytes.is_empty() {
        return Err(AnalysisError::UnsupportedImage("empty upload".to_string()));
    }

    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => Ok(UploadFormat::Png),
        Ok(ImageFormat::Jpeg) => Ok(UploadFormat::Jpeg),
        Ok(other) => Err(AnalysisError::UnsupportedImage(format!("{:?}", other))),
        Err(_) => Err(AnalysisError::UnsupportedImage("unrecognized data".to_string())),
    }
}

pub fn prepare_for_model(bytes: &[u8]) -> Result<PreparedImage, AnalysisError> {
    prepare_with_limit(bytes, MAX_ENCODED_BYTES)
}

/// Decode, flatten to RGB, shrink to fit `MAX_DIMENSION` and re-encode as JPEG,
/// stepping down the quality ladder until the result fits `max_encoded_bytes`.
pub fn prepare_with_limit(
    bytes: &[u8],
    max_encoded_bytes: usize,
) -> Result<PreparedImage, AnalysisError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| AnalysisError::UnsupportedImage(e.to_string()))?;

    let mut rgb = DynamicImage::ImageRgb8(decoded.to_rgb8());
    if rgb.width() > MAX_DIMENSION || rgb.height() > MAX_DIMENSION {
        rgb = rgb.resize(MAX_DIMENSION, MAX_DIMENSION, FilterType::Lanczos3);
        debug!("Downscaled image to {}x{}", rgb.width(), rgb.height());
    }
    let rgb = rgb.to_rgb8();

    for quality in JPEG_QUALITY_LADDER {
        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, quality)
            .encode_image(&rgb)
            .map_err(|e| AnalysisError::UnsupportedImage(format!("Failed to encode image: {}", e)))?;

        if buffer.len() <= max_encoded_bytes {
            info!(
                "Prepared image {}x{} at quality {} ({} bytes)",
                rgb.width(),
                rgb.height(),
                quality,
                buffer.len()
            );
            return Ok(PreparedImage {
                base64_data: STANDARD.encode(&buffer),
                media_type: UploadFormat::Jpeg.media_type(),
                encoded_bytes: buffer.len(),
                quality,
                width: rgb.width(),
                height: rgb.height(),
            });
        }
        debug!("Quality {} gave {} bytes, stepping down", quality, buffer.len());
    }

    Err(AnalysisError::ImageNotCompressible)
}
