//! Image decode/validate/resize, the HTTP ingress's job before a payload
//! ever reaches the scheduler core.

use embedserve_common::error::{EmbedServeError, Result};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use serde_json::json;

const MAX_DIMENSION: u32 = 1024;

pub fn decode_image(raw: &[u8]) -> Result<DynamicImage> {
    if raw.is_empty() {
        return Err(EmbedServeError::invalid_image("empty image data"));
    }
    let img = image::load_from_memory(raw)
        .map_err(|e| EmbedServeError::invalid_image(format!("invalid image format: {e}")))?;

    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(EmbedServeError::invalid_image(format!(
            "invalid image dimensions: {width}x{height}"
        )));
    }

    Ok(DynamicImage::ImageRgb8(img.to_rgb8()))
}

pub fn validate_image_size(img: &DynamicImage, max_size_mb: f64) -> Result<()> {
    let (width, height) = img.dimensions();
    let channels = 3u64;
    let estimated_bytes = width as u64 * height as u64 * channels;
    let estimated_mb = estimated_bytes as f64 / (1024.0 * 1024.0);
    if estimated_mb > max_size_mb {
        return Err(EmbedServeError::invalid_image(format!(
            "image too large: {estimated_mb:.2}MB (max: {max_size_mb}MB)"
        )));
    }
    Ok(())
}

pub fn image_info(img: &DynamicImage) -> serde_json::Value {
    let (width, height) = img.dimensions();
    json!({
        "width": width,
        "height": height,
        "channels": 3,
    })
}

/// Resize down to fit within `MAX_DIMENSION` on either side, preserving
/// aspect ratio. A no-op if the image is already small enough.
pub fn resize_if_needed(img: DynamicImage) -> DynamicImage {
    let (width, height) = img.dimensions();
    if width <= MAX_DIMENSION && height <= MAX_DIMENSION {
        return img;
    }
    let ratio = (MAX_DIMENSION as f64 / width as f64).min(MAX_DIMENSION as f64 / height as f64);
    let new_width = (width as f64 * ratio) as u32;
    let new_height = (height as f64 * ratio) as u32;
    img.resize_exact(new_width.max(1), new_height.max(1), FilterType::Lanczos3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_payload() {
        let err = decode_image(&[]).unwrap_err();
        assert_eq!(err.error_type(), "invalid_image");
    }

    #[test]
    fn rejects_garbage_bytes() {
        let err = decode_image(b"not an image").unwrap_err();
        assert_eq!(err.error_type(), "invalid_image");
    }

    #[test]
    fn resize_preserves_aspect_ratio() {
        let img = DynamicImage::new_rgb8(2048, 1024);
        let resized = resize_if_needed(img);
        let (w, h) = resized.dimensions();
        assert_eq!(w, 1024);
        assert_eq!(h, 512);
    }

    #[test]
    fn small_image_untouched() {
        let img = DynamicImage::new_rgb8(100, 50);
        let resized = resize_if_needed(img);
        assert_eq!(resized.dimensions(), (100, 50));
    }
}
