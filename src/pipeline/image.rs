//! Image preprocessing: raw page image → the exact bytes a model call needs.
//!
//! Both transforms are pure functions over bytes. Decoding a full-size page
//! scan is CPU-bound, so the async wrappers run them on the blocking pool.
//! Multi-frame inputs (DocumentCloud serves GIFs) contribute their first
//! frame only.

use crate::error::SyncError;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use tracing::debug;

/// JPEG quality used for extraction images.
pub const EXTRACTION_JPEG_QUALITY: u8 = 95;

fn decode(bytes: &[u8]) -> Result<DynamicImage, SyncError> {
    image::load_from_memory(bytes).map_err(|e| SyncError::ImageDecode {
        detail: e.to_string(),
    })
}

/// Region kept for classification: origin (0, 0), `width / 2` × `height / 6`.
pub fn classification_crop_size(width: u32, height: u32) -> (u32, u32) {
    (width / 2, height / 6)
}

/// Crop the top-left corner of a page and re-encode it as PNG.
///
/// Form titles sit in the upper-left header, so the classifier only sees
/// that region.
pub fn crop_for_classification(bytes: &[u8]) -> Result<Vec<u8>, SyncError> {
    let img = decode(bytes)?;
    let (w, h) = classification_crop_size(img.width(), img.height());
    if w == 0 || h == 0 {
        return Err(SyncError::ImageDecode {
            detail: format!(
                "{}x{} image is too small to crop for classification",
                img.width(),
                img.height()
            ),
        });
    }
    let cropped = img.crop_imm(0, 0, w, h);

    let mut buf = Vec::new();
    cropped
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| SyncError::ImageDecode {
            detail: e.to_string(),
        })?;
    debug!("Cropped {}x{} → {}x{} PNG", img.width(), img.height(), w, h);
    Ok(buf)
}

/// Convert a page to three-channel RGB and re-encode it as JPEG.
pub fn encode_for_extraction(bytes: &[u8]) -> Result<Vec<u8>, SyncError> {
    let rgb = decode(bytes)?.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, EXTRACTION_JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| SyncError::ImageDecode {
            detail: e.to_string(),
        })?;
    debug!("Encoded {}x{} page → {} bytes JPEG", rgb.width(), rgb.height(), buf.len());
    Ok(buf)
}

async fn off_thread(
    bytes: Vec<u8>,
    f: fn(&[u8]) -> Result<Vec<u8>, SyncError>,
) -> Result<Vec<u8>, SyncError> {
    tokio::task::spawn_blocking(move || f(&bytes))
        .await
        .map_err(|e| SyncError::Internal(format!("Image task panicked: {e}")))?
}

/// [`crop_for_classification`] on the blocking pool.
pub async fn classification_image(bytes: Vec<u8>) -> Result<Vec<u8>, SyncError> {
    off_thread(bytes, crop_for_classification).await
}

/// [`encode_for_extraction`] on the blocking pool.
pub async fn extraction_image(bytes: Vec<u8>) -> Result<Vec<u8>, SyncError> {
    off_thread(bytes, encode_for_extraction).await
}
