//! Image encoding: preprocessed bytes → base64 `ImageData` for the VLM API.
//!
//! `detail: "high"` keeps fine print legible on providers that tile images;
//! Form 460 amounts are small type.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use tracing::debug;

pub const PNG_MIME: &str = "image/png";
pub const JPEG_MIME: &str = "image/jpeg";

/// Wrap encoded image bytes for a multimodal chat message.
pub fn image_data(bytes: &[u8], mime_type: &str) -> ImageData {
    let b64 = STANDARD.encode(bytes);
    debug!("Encoded {} image → {} bytes base64", mime_type, b64.len());
    ImageData::new(b64, mime_type).with_detail("high")
}
