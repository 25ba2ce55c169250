//! Image encoding for the two places images leave the process as text:
//! vision requests and data URIs embedded in generated markup.
//!
//! PNG everywhere. It is lossless, and JPEG artefacts around glyph edges
//! measurably hurt text detection.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// PNG-encode an image into memory.
pub fn png_bytes(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Encode a slide image as a base64 PNG attachment for the vision API.
///
/// `detail: "high"` keeps the full tile budget on GPT-4-class models; with
/// the single low-detail tile small captions are lost.
pub fn encode_for_vision(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let b64 = STANDARD.encode(png_bytes(img)?);
    debug!("Encoded image → {} bytes base64", b64.len());
    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// `data:` URI for already-encoded image bytes.
pub fn data_uri(bytes: &[u8], mime: &str) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}
