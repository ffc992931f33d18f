//! Image encoding: `DynamicImage` → base64 PNG wrapped in [`EncodedPage`].
//!
//! Vision APIs accept images as base64 payloads embedded in the JSON request
//! body. PNG is chosen over JPEG because it is lossless — text crispness
//! matters far more than file size when the model is effectively doing OCR
//! on printed and handwritten digits.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// A page image encoded for the vision request body.
#[derive(Debug, Clone)]
pub struct EncodedPage {
    /// Base64-encoded PNG bytes.
    pub data: String,
    pub mime_type: &'static str,
}

/// Encode a page image as a base64 PNG ready for the vision API.
pub fn encode_page(img: &DynamicImage) -> Result<EncodedPage, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded page image → {} bytes base64", b64.len());

    Ok(EncodedPage {
        data: b64,
        mime_type: "image/png",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let page = encode_page(&img).expect("encode should succeed");
        assert_eq!(page.mime_type, "image/png");
        assert!(!page.data.is_empty());
        // Verify it's valid base64 holding a PNG
        let decoded = STANDARD.decode(&page.data).expect("valid base64");
        assert_eq!(&decoded[1..4], b"PNG");
    }
}
