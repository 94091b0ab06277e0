use std::io::Cursor;

use base64::Engine;
use image::{DynamicImage, ImageFormat, Luma, imageops};
use qrcode::{EcLevel, QrCode};
use tracing::debug;

use crate::error::CartoonError;

pub const DEFAULT_SIZE: u32 = 300;
/// 分享场景使用更大的尺寸，方便手机扫码。
pub const SHARE_SIZE: u32 = 400;

/// Encodes `content` as a QR bitmap and returns it as a
/// `data:image/png;base64,` URI.
///
/// High error correction, rendered at least `width` x `height` and then
/// scaled to exactly that size.
pub fn encode_data_uri(content: &str, width: u32, height: u32) -> Result<String, CartoonError> {
    debug!(content_len = content.len(), width, height, "generating QR code");

    let code = QrCode::with_error_correction_level(content.as_bytes(), EcLevel::H)
        .map_err(|err| CartoonError::Encoding(err.to_string()))?;
    let rendered = code
        .render::<Luma<u8>>()
        .quiet_zone(true)
        .min_dimensions(width, height)
        .build();
    // min_dimensions rounds up to a whole module count; scale to the exact
    // requested pixel size.
    let exact = imageops::resize(&rendered, width, height, imageops::FilterType::Nearest);

    let mut png = Vec::new();
    DynamicImage::ImageLuma8(exact)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|err| CartoonError::Encoding(err.to_string()))?;

    let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
    Ok(format!("data:image/png;base64,{encoded}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_data_uri(data_uri: &str) -> Vec<u8> {
        let encoded = data_uri
            .strip_prefix("data:image/png;base64,")
            .expect("missing data URI prefix");
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .expect("invalid base64 payload")
    }

    #[test]
    fn encodes_exact_pixel_dimensions() {
        let data_uri = encode_data_uri("https://example.com/r", DEFAULT_SIZE, DEFAULT_SIZE).unwrap();
        let png = decode_data_uri(&data_uri);
        let img = image::load_from_memory(&png).unwrap();
        assert_eq!(img.width(), DEFAULT_SIZE);
        assert_eq!(img.height(), DEFAULT_SIZE);
    }

    #[test]
    fn roundtrip_through_a_standard_reader() {
        let url = "https://bucket.example.com/cartoon/abc-123.jpeg?X-Amz-Signature=deadbeef%2F1";
        let data_uri = encode_data_uri(url, SHARE_SIZE, SHARE_SIZE).unwrap();
        let png = decode_data_uri(&data_uri);

        let gray = image::load_from_memory(&png).unwrap().to_luma8();
        let (width, height) = gray.dimensions();
        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            width as usize,
            height as usize,
            |x, y| gray.get_pixel(x as u32, y as u32)[0],
        );
        let grids = prepared.detect_grids();
        assert_eq!(grids.len(), 1);
        let (_meta, content) = grids[0].decode().unwrap();
        assert_eq!(content, url);
    }
}
