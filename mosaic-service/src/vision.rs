//! Image normalization.
//!
//! Uploads arrive as raw bytes or as base64 text (optionally a `data:` URL).
//! Whatever the source format and color mode, a successful decode yields an
//! 8-bit RGB image.

use std::io::Cursor;

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use image::{ImageFormat, ImageReader};
use tracing::debug;

use crate::error::ImageError;
use crate::models::{AssetBytes, CanonicalImage, UploadedAsset};

pub mod captioning;

/// Standard alphabet, padding optional
pub(crate) const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode an uploaded image asset into its canonical form
pub fn normalize(asset: &UploadedAsset) -> Result<CanonicalImage, ImageError> {
    match &asset.bytes {
        AssetBytes::Binary(data) => {
            check_media_type(&asset.filename, &asset.media_type)?;
            decode_image(&asset.filename, data)
        }
        AssetBytes::Base64(payload) => {
            if !asset.media_type.is_empty() {
                check_media_type(&asset.filename, &asset.media_type)?;
            }
            let data = decode_base64_payload(&asset.filename, payload)?;
            decode_image(&asset.filename, &data)
        }
    }
}

/// Binary uploads must declare an `image/*` media type. An absent media type
/// is left to content sniffing.
fn check_media_type(filename: &str, media_type: &str) -> Result<(), ImageError> {
    let essence = media_type.split(';').next().unwrap_or_default().trim();
    if essence.is_empty() || essence.to_ascii_lowercase().starts_with("image/") {
        Ok(())
    } else {
        Err(ImageError::UnsupportedMediaType {
            filename: filename.to_string(),
            media_type: media_type.to_string(),
        })
    }
}

/// Decode base64 image text, accepting a `data:<type>;base64,` prefix and
/// embedded whitespace.
pub fn decode_base64_payload(filename: &str, payload: &str) -> Result<Vec<u8>, ImageError> {
    let trimmed = payload.trim();
    let encoded = match trimmed.strip_prefix("data:") {
        Some(rest) => {
            let Some((header, data)) = rest.split_once(',') else {
                return Err(invalid(filename, "malformed data URL"));
            };
            let mut params = header.split(';');
            let media_type = params.next().unwrap_or_default();
            if !params.any(|p| p.eq_ignore_ascii_case("base64")) {
                return Err(invalid(filename, "data URL is not base64-encoded"));
            }
            if !media_type.is_empty() {
                check_media_type(filename, media_type)?;
            }
            data
        }
        None => trimmed,
    };

    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err(invalid(filename, "empty payload"));
    }

    LENIENT_BASE64
        .decode(compact.as_bytes())
        .map_err(|e| invalid(filename, &format!("invalid base64: {}", e)))
}

/// Decode raw image bytes into 8-bit RGB
pub fn decode_image(filename: &str, data: &[u8]) -> Result<CanonicalImage, ImageError> {
    if data.is_empty() {
        return Err(invalid(filename, "empty payload"));
    }

    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| invalid(filename, &e.to_string()))?;
    let Some(format) = reader.format() else {
        return Err(invalid(filename, "unrecognized image format"));
    };

    let decoded = reader
        .decode()
        .map_err(|e| invalid(filename, &e.to_string()))?;

    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(invalid(filename, "image has no pixels"));
    }

    debug!(
        filename = %filename,
        format = ?format,
        color = ?decoded.color(),
        width = decoded.width(),
        height = decoded.height(),
        "Decoded image"
    );

    Ok(CanonicalImage {
        filename: filename.to_string(),
        pixels: decoded.to_rgb8(),
    })
}

/// Re-encode a canonical image as PNG, base64-encoded, for engines and
/// captioners that take images over JSON.
pub fn png_base64(image: &CanonicalImage) -> Result<String, ImageError> {
    let mut buf = Cursor::new(Vec::new());
    image
        .pixels
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| invalid(&image.filename, &format!("failed to encode PNG: {}", e)))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(buf.into_inner()))
}

fn invalid(filename: &str, reason: &str) -> ImageError {
    ImageError::InvalidImage {
        filename: filename.to_string(),
        reason: reason.to_string(),
    }
}
