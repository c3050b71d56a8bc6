//! Document extraction for office formats.
//!
//! Each supported format is an Office Open XML package. The decoders turn a
//! raw upload into plain text plus the images embedded in it, in document
//! order.

use std::path::Path;

use tracing::{debug, info};

use crate::error::{DecodeError, ExtractionError};
use crate::models::ExtractedContent;

pub mod docx;
mod ooxml;
pub mod pptx;
pub mod xlsx;

#[cfg(test)]
pub(crate) mod fixtures;

pub const DOCX_MEDIA_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const XLSX_MEDIA_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const PPTX_MEDIA_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";

/// Office formats the extractor understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    WordProcessing,
    Spreadsheet,
    Presentation,
}

impl DocumentFormat {
    /// Detect the format from the declared media type, then the filename
    /// extension. Generic media types such as `application/octet-stream`
    /// defer to the extension.
    pub fn detect(filename: &str, media_type: &str) -> Option<Self> {
        let essence = media_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            DOCX_MEDIA_TYPE => return Some(DocumentFormat::WordProcessing),
            XLSX_MEDIA_TYPE => return Some(DocumentFormat::Spreadsheet),
            PPTX_MEDIA_TYPE => return Some(DocumentFormat::Presentation),
            _ => {}
        }

        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())?;

        match extension.as_str() {
            "docx" => Some(DocumentFormat::WordProcessing),
            "xlsx" => Some(DocumentFormat::Spreadsheet),
            "pptx" => Some(DocumentFormat::Presentation),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::WordProcessing => "docx",
            DocumentFormat::Spreadsheet => "xlsx",
            DocumentFormat::Presentation => "pptx",
        }
    }
}

/// Text and image blobs produced by a format decoder
#[derive(Debug, Default)]
pub struct Decoded {
    pub text: String,
    pub images: Vec<bytes::Bytes>,
}

/// Extract text and embedded images from one uploaded document.
///
/// Unknown formats fail with [`ExtractionError::UnsupportedFormat`] before
/// any bytes are inspected; decoder failures are wrapped with the filename.
pub fn extract_document(
    filename: &str,
    media_type: &str,
    data: &[u8],
) -> Result<ExtractedContent, ExtractionError> {
    let format = DocumentFormat::detect(filename, media_type).ok_or_else(|| {
        ExtractionError::UnsupportedFormat {
            filename: filename.to_string(),
            media_type: media_type.to_string(),
        }
    })?;

    debug!(filename = %filename, format = format.as_str(), bytes = data.len(), "Extracting document");

    let decoded = decode(format, data).map_err(|source| ExtractionError::Decode {
        filename: filename.to_string(),
        source,
    })?;

    info!(
        filename = %filename,
        format = format.as_str(),
        chars = decoded.text.chars().count(),
        images = decoded.images.len(),
        "Document extracted"
    );

    Ok(ExtractedContent {
        source_filename: filename.to_string(),
        text: decoded.text,
        embedded_images: decoded.images,
    })
}

fn decode(format: DocumentFormat, data: &[u8]) -> Result<Decoded, DecodeError> {
    match format {
        DocumentFormat::WordProcessing => docx::decode(data),
        DocumentFormat::Spreadsheet => xlsx::decode(data),
        DocumentFormat::Presentation => pptx::decode(data),
    }
}
