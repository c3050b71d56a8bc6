//! Request-scoped data model.
//!
//! Nothing here outlives a single request: assets are discarded after
//! extraction, prompts are consumed once by the orchestrator and results are
//! never cached.

use std::fmt;

use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Role of a chat message. Unrecognized roles are rejected at ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

/// One turn of the conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Whether an uploaded asset arrived as an image or as a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Image,
    Document,
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetKind::Image => write!(f, "image"),
            AssetKind::Document => write!(f, "document"),
        }
    }
}

/// Raw bytes of an image payload: either a direct binary upload or base64
/// text that still has to be decoded.
#[derive(Clone)]
pub enum AssetBytes {
    Binary(bytes::Bytes),
    Base64(String),
}

impl fmt::Debug for AssetBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetBytes::Binary(b) => write!(f, "Binary({} bytes)", b.len()),
            AssetBytes::Base64(s) => write!(f, "Base64({} chars)", s.len()),
        }
    }
}

/// A single uploaded image or document within one request
#[derive(Debug, Clone)]
pub struct UploadedAsset {
    pub kind: AssetKind,
    pub filename: String,
    pub media_type: String,
    pub bytes: AssetBytes,
}

impl UploadedAsset {
    pub fn image(
        filename: impl Into<String>,
        media_type: impl Into<String>,
        bytes: impl Into<bytes::Bytes>,
    ) -> Self {
        Self {
            kind: AssetKind::Image,
            filename: filename.into(),
            media_type: media_type.into(),
            bytes: AssetBytes::Binary(bytes.into()),
        }
    }

    pub fn image_base64(filename: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            kind: AssetKind::Image,
            filename: filename.into(),
            media_type: String::new(),
            bytes: AssetBytes::Base64(payload.into()),
        }
    }

    pub fn document(
        filename: impl Into<String>,
        media_type: impl Into<String>,
        bytes: impl Into<bytes::Bytes>,
    ) -> Self {
        Self {
            kind: AssetKind::Document,
            filename: filename.into(),
            media_type: media_type.into(),
            bytes: AssetBytes::Binary(bytes.into()),
        }
    }
}

/// Text and embedded images pulled out of one document
#[derive(Debug, Clone, Default)]
pub struct ExtractedContent {
    pub source_filename: String,
    pub text: String,
    pub embedded_images: Vec<bytes::Bytes>,
}

/// A decoded image in the canonical 8-bit RGB representation
#[derive(Clone)]
pub struct CanonicalImage {
    pub filename: String,
    pub pixels: RgbImage,
}

impl CanonicalImage {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

impl fmt::Debug for CanonicalImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanonicalImage")
            .field("filename", &self.filename)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// The single outbound conversation handed to the orchestrator
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub conversation: Vec<ChatMessage>,
    /// At most one image participates in a generation call.
    pub attached_image: Option<CanonicalImage>,
}

/// A validated request ready for submission to the engine
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: AssembledPrompt,
    pub max_new_tokens: u32,
    pub temperature: f32,
}

/// Outcome of one generation call. Never cached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationResult {
    pub text: String,
    pub truncated: bool,
}

/// Per-item failure annotation reported alongside the response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetFailure {
    pub filename: String,
    pub kind: AssetKind,
    pub code: String,
    pub message: String,
}
