//! Inbound request parsing for the generation endpoints.
//!
//! Both `multipart/form-data` and `application/json` bodies are accepted and
//! reduced to the same [`GenerationSubmission`]. Only the request shape is
//! checked here; asset contents are looked at later, per asset.

use axum::{
    Json,
    extract::{FromRequest, Multipart, Request},
    http::header,
};
use serde::Deserialize;
use tracing::debug;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{AssetBytes, AssetKind, ChatMessage, UploadedAsset};
use crate::service::GenerationSubmission;

/// A parsed generation request and whether the caller asked for a stream
#[derive(Debug)]
pub struct ParsedRequest {
    pub submission: GenerationSubmission,
    pub stream: bool,
}

/// JSON request body
#[derive(Debug, Deserialize)]
pub struct GenerationBody {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub images: Vec<EncodedFile>,
    #[serde(default)]
    pub documents: Vec<EncodedFile>,
    pub max_new_tokens: Option<u32>,
    pub temperature: Option<f32>,
    #[serde(default)]
    pub stream: bool,
}

/// A base64-encoded file inside a JSON body
#[derive(Debug, Deserialize)]
pub struct EncodedFile {
    pub filename: String,
    #[serde(default)]
    pub media_type: String,
    pub data: String,
}

impl EncodedFile {
    fn into_asset(self, kind: AssetKind) -> UploadedAsset {
        UploadedAsset {
            kind,
            filename: self.filename,
            media_type: self.media_type,
            bytes: AssetBytes::Base64(self.data),
        }
    }
}

/// Parse a request body according to its content type
pub async fn parse(request: Request) -> ServiceResult<ParsedRequest> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| invalid(format!("Invalid multipart body: {}", e.body_text())))?;
        from_multipart(multipart).await
    } else {
        let Json(body) = Json::<GenerationBody>::from_request(request, &())
            .await
            .map_err(|e| invalid(e.body_text()))?;
        Ok(from_json(body))
    }
}

pub fn from_json(body: GenerationBody) -> ParsedRequest {
    let mut assets = Vec::with_capacity(body.images.len() + body.documents.len());
    assets.extend(body.images.into_iter().map(|f| f.into_asset(AssetKind::Image)));
    assets.extend(body.documents.into_iter().map(|f| f.into_asset(AssetKind::Document)));

    ParsedRequest {
        submission: GenerationSubmission {
            messages: body.messages,
            assets,
            max_new_tokens: body.max_new_tokens,
            temperature: body.temperature,
        },
        stream: body.stream,
    }
}

/// Read every multipart field. Assets keep their field order, which is the
/// upload order reported back in failure annotations.
pub async fn from_multipart(mut multipart: Multipart) -> ServiceResult<ParsedRequest> {
    let mut submission = GenerationSubmission::default();
    let mut stream = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| invalid(format!("Invalid multipart body: {}", e.body_text())))?
    {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "messages" => {
                let text = field.text().await.map_err(|e| invalid(e.body_text()))?;
                submission.messages = parse_messages(&text)?;
            }
            "max_new_tokens" => {
                let text = field.text().await.map_err(|e| invalid(e.body_text()))?;
                submission.max_new_tokens = parse_optional(&name, &text)?;
            }
            "temperature" => {
                let text = field.text().await.map_err(|e| invalid(e.body_text()))?;
                submission.temperature = parse_optional(&name, &text)?;
            }
            "stream" => {
                let text = field.text().await.map_err(|e| invalid(e.body_text()))?;
                stream = parse_flag(&text)?;
            }
            "images" => {
                let filename = field.file_name().unwrap_or("image").to_string();
                let media_type = field.content_type().unwrap_or("").to_string();
                let data = field.bytes().await.map_err(|e| invalid(e.body_text()))?;
                debug!(filename = %filename, bytes = data.len(), "Image upload received");
                submission
                    .assets
                    .push(UploadedAsset::image(filename, media_type, data));
            }
            "image_base64" => {
                let index = submission.assets.len() + 1;
                let text = field.text().await.map_err(|e| invalid(e.body_text()))?;
                submission
                    .assets
                    .push(UploadedAsset::image_base64(format!("image_base64_{}", index), text));
            }
            "office_files" | "documents" | "file" => {
                let filename = field.file_name().unwrap_or("document").to_string();
                let media_type = field.content_type().unwrap_or("").to_string();
                let data = field.bytes().await.map_err(|e| invalid(e.body_text()))?;
                debug!(filename = %filename, bytes = data.len(), "Document upload received");
                submission
                    .assets
                    .push(UploadedAsset::document(filename, media_type, data));
            }
            other => debug!(field = %other, "Ignoring unknown form field"),
        }
    }

    Ok(ParsedRequest { submission, stream })
}

/// Chat history arrives as JSON text inside a form field. A blank field
/// means no messages.
pub fn parse_messages(text: &str) -> ServiceResult<Vec<ChatMessage>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(text).map_err(|e| invalid(format!("Malformed messages: {}", e)))
}

fn parse_optional<T: std::str::FromStr>(field: &str, text: &str) -> ServiceResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    text.parse()
        .map(Some)
        .map_err(|e| invalid(format!("Invalid {}: {}", field, e)))
}

fn parse_flag(text: &str) -> ServiceResult<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        other => Err(invalid(format!("Invalid stream flag: {}", other))),
    }
}

fn invalid(message: impl Into<String>) -> ServiceError {
    ServiceError::InvalidRequest {
        message: message.into(),
    }
}
