use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    Extraction(#[from] ExtractionError),

    #[error("{0}")]
    Image(#[from] ImageError),

    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("No input provided: messages, images and documents are all empty")]
    EmptyInput,

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    /// An asset failure promoted to the request error, with every per-asset
    /// failure of the request attached.
    #[error("{error}")]
    AssetsFailed {
        error: Box<ServiceError>,
        failures: Vec<crate::models::AssetFailure>,
    },
}

/// Document extraction errors
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Unsupported document format for {filename} (media type {media_type})")]
    UnsupportedFormat { filename: String, media_type: String },

    #[error("Failed to extract {filename}: {source}")]
    Decode {
        filename: String,
        #[source]
        source: DecodeError,
    },
}

/// Low-level failures while decoding an office container
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("corrupt archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("missing part {part}")]
    MissingPart { part: String },

    #[error("{message}")]
    Malformed { message: String },

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<quick_xml::events::attributes::AttrError> for DecodeError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        DecodeError::Xml(quick_xml::Error::from(e))
    }
}

/// Image upload and captioning errors
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Unsupported image type for {filename}: {media_type}")]
    UnsupportedMediaType { filename: String, media_type: String },

    #[error("Invalid image {filename}: {reason}")]
    InvalidImage { filename: String, reason: String },

    #[error("Captioning failed for {filename}: {message}")]
    Caption { filename: String, message: String },
}

/// Generation engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine failed to load model {model}: {message}")]
    Load { model: String, message: String },

    #[error("Connection failed to engine at {url}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Generation failed (status {status}): {message}")]
    Generation { status: u16, message: String },

    #[error("Engine failure: {message}")]
    Failure { message: String },

    #[error("Invalid response from engine")]
    InvalidResponse {
        #[source]
        source: serde_json::Error,
    },
}

/// API error response (matches Axum's built-in JsonRejection format)
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Extraction(ExtractionError::UnsupportedFormat { .. })
            | ServiceError::Image(ImageError::UnsupportedMediaType { .. })
            | ServiceError::Image(ImageError::InvalidImage { .. })
            | ServiceError::EmptyInput
            | ServiceError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ServiceError::AssetsFailed { error, .. } => error.status_code(),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::Extraction(ExtractionError::UnsupportedFormat { .. }) => {
                "unsupported_format"
            }
            ServiceError::Extraction(ExtractionError::Decode { .. }) => "extraction_error",
            ServiceError::Image(ImageError::UnsupportedMediaType { .. }) => {
                "unsupported_media_type"
            }
            ServiceError::Image(ImageError::InvalidImage { .. }) => "invalid_image",
            ServiceError::Image(ImageError::Caption { .. }) => "caption_failed",
            ServiceError::Engine(_) => "engine_failure",
            ServiceError::EmptyInput => "empty_input",
            ServiceError::InvalidRequest { .. } => "validation_error",
            ServiceError::Config { .. } => "config_error",
            ServiceError::Internal { .. } => "internal_error",
            ServiceError::AssetsFailed { error, .. } => error.error_code(),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            ServiceError::AssetsFailed { failures, .. } => {
                serde_json::to_value(failures).ok()
            }
            _ => None,
        }
    }

    pub fn to_response_body(&self) -> ErrorResponse {
        ErrorResponse {
            message: self.to_string(),
            code: Some(self.error_code().to_string()),
            details: self.details(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self.to_response_body())).into_response()
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Format an error and its full source chain on one line
pub fn format_error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
