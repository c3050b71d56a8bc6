//! Image captioning.
//!
//! Captions are produced by an external vision model when one is
//! configured; otherwise every image gets the same placeholder caption.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::CaptioningConfig;
use crate::error::{ImageError, format_error_chain};
use crate::models::CanonicalImage;
use crate::ollama::{OllamaChatMessage, OllamaClient};

use super::png_base64;

#[async_trait]
pub trait ImageCaptioner: Send + Sync {
    /// Describe one image
    async fn caption(&self, image: &CanonicalImage) -> Result<String, ImageError>;

    fn name(&self) -> &str;
}

/// Returns a fixed caption for every image
pub struct PlaceholderCaptioner {
    caption: String,
}

impl PlaceholderCaptioner {
    pub fn new(caption: impl Into<String>) -> Self {
        Self {
            caption: caption.into(),
        }
    }
}

#[async_trait]
impl ImageCaptioner for PlaceholderCaptioner {
    async fn caption(&self, _image: &CanonicalImage) -> Result<String, ImageError> {
        Ok(self.caption.clone())
    }

    fn name(&self) -> &str {
        "placeholder"
    }
}

/// Captions images with an Ollama vision model
pub struct OllamaCaptioner {
    client: Arc<OllamaClient>,
    model: String,
    prompt: String,
}

impl OllamaCaptioner {
    pub fn new(client: Arc<OllamaClient>, model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            prompt: prompt.into(),
        }
    }
}

#[async_trait]
impl ImageCaptioner for OllamaCaptioner {
    async fn caption(&self, image: &CanonicalImage) -> Result<String, ImageError> {
        let encoded = png_base64(image)?;
        let message = OllamaChatMessage::user_with_image(&self.prompt, encoded);

        let caption = self
            .client
            .generate_simple(&self.model, vec![message])
            .await
            .map_err(|e| ImageError::Caption {
                filename: image.filename.clone(),
                message: format_error_chain(&e),
            })?;

        let caption = caption.trim().to_string();
        if caption.is_empty() {
            return Err(ImageError::Caption {
                filename: image.filename.clone(),
                message: "vision model returned an empty caption".to_string(),
            });
        }

        debug!(filename = %image.filename, model = %self.model, "Image captioned");
        Ok(caption)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Pick the captioner the configuration asks for
pub fn from_config(config: &CaptioningConfig, client: Arc<OllamaClient>) -> Arc<dyn ImageCaptioner> {
    let model = config.vision_model.trim();
    if model.is_empty() {
        info!("No vision model configured, using placeholder captions");
        Arc::new(PlaceholderCaptioner::new(config.placeholder_caption.clone()))
    } else {
        info!(model = %model, "Captioning images with vision model");
        Arc::new(OllamaCaptioner::new(client, model, config.prompt.clone()))
    }
}
