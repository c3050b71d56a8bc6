use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::engine::{
    ChatTemplate, ChunkSink, EngineInput, EngineOutput, GenerationEngine, GenerationParams,
    ImageConditioning,
};
use crate::error::EngineError;
use crate::models::{CanonicalImage, ChatMessage};
use crate::vision::png_base64;

/// Ollama API client
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    /// Create a new Ollama client
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| EngineError::Connection {
                url: config.base_url.clone(),
                source: e,
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Confirm the model exists on the server
    pub async fn show_model(&self, model: &str) -> Result<ShowResponse, EngineError> {
        let url = format!("{}/api/show", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "model": model }))
            .send()
            .await
            .map_err(|e| EngineError::Connection {
                url: url.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(EngineError::Load {
                model: model.to_string(),
                message: format!("status {}: {}", status, message.trim()),
            });
        }

        response
            .json()
            .await
            .map_err(|e| EngineError::InvalidResponse {
                source: serde_json::Error::io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    e.to_string(),
                )),
            })
    }

    /// Load the model into memory without generating anything
    pub async fn preload(&self, model: &str, keep_alive: &str) -> Result<(), EngineError> {
        let url = format!("{}/api/generate", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "model": model, "keep_alive": keep_alive }))
            .send()
            .await
            .map_err(|e| EngineError::Connection {
                url: url.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(EngineError::Load {
                model: model.to_string(),
                message: format!("preload failed with status {}: {}", status, message.trim()),
            });
        }
        Ok(())
    }

    /// Generate a non-streaming response (for simple tasks like image captioning)
    pub async fn generate_simple(
        &self,
        model: &str,
        messages: Vec<OllamaChatMessage>,
    ) -> Result<String, EngineError> {
        let url = format!("{}/api/chat", self.base_url);

        let request = OllamaChatRequest {
            model: model.to_string(),
            messages,
            stream: false,
            options: Some(OllamaOptions {
                temperature: Some(0.3),
                num_predict: None,
            }),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::Connection {
                url: url.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(EngineError::Generation { status, message });
        }

        let chat_response: OllamaChatResponse =
            response
                .json()
                .await
                .map_err(|e| EngineError::InvalidResponse {
                    source: serde_json::Error::io(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        e.to_string(),
                    )),
                })?;

        Ok(chat_response.message.content)
    }

    /// Start a streaming raw-prompt generation and return the NDJSON response
    async fn generate_stream(
        &self,
        request: &OllamaGenerateRequest,
    ) -> Result<reqwest::Response, EngineError> {
        let url = format!("{}/api/generate", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| EngineError::Connection {
                url: url.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(EngineError::Generation { status, message });
        }

        Ok(response)
    }
}

/// Generation engine backed by a model served by Ollama
pub struct OllamaEngine {
    client: OllamaClient,
    model: String,
    keep_alive: String,
    template: ChatTemplate,
}

impl OllamaEngine {
    /// Verify the model is available and, if configured, load it into
    /// memory. Failure here means the service cannot serve anything.
    pub async fn load(config: &EngineConfig) -> Result<Self, EngineError> {
        let client = OllamaClient::new(config)?;

        let show = client
            .show_model(&config.model)
            .await
            .map_err(|e| match e {
                EngineError::Connection { url, source } => EngineError::Load {
                    model: config.model.clone(),
                    message: format!("engine unreachable at {}: {}", url, source),
                },
                other => other,
            })?;
        info!(
            model = %config.model,
            family = show.details.family.as_deref().unwrap_or("unknown"),
            parameters = show.details.parameter_size.as_deref().unwrap_or("unknown"),
            quantization = show.details.quantization_level.as_deref().unwrap_or("unknown"),
            "Engine model found"
        );

        if config.preload {
            info!(model = %config.model, keep_alive = %config.keep_alive, "Preloading model");
            client
                .preload(&config.model, &config.keep_alive)
                .await
                .map_err(|e| EngineError::Load {
                    model: config.model.clone(),
                    message: e.to_string(),
                })?;
        }

        Ok(Self {
            client,
            model: config.model.clone(),
            keep_alive: config.keep_alive.clone(),
            template: ChatTemplate::new(config.template),
        })
    }
}

#[async_trait]
impl GenerationEngine for OllamaEngine {
    fn model(&self) -> &str {
        &self.model
    }

    fn apply_chat_template(&self, conversation: &[ChatMessage]) -> String {
        self.template.render(conversation)
    }

    fn image_conditioning(&self, image: &CanonicalImage) -> Result<ImageConditioning, EngineError> {
        png_base64(image)
            .map(ImageConditioning::EncodedPng)
            .map_err(|e| EngineError::Failure {
                message: e.to_string(),
            })
    }

    async fn generate(
        &mut self,
        input: EngineInput,
        params: GenerationParams,
        sink: &mut dyn ChunkSink,
    ) -> Result<EngineOutput, EngineError> {
        let images = input
            .image
            .map(|image| match image {
                ImageConditioning::EncodedPng(data) => vec![data],
            });

        let request = OllamaGenerateRequest {
            model: self.model.clone(),
            prompt: input.prompt,
            raw: true,
            stream: true,
            images,
            keep_alive: self.keep_alive.clone(),
            options: OllamaOptions {
                temperature: Some(params.temperature),
                num_predict: Some(params.max_new_tokens),
            },
        };

        let response = self.client.generate_stream(&request).await?;
        let mut stream = response.bytes_stream();
        let mut decoder = NdjsonDecoder::default();
        let mut text = String::new();
        let mut truncated = false;
        let mut completed = false;
        let mut abandoned = false;

        'outer: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| EngineError::Connection {
                url: self.client.base_url().to_string(),
                source: e,
            })?;

            for line in decoder.push(&chunk) {
                let event: GenerateStreamLine =
                    serde_json::from_slice(&line).map_err(|e| EngineError::InvalidResponse { source: e })?;

                if let Some(error) = event.error {
                    return Err(EngineError::Failure { message: error });
                }

                if !event.response.is_empty() {
                    text.push_str(&event.response);
                    if !sink.send(event.response).await {
                        info!(model = %self.model, "Consumer went away, stopping generation");
                        abandoned = true;
                        break 'outer;
                    }
                }

                if event.done {
                    completed = true;
                    truncated = event.done_reason.as_deref() == Some("length");
                    debug!(
                        model = %self.model,
                        eval_count = event.eval_count.unwrap_or_default(),
                        done_reason = event.done_reason.as_deref().unwrap_or(""),
                        "Generation stream finished"
                    );
                    break 'outer;
                }
            }
        }

        if let Some(rest) = decoder.finish() {
            warn!(model = %self.model, bytes = rest.len(), "Discarding incomplete trailing line from engine");
        }

        if !completed && !abandoned {
            return Err(EngineError::Failure {
                message: format!(
                    "engine stream ended before completion after {} characters",
                    text.chars().count()
                ),
            });
        }

        Ok(EngineOutput { text, truncated })
    }
}

/// Splits a byte stream into newline-delimited lines. Network chunks do not
/// respect line (or UTF-8) boundaries, so partial lines are carried over.
#[derive(Default)]
struct NdjsonDecoder {
    pending: Vec<u8>,
}

impl NdjsonDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if !line.iter().all(u8::is_ascii_whitespace) {
                lines.push(line);
            }
        }
        lines
    }

    /// Leftover bytes that never got a terminating newline
    fn finish(self) -> Option<Vec<u8>> {
        if self.pending.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            Some(self.pending)
        }
    }
}

/// Chat message in Ollama's wire format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaChatMessage {
    pub role: String,
    pub content: String,
    /// Base64-encoded images for vision models
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

impl OllamaChatMessage {
    /// Create a user message with an image for vision models
    pub fn user_with_image(content: impl Into<String>, image_base64: String) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            images: Some(vec![image_base64]),
        }
    }
}

// Internal Ollama API types

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest {
    model: String,
    prompt: String,
    /// The prompt is already templated
    raw: bool,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
    keep_alive: String,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct GenerateStreamLine {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    eval_count: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ShowResponse {
    #[serde(default)]
    pub details: ModelDetails,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelDetails {
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub parameter_size: Option<String>,
    #[serde(default)]
    pub quantization_level: Option<String>,
}
