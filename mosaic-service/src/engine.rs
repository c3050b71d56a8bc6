//! Generation engine interface.
//!
//! The engine is an external, stateful resource: it renders a conversation
//! with its chat template, turns an image into whatever conditioning input
//! the model takes, and decodes new text while reporting chunks to a sink.
//! Callers never share it directly; see [`crate::service::orchestrator`].

use async_trait::async_trait;

use crate::error::EngineError;
use crate::models::{CanonicalImage, ChatMessage};

pub mod template;

pub use template::ChatTemplate;

/// Image input in the form the engine consumes
#[derive(Debug, Clone)]
pub enum ImageConditioning {
    /// PNG bytes, base64-encoded
    EncodedPng(String),
}

/// Everything the engine needs for one generation call
#[derive(Debug, Clone)]
pub struct EngineInput {
    /// Conversation rendered through the chat template, generation prompt
    /// included
    pub prompt: String,
    pub image: Option<ImageConditioning>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub max_new_tokens: u32,
    pub temperature: f32,
}

/// Completion text only; the prompt is never echoed back
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOutput {
    pub text: String,
    /// Generation stopped at `max_new_tokens`
    pub truncated: bool,
}

/// Receiver of decoded text chunks, in generation order
#[async_trait]
pub trait ChunkSink: Send {
    /// Deliver one chunk. Returns `false` once nobody is listening, at which
    /// point the engine stops decoding.
    async fn send(&mut self, chunk: String) -> bool;
}

#[async_trait]
pub trait GenerationEngine: Send {
    fn model(&self) -> &str;

    fn apply_chat_template(&self, conversation: &[ChatMessage]) -> String;

    fn image_conditioning(&self, image: &CanonicalImage) -> Result<ImageConditioning, EngineError>;

    async fn generate(
        &mut self,
        input: EngineInput,
        params: GenerationParams,
        sink: &mut dyn ChunkSink,
    ) -> Result<EngineOutput, EngineError>;
}
