//! Service configuration.
//!
//! All settings are read once at startup; changing any of them requires a
//! restart because the engine handle is loaded exactly once.

use serde::Deserialize;
use std::time::Duration;

mod loader;

pub use loader::load_config;

/// Complete service configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub captioning: CaptioningConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub streaming: StreamingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Prompt format used when rendering the conversation for the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    #[default]
    Deepseek,
    Chatml,
}

/// Generation engine (Ollama) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_engine_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub template: TemplateKind,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Load the model into memory at startup instead of on first request
    #[serde(default = "default_true")]
    pub preload: bool,

    #[serde(default = "default_keep_alive")]
    pub keep_alive: String,
}

impl EngineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: default_engine_url(),
            model: default_model(),
            template: TemplateKind::default(),
            request_timeout_secs: default_request_timeout_secs(),
            preload: true,
            keep_alive: default_keep_alive(),
        }
    }
}

/// Image captioning configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CaptioningConfig {
    /// Vision model for image captioning (e.g., llava, moondream). Empty means
    /// the fixed placeholder caption is used.
    #[serde(default)]
    pub vision_model: String,

    #[serde(default = "default_placeholder_caption")]
    pub placeholder_caption: String,

    #[serde(default = "default_caption_prompt")]
    pub prompt: String,
}

impl Default for CaptioningConfig {
    fn default() -> Self {
        Self {
            vision_model: String::new(),
            placeholder_caption: default_placeholder_caption(),
            prompt: default_caption_prompt(),
        }
    }
}

/// Defaults and bounds for generation parameters
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_max_new_tokens")]
    pub default_max_new_tokens: u32,

    #[serde(default = "default_max_new_tokens_limit")]
    pub max_new_tokens_limit: u32,

    #[serde(default = "default_temperature")]
    pub default_temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            default_max_new_tokens: default_max_new_tokens(),
            max_new_tokens_limit: default_max_new_tokens_limit(),
            default_temperature: default_temperature(),
        }
    }
}

/// Size limits
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,

    #[serde(default = "default_max_assets")]
    pub max_assets: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_bytes: default_max_request_bytes(),
            max_assets: default_max_assets(),
        }
    }
}

/// Streaming delivery configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StreamingConfig {
    /// Chunks buffered between the engine and a slow reader before the
    /// engine is paused
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

// ==================== Default Value Functions ====================

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_engine_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "deepseek-r1:32b".to_string()
}

fn default_request_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_keep_alive() -> String {
    "30m".to_string()
}

fn default_placeholder_caption() -> String {
    "This is a sample caption.".to_string()
}

fn default_caption_prompt() -> String {
    "Describe this image in one or two sentences. Mention any visible text.".to_string()
}

fn default_max_new_tokens() -> u32 {
    4096
}

fn default_max_new_tokens_limit() -> u32 {
    32768
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_request_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_max_assets() -> usize {
    32
}

fn default_channel_capacity() -> usize {
    1
}
