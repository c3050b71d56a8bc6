//! Exclusive access to the generation engine.
//!
//! The engine handle lives behind an async mutex. Tokio's mutex queues
//! waiters in arrival order, so overlapping requests are served FIFO, and
//! the guard is dropped on every exit path (success, engine error, or the
//! caller's future being dropped).

use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::engine::{ChunkSink, EngineInput, GenerationEngine, GenerationParams};
use crate::error::EngineError;
use crate::models::{GenerationRequest, GenerationResult};

pub struct Orchestrator {
    engine: Mutex<Box<dyn GenerationEngine>>,
    model: String,
}

impl Orchestrator {
    pub fn new(engine: Box<dyn GenerationEngine>) -> Self {
        let model = engine.model().to_string();
        Self {
            engine: Mutex::new(engine),
            model,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Whether a generation currently holds the engine
    pub fn is_busy(&self) -> bool {
        self.engine.try_lock().is_err()
    }

    /// Run one generation inside the engine's critical section, forwarding
    /// chunks to `sink` as they are decoded.
    pub async fn generate(
        &self,
        request: GenerationRequest,
        sink: &mut dyn ChunkSink,
    ) -> Result<GenerationResult, EngineError> {
        let waited = Instant::now();
        debug!(model = %self.model, "Waiting for engine");
        let mut engine = self.engine.lock().await;
        let wait = waited.elapsed();
        metrics::histogram!("mosaic_engine_wait_seconds").record(wait.as_secs_f64());
        debug!(model = %self.model, wait_ms = wait.as_millis() as u64, "Engine acquired");

        let started = Instant::now();
        let result = run(&mut **engine, request, sink).await;
        let elapsed = started.elapsed();
        drop(engine);
        debug!(model = %self.model, "Engine released");

        metrics::histogram!("mosaic_engine_generation_seconds").record(elapsed.as_secs_f64());
        match &result {
            Ok(output) => info!(
                model = %self.model,
                chars = output.text.chars().count(),
                truncated = output.truncated,
                elapsed_ms = elapsed.as_millis() as u64,
                "Generation finished"
            ),
            Err(e) => {
                metrics::counter!("mosaic_engine_failures_total").increment(1);
                warn!(model = %self.model, error = %e, "Generation failed");
            }
        }
        result
    }
}

async fn run(
    engine: &mut dyn GenerationEngine,
    request: GenerationRequest,
    sink: &mut dyn ChunkSink,
) -> Result<GenerationResult, EngineError> {
    let prompt = engine.apply_chat_template(&request.prompt.conversation);
    let image = match &request.prompt.attached_image {
        Some(image) => Some(engine.image_conditioning(image)?),
        None => None,
    };

    let params = GenerationParams {
        max_new_tokens: request.max_new_tokens,
        temperature: request.temperature,
    };
    let output = engine
        .generate(EngineInput { prompt, image }, params, sink)
        .await?;

    Ok(GenerationResult {
        text: output.text,
        truncated: output.truncated,
    })
}
