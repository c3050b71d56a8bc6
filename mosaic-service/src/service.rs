//! Request pipeline: assets, prompt, engine, delivery.

mod assets;
pub mod orchestrator;
pub mod streaming;

pub use assets::{AssetOutcome, ProcessedAssets, process_assets};
pub use orchestrator::Orchestrator;
pub use streaming::{ChannelSink, CollectingSink, GenerationEvent};

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{Instrument, Span, debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::engine::GenerationEngine;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    AssetFailure, ChatMessage, GenerationRequest, GenerationResult, UploadedAsset,
};
use crate::prompt;
use crate::vision::captioning::ImageCaptioner;

/// One caller request, before any asset has been looked at
#[derive(Debug, Clone, Default)]
pub struct GenerationSubmission {
    pub messages: Vec<ChatMessage>,
    pub assets: Vec<UploadedAsset>,
    pub max_new_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// A request that is ready for the engine
#[derive(Debug)]
pub struct PreparedGeneration {
    pub request_id: Uuid,
    pub request: GenerationRequest,
    pub asset_failures: Vec<AssetFailure>,
    span: Span,
}

/// Aggregate-mode result
#[derive(Debug)]
pub struct GenerationOutcome {
    pub result: GenerationResult,
    pub asset_failures: Vec<AssetFailure>,
}

/// Main service coordinator
pub struct MultimodalService {
    config: Arc<ServiceConfig>,
    orchestrator: Arc<Orchestrator>,
    captioner: Arc<dyn ImageCaptioner>,
    started_at: Instant,
}

impl MultimodalService {
    pub fn new(
        config: ServiceConfig,
        engine: Box<dyn GenerationEngine>,
        captioner: Arc<dyn ImageCaptioner>,
    ) -> Self {
        info!(model = %engine.model(), captioner = captioner.name(), "Initializing multimodal service");
        Self {
            config: Arc::new(config),
            orchestrator: Arc::new(Orchestrator::new(engine)),
            captioner,
            started_at: Instant::now(),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Apply defaults and bounds to the caller's generation parameters
    pub fn resolve_params(
        &self,
        max_new_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> ServiceResult<(u32, f32)> {
        let generation = &self.config.generation;

        let max_new_tokens = max_new_tokens.unwrap_or(generation.default_max_new_tokens);
        if max_new_tokens == 0 || max_new_tokens > generation.max_new_tokens_limit {
            return Err(ServiceError::InvalidRequest {
                message: format!(
                    "max_new_tokens must be between 1 and {}, got {}",
                    generation.max_new_tokens_limit, max_new_tokens
                ),
            });
        }

        let temperature = temperature.unwrap_or(generation.default_temperature);
        if !temperature.is_finite() || !(0.0..=2.0).contains(&temperature) {
            return Err(ServiceError::InvalidRequest {
                message: format!("temperature must be within [0, 2], got {}", temperature),
            });
        }

        Ok((max_new_tokens, temperature))
    }

    /// Validate the request, process every asset and assemble the prompt
    pub async fn prepare(&self, submission: GenerationSubmission) -> ServiceResult<PreparedGeneration> {
        let request_id = Uuid::new_v4();
        let span = info_span!("generation", request_id = %request_id);
        let (request, asset_failures) = self.prepare_inner(submission).instrument(span.clone()).await?;
        Ok(PreparedGeneration {
            request_id,
            request,
            asset_failures,
            span,
        })
    }

    async fn prepare_inner(
        &self,
        submission: GenerationSubmission,
    ) -> ServiceResult<(GenerationRequest, Vec<AssetFailure>)> {
        let (max_new_tokens, temperature) =
            self.resolve_params(submission.max_new_tokens, submission.temperature)?;

        let max_assets = self.config.limits.max_assets;
        if submission.assets.len() > max_assets {
            return Err(ServiceError::InvalidRequest {
                message: format!(
                    "too many assets: {} (limit {})",
                    submission.assets.len(),
                    max_assets
                ),
            });
        }

        info!(
            messages = submission.messages.len(),
            assets = submission.assets.len(),
            max_new_tokens,
            temperature,
            "Request accepted"
        );

        let processed = process_assets(submission.assets, Arc::clone(&self.captioner)).await;
        let ProcessedAssets {
            images,
            documents,
            failures,
            first_error,
        } = processed;

        let messages = submission.messages;
        let assembled = tokio::task::spawn_blocking(move || prompt::assemble(messages, images, documents))
            .await
            .map_err(assembly_aborted)?;

        let prompt = match (assembled, first_error) {
            (Ok(prompt), _) => prompt,
            (Err(ServiceError::EmptyInput), Some(error)) => {
                return Err(ServiceError::AssetsFailed {
                    error: Box::new(error),
                    failures,
                });
            }
            (Err(e), _) => return Err(e),
        };

        if !failures.is_empty() {
            warn!(failed = failures.len(), "Continuing without failed assets");
        }
        debug!(conversation = prompt.conversation.len(), "Prompt ready");

        Ok((
            GenerationRequest {
                prompt,
                max_new_tokens,
                temperature,
            },
            failures,
        ))
    }

    /// Run to completion and return the whole text at once
    pub async fn generate(&self, prepared: PreparedGeneration) -> ServiceResult<GenerationOutcome> {
        metrics::counter!("mosaic_generation_requests_total", "mode" => "aggregate").increment(1);

        let PreparedGeneration {
            request,
            asset_failures,
            span,
            ..
        } = prepared;

        async move {
            let mut sink = CollectingSink::default();
            let result = self.orchestrator.generate(request, &mut sink).await?;
            debug!(chunks = sink.chunks(), "Aggregated generation output");

            Ok(GenerationOutcome {
                result: GenerationResult {
                    text: sink.into_text(),
                    truncated: result.truncated,
                },
                asset_failures,
            })
        }
        .instrument(span)
        .await
    }

    /// Start generation in the background and return its event stream.
    ///
    /// Chunks are pushed through a channel of `streaming.channel_capacity`
    /// slots; the engine waits while the reader is behind. Dropping the
    /// receiver stops generation at the next chunk.
    pub fn generate_stream(&self, prepared: PreparedGeneration) -> mpsc::Receiver<GenerationEvent> {
        metrics::counter!("mosaic_generation_requests_total", "mode" => "stream").increment(1);

        let (tx, rx) = mpsc::channel(self.config.streaming.channel_capacity.max(1));
        let orchestrator = Arc::clone(&self.orchestrator);
        let PreparedGeneration {
            request,
            asset_failures,
            span,
            ..
        } = prepared;

        tokio::spawn(
            async move {
                let mut sink = ChannelSink::new(tx.clone());
                let event = match orchestrator.generate(request, &mut sink).await {
                    Ok(result) => GenerationEvent::Done {
                        truncated: result.truncated,
                        asset_failures,
                    },
                    Err(e) => GenerationEvent::Error(e.into()),
                };
                if tx.send(event).await.is_err() {
                    info!("Stream consumer disconnected before completion");
                }
            }
            .instrument(span),
        );

        rx
    }
}

/// A crashed assembly task is a server fault, not bad input
fn assembly_aborted(error: tokio::task::JoinError) -> ServiceError {
    ServiceError::Internal {
        message: format!("prompt assembly aborted: {}", error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::ScriptedEngine;
    use crate::error::{ExtractionError, ImageError};
    use crate::ingestion::fixtures;
    use crate::vision::captioning::PlaceholderCaptioner;

    fn service(engine: ScriptedEngine) -> Arc<MultimodalService> {
        service_with_config(engine, ServiceConfig::default())
    }

    fn service_with_config(engine: ScriptedEngine, config: ServiceConfig) -> Arc<MultimodalService> {
        Arc::new(MultimodalService::new(
            config,
            Box::new(engine),
            Arc::new(PlaceholderCaptioner::new("This is a sample caption.")),
        ))
    }

    fn submission(messages: Vec<ChatMessage>, assets: Vec<UploadedAsset>) -> GenerationSubmission {
        GenerationSubmission {
            messages,
            assets,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_defaults_applied() {
        let service = service(ScriptedEngine::new(&["ok"]));
        let prepared = service
            .prepare(submission(vec![ChatMessage::user("hi")], vec![]))
            .await
            .unwrap();
        assert_eq!(prepared.request.max_new_tokens, 4096);
        assert!((prepared.request.temperature - 0.7).abs() < f32::EPSILON);
        assert!(prepared.asset_failures.is_empty());
    }

    #[tokio::test]
    async fn test_parameter_validation() {
        let service = service(ScriptedEngine::new(&["ok"]));
        assert!(service.resolve_params(Some(0), None).is_err());
        assert!(service.resolve_params(Some(32769), None).is_err());
        assert!(service.resolve_params(None, Some(2.5)).is_err());
        assert!(service.resolve_params(None, Some(-0.1)).is_err());
        assert!(service.resolve_params(None, Some(f32::NAN)).is_err());
        assert_eq!(service.resolve_params(Some(1), Some(0.0)).unwrap(), (1, 0.0));
        assert_eq!(service.resolve_params(None, Some(2.0)).unwrap(), (4096, 2.0));
    }

    #[tokio::test]
    async fn test_image_only_request() {
        let service = service(ScriptedEngine::new(&["A ", "dot."]));
        let prepared = service
            .prepare(submission(
                vec![],
                vec![UploadedAsset::image("dot.png", "image/png", fixtures::tiny_png())],
            ))
            .await
            .unwrap();
        assert_eq!(
            prepared.request.prompt.conversation,
            vec![ChatMessage::user("image caption (dot.png): This is a sample caption.")]
        );
        assert!(prepared.request.prompt.attached_image.is_some());

        let outcome = service.generate(prepared).await.unwrap();
        assert_eq!(outcome.result.text, "A dot.");
        assert!(!outcome.result.truncated);
    }

    #[tokio::test]
    async fn test_crashed_assembly_is_server_error() {
        let handle = tokio::task::spawn_blocking(|| -> ServiceResult<()> { panic!("assembler crashed") });
        let err = assembly_aborted(handle.await.unwrap_err());
        assert_eq!(err.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error_code(), "internal_error");
    }

    #[tokio::test]
    async fn test_empty_request() {
        let service = service(ScriptedEngine::new(&["unused"]));
        let err = service.prepare(GenerationSubmission::default()).await.unwrap_err();
        assert!(matches!(err, ServiceError::EmptyInput));
    }

    #[tokio::test]
    async fn test_only_failed_assets_reports_first_failure() {
        let service = service(ScriptedEngine::new(&["unused"]));
        let err = service
            .prepare(submission(
                vec![],
                vec![
                    UploadedAsset::document("notes.rtf", "application/rtf", b"{\\rtf1}".to_vec()),
                    UploadedAsset::image("broken.png", "image/png", Vec::new()),
                ],
            ))
            .await
            .unwrap_err();

        match err {
            ServiceError::AssetsFailed { error, failures } => {
                assert!(matches!(
                    *error,
                    ServiceError::Extraction(ExtractionError::UnsupportedFormat { .. })
                ));
                assert_eq!(failures.len(), 2);
            }
            other => panic!("expected AssetsFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_partial_failure_is_annotated() {
        let service = service(ScriptedEngine::new(&["fine"]));
        let prepared = service
            .prepare(submission(
                vec![ChatMessage::user("Summarize")],
                vec![
                    UploadedAsset::image("bad.jpg", "image/jpeg", b"nope".to_vec()),
                    UploadedAsset::document("memo.docx", "", fixtures::docx(&["Memo body"], &[])),
                ],
            ))
            .await
            .unwrap();

        assert_eq!(prepared.asset_failures.len(), 1);
        assert_eq!(prepared.asset_failures[0].filename, "bad.jpg");
        assert_eq!(
            prepared.request.prompt.conversation.last().unwrap().content,
            "file content (memo.docx):\nMemo body"
        );

        let outcome = service.generate(prepared).await.unwrap();
        assert_eq!(outcome.asset_failures.len(), 1);
    }

    #[tokio::test]
    async fn test_too_many_assets() {
        let mut config = ServiceConfig::default();
        config.limits.max_assets = 1;
        let service = service_with_config(ScriptedEngine::new(&["ok"]), config);
        let assets = vec![
            UploadedAsset::image("a.png", "image/png", fixtures::tiny_png()),
            UploadedAsset::image("b.png", "image/png", fixtures::tiny_png()),
        ];
        let err = service.prepare(submission(vec![], assets)).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_stream_emits_chunks_then_done() {
        let service = service(ScriptedEngine::new(&["one ", "two ", "three"]));
        let prepared = service
            .prepare(submission(
                vec![ChatMessage::user("count")],
                vec![UploadedAsset::image("x.txt", "text/plain", b"hi".to_vec())],
            ))
            .await
            .unwrap();

        let mut rx = service.generate_stream(prepared);
        let mut chunks = Vec::new();
        let mut terminal = None;
        while let Some(event) = rx.recv().await {
            match event {
                GenerationEvent::Chunk(text) => chunks.push(text),
                other => terminal = Some(other),
            }
        }

        assert_eq!(chunks, vec!["one ", "two ", "three"]);
        match terminal {
            Some(GenerationEvent::Done {
                truncated,
                asset_failures,
            }) => {
                assert!(!truncated);
                assert_eq!(asset_failures.len(), 1);
                assert_eq!(asset_failures[0].code, "unsupported_media_type");
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stream_engine_failure_is_terminal_error() {
        let service = service(ScriptedEngine::failing("device lost"));
        let prepared = service
            .prepare(submission(vec![ChatMessage::user("hi")], vec![]))
            .await
            .unwrap();

        let mut rx = service.generate_stream(prepared);
        match rx.recv().await {
            Some(GenerationEvent::Error(e)) => assert_eq!(e.error_code(), "engine_failure"),
            other => panic!("expected Error, got {other:?}"),
        }
        assert!(rx.recv().await.is_none());
        assert!(!service.orchestrator().is_busy());
    }

    #[tokio::test]
    async fn test_disconnect_stops_generation_and_releases_engine() {
        let engine = ScriptedEngine::new(&["a", "b", "c", "d", "e", "f"])
            .with_delay(Duration::from_millis(5));
        let delivered = engine.delivered.clone();
        let service = service(engine);
        let prepared = service
            .prepare(submission(vec![ChatMessage::user("go")], vec![]))
            .await
            .unwrap();

        let mut rx = service.generate_stream(prepared);
        assert!(matches!(rx.recv().await, Some(GenerationEvent::Chunk(_))));
        drop(rx);

        // The engine must become free again without anyone reading
        tokio::time::timeout(Duration::from_secs(2), async {
            while service.orchestrator().is_busy() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(*delivered.lock().unwrap() < 6);

        // And a following request is served
        let prepared = service
            .prepare(submission(vec![ChatMessage::user("again")], vec![]))
            .await
            .unwrap();
        assert!(service.generate(prepared).await.is_ok());
    }

    #[tokio::test]
    async fn test_unsupported_image_never_reaches_engine() {
        let service = service(ScriptedEngine::new(&["ok"]));
        let err = service
            .prepare(submission(
                vec![],
                vec![UploadedAsset::image("notes.txt", "text/plain", b"x".to_vec())],
            ))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::AssetsFailed { ref error, .. }
                if matches!(**error, ServiceError::Image(ImageError::UnsupportedMediaType { .. }))
        ));
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }
}
