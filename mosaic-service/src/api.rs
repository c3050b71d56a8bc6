//! HTTP API for the mosaic service.
//!
//! This module provides the REST API endpoints for:
//! - Multimodal generation (aggregate JSON or SSE streaming)
//! - Health and metrics monitoring

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::service::MultimodalService;

pub mod generate;
pub mod payload;
use generate::generate_handler;

/// Application state
pub struct AppState {
    pub service: Arc<MultimodalService>,
    pub metrics: Option<PrometheusHandle>,
}

/// Build the API router
pub fn router(service: Arc<MultimodalService>, metrics: Option<PrometheusHandle>) -> Router {
    let max_body_size = service.config().limits.max_request_bytes;

    let state = Arc::new(AppState { service, metrics });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route(
            "/multimodal_generate",
            post(generate_handler).layer(DefaultBodyLimit::max(max_body_size)),
        )
        .route(
            "/generate",
            post(generate_handler).layer(DefaultBodyLimit::max(max_body_size)),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// === Health & Metrics ===

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let orchestrator = state.service.orchestrator();

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.service.uptime().as_secs(),
        engine_model: orchestrator.model().to_string(),
        engine_busy: orchestrator.is_busy(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    engine_model: String,
    engine_busy: bool,
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use base64::Engine;
    use tower::ServiceExt;

    use crate::config::ServiceConfig;
    use crate::engine::testing::ScriptedEngine;
    use crate::ingestion::fixtures;
    use crate::vision::captioning::PlaceholderCaptioner;

    const BOUNDARY: &str = "mosaic-test-boundary";

    fn app(engine: ScriptedEngine) -> Router {
        let service = Arc::new(MultimodalService::new(
            ServiceConfig::default(),
            Box::new(engine),
            Arc::new(PlaceholderCaptioner::new("This is a sample caption.")),
        ));
        router(service, None)
    }

    enum Part<'a> {
        Text(&'a str, &'a str),
        File(&'a str, &'a str, &'a str, Vec<u8>),
    }

    fn multipart_body(parts: Vec<Part<'_>>) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}")
                            .as_bytes(),
                    );
                }
                Part::File(name, filename, content_type, data) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(&data);
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn multipart_request(uri: &str, parts: Vec<Part<'_>>) -> Request<Body> {
        Request::post(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(parts)))
            .unwrap()
    }

    fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app(ScriptedEngine::new(&[]))
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["engine_model"], "scripted");
        assert_eq!(body["engine_busy"], false);
    }

    #[tokio::test]
    async fn test_metrics_without_recorder() {
        let response = app(ScriptedEngine::new(&[]))
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_multipart_chat_and_document() {
        let request = multipart_request(
            "/multimodal_generate",
            vec![
                Part::Text("messages", r#"[{"role":"user","content":"Summarize"}]"#),
                Part::Text("max_new_tokens", "64"),
                Part::File(
                    "office_files",
                    "report.docx",
                    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                    fixtures::docx(&["Revenue grew."], &[]),
                ),
                Part::File("images", "bad.png", "image/png", b"not a png".to_vec()),
                Part::Text("unknown_field", "ignored"),
            ],
        );

        let response = app(ScriptedEngine::new(&["Revenue ", "grew."]))
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["generated_text"], "Revenue grew.");
        assert_eq!(body["truncated"], false);
        assert_eq!(body["asset_failures"][0]["filename"], "bad.png");
        assert_eq!(body["asset_failures"][0]["code"], "invalid_image");
    }

    #[tokio::test]
    async fn test_json_body_with_image() {
        let request = json_request(
            "/generate",
            serde_json::json!({
                "images": [{
                    "filename": "dot.png",
                    "media_type": "image/png",
                    "data": fixtures::TINY_PNG_BASE64
                }],
                "temperature": 0.0
            }),
        );

        let response = app(ScriptedEngine::new(&["A dot."])).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["generated_text"], "A dot.");
        assert_eq!(body["asset_failures"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_json_document_payload() {
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(fixtures::docx(&["Inline memo"], &[]));
        let request = json_request(
            "/generate",
            serde_json::json!({ "documents": [{ "filename": "memo.docx", "data": encoded }] }),
        );
        let response = app(ScriptedEngine::new(&["ok"])).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_streaming_response() {
        let request = multipart_request(
            "/multimodal_generate",
            vec![
                Part::Text("messages", r#"[{"role":"user","content":"Count"}]"#),
                Part::Text("stream", "true"),
            ],
        );

        let response = app(ScriptedEngine::new(&["one", "two"])).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let one = text.find(r#"data: {"text":"one"}"#).unwrap();
        let two = text.find(r#"data: {"text":"two"}"#).unwrap();
        let done = text.find("event: done").unwrap();
        assert!(one < two && two < done);
        assert!(!text.contains("event: error"));
    }

    #[tokio::test]
    async fn test_accept_header_selects_streaming() {
        let mut request = json_request(
            "/generate",
            serde_json::json!({ "messages": [{"role": "user", "content": "hi"}] }),
        );
        request
            .headers_mut()
            .insert(header::ACCEPT, "text/event-stream".parse().unwrap());

        let response = app(ScriptedEngine::failing("device lost")).oneshot(request).await.unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("event: error"));
        assert!(text.contains("engine_failure"));
        assert!(!text.contains("event: done"));
    }

    #[tokio::test]
    async fn test_malformed_messages_is_bad_request() {
        let request = multipart_request(
            "/multimodal_generate",
            vec![Part::Text("messages", "[{\"role\":")],
        );
        let response = app(ScriptedEngine::new(&[])).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "validation_error");
    }

    #[tokio::test]
    async fn test_empty_request_is_bad_request() {
        let request = json_request("/generate", serde_json::json!({}));
        let response = app(ScriptedEngine::new(&[])).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "empty_input");
    }

    #[tokio::test]
    async fn test_only_unsupported_document() {
        let request = multipart_request(
            "/multimodal_generate",
            vec![Part::File("documents", "notes.rtf", "application/rtf", b"{\\rtf1}".to_vec())],
        );
        let response = app(ScriptedEngine::new(&[])).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["code"], "unsupported_format");
        assert_eq!(body["details"][0]["filename"], "notes.rtf");
    }

    #[tokio::test]
    async fn test_engine_failure_is_internal_error() {
        let request = json_request(
            "/generate",
            serde_json::json!({ "messages": [{"role": "user", "content": "hi"}] }),
        );
        let response = app(ScriptedEngine::failing("CUDA out of memory"))
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["code"], "engine_failure");
        assert!(body["message"].as_str().unwrap().contains("CUDA out of memory"));
    }

    #[tokio::test]
    async fn test_out_of_range_temperature() {
        let request = json_request(
            "/generate",
            serde_json::json!({
                "messages": [{"role": "user", "content": "hi"}],
                "temperature": 3.5
            }),
        );
        let response = app(ScriptedEngine::new(&["x"])).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
