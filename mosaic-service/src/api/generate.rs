//! Generation endpoints: aggregate JSON or Server-Sent Events.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, header},
    response::{
        IntoResponse, Response, Sse,
        sse::{Event, KeepAlive},
    },
};
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use super::AppState;
use super::payload;
use crate::error::ServiceResult;
use crate::models::AssetFailure;
use crate::service::GenerationEvent;

/// Aggregate-mode response body
#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub generated_text: String,
    pub truncated: bool,
    pub asset_failures: Vec<AssetFailure>,
}

#[derive(Serialize)]
struct ChunkPayload<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct DonePayload<'a> {
    truncated: bool,
    asset_failures: &'a [AssetFailure],
}

/// `POST /multimodal_generate` (also mounted as `/generate`)
pub async fn generate_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> ServiceResult<Response> {
    let wants_events = accepts_event_stream(request.headers());
    let parsed = payload::parse(request).await?;
    let prepared = state.service.prepare(parsed.submission).await?;

    if parsed.stream || wants_events {
        debug!(request_id = %prepared.request_id, "Streaming response");
        let events = state.service.generate_stream(prepared);
        return Ok(event_stream(ReceiverStream::new(events)).into_response());
    }

    let outcome = state.service.generate(prepared).await?;
    Ok(Json(GenerateResponse {
        generated_text: outcome.result.text,
        truncated: outcome.result.truncated,
        asset_failures: outcome.asset_failures,
    })
    .into_response())
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains("text/event-stream"))
}

/// Dropping the returned stream (client gone) drops the receiver, which the
/// generation task sees as a closed sink.
fn event_stream(
    events: impl Stream<Item = GenerationEvent> + Send + 'static,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = events.map(|event| Ok::<_, Infallible>(to_sse_event(&event)));

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn to_sse_event(event: &GenerationEvent) -> Event {
    match event {
        GenerationEvent::Chunk(text) => Event::default()
            .event("chunk")
            .data(serde_json::to_string(&ChunkPayload { text }).unwrap_or_default()),
        GenerationEvent::Done {
            truncated,
            asset_failures,
        } => Event::default().event("done").data(
            serde_json::to_string(&DonePayload {
                truncated: *truncated,
                asset_failures,
            })
            .unwrap_or_default(),
        ),
        GenerationEvent::Error(e) => Event::default()
            .event("error")
            .data(serde_json::to_string(&e.to_response_body()).unwrap_or_default()),
    }
}
