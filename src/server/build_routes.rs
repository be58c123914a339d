//! Build submission, status polling, and the SSE progress stream.

use std::convert::Infallible;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures_util::Stream;
use futures_util::stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::build::InitOutcome;
use crate::persistence::FlowLookup;

use super::response::{ApiError, ApiResponse};
use super::AppState;

#[derive(Debug, Deserialize)]
pub struct BuildInitRequest {
    /// Graph description to build. Ignored when `chat_id` selects a durable
    /// definition instead.
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub chat_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BuildInitData {
    #[serde(rename = "flowId")]
    pub flow_id: String,
}

/// `POST /build/init/{flow_id}`: accept a graph description and enter the
/// state machine at `STARTED`. Returns immediately; the stream endpoint
/// drives the actual build.
pub async fn init_build(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
    Json(payload): Json<BuildInitRequest>,
) -> Result<Json<ApiResponse<BuildInitData>>, ApiError> {
    let graph_data = if payload.chat_id.is_some() {
        match state.flows.get_flow_by_id(&flow_id).await? {
            FlowLookup::Found(flow) => flow.definition_data,
            FlowLookup::NotFound => {
                return Err(ApiError::NotFound("flow not found".to_string()));
            }
        }
    } else {
        // An absent payload is stored as-is; the build gate rejects it with
        // its own error frame rather than failing here.
        payload.data.map(|v| v.to_string()).unwrap_or_default()
    };

    match state.build_state.initialize(&flow_id, &graph_data).await? {
        InitOutcome::Accepted => {
            tracing::info!(flow_id, "build submission accepted");
        }
        InitOutcome::AlreadyBuilding => {
            tracing::info!(flow_id, "build already in flight, reusing record");
        }
    }
    Ok(ApiResponse::ok(BuildInitData { flow_id }))
}

#[derive(Debug, Serialize)]
pub struct BuildStatusData {
    pub built: bool,
}

/// `GET /build/{flow_id}/status`: whether the flow's artifact is built.
pub async fn build_status(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
) -> Result<Json<ApiResponse<BuildStatusData>>, ApiError> {
    let built = state.build_state.is_built(&flow_id).await?;
    Ok(ApiResponse::ok(BuildStatusData { built }))
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub chat_id: Option<String>,
}

/// `GET /build/stream/{flow_id}?chat_id=`: run the build, narrating progress
/// over SSE. Precondition violations arrive as `error` frames on the stream,
/// never as HTTP errors.
pub async fn stream_build(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.orchestrator.stream_build(flow_id, query.chat_id);
    let sse_stream = stream::unfold(rx, |rx| async move {
        match rx.recv_async().await {
            Ok(frame) => {
                let event = SseEvent::default()
                    .event(frame.event.as_str())
                    .data(frame.data.to_string());
                Some((Ok(event), rx))
            }
            Err(_) => None,
        }
    });
    Sse::new(sse_stream).keep_alive(KeepAlive::default())
}
