//! The chat websocket and the transcript CRUD routes.

use std::sync::Arc;

use axum::Json;
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::response::Response;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use tokio::sync::Mutex;

use crate::auth::AuthClaims;
use crate::chat::ChatSession;
use crate::message::{ChatMessage, Message};
use crate::persistence::{ConversationSummary, FlowLookup, MessageFilter};

use super::response::{ApiError, ApiResponse};
use super::AppState;

const DEFAULT_PAGE_SIZE: usize = 20;

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AuthClaims, ApiError> {
    Ok(state.auth.authenticate(bearer_token(headers)).await?)
}

#[derive(Debug, Deserialize)]
pub struct ChatSocketQuery {
    #[serde(default)]
    pub chat_id: Option<String>,
    /// Bearer token; websockets cannot set headers from browsers.
    #[serde(default)]
    pub t: Option<String>,
}

/// `GET /chat/{flow_id}` (upgrade): the live conversational channel.
///
/// Rejections happen after the transport is accepted, as close frames with
/// a policy-violation, try-again-later, or internal-error code plus a
/// human-readable reason.
pub async fn chat_socket(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
    Query(query): Query<ChatSocketQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| serve_socket(state, flow_id, query, socket))
}

async fn serve_socket(state: AppState, flow_id: String, query: ChatSocketQuery, socket: WebSocket) {
    let conn_id = Uuid::new_v4();
    let chat_id = query.chat_id.as_deref();
    tracing::info!(%conn_id, flow_id, debug = chat_id.is_none(), "chat connection opened");

    let claims = match state.auth.authenticate(query.t.as_deref()).await {
        Ok(claims) => claims,
        Err(err) => {
            tracing::warn!(%conn_id, flow_id, error = %err, "chat connection unauthorized");
            close_socket(socket, close_code::POLICY, "Unauthorized").await;
            return;
        }
    };

    let graph_data = match state.chat.resolve_graph(&flow_id, chat_id).await {
        Ok(graph_data) => graph_data,
        Err(rejection) => {
            tracing::warn!(
                %conn_id,
                flow_id,
                code = rejection.close_code(),
                reason = rejection.reason(),
                "chat connection rejected"
            );
            close_socket(socket, rejection.close_code(), rejection.reason()).await;
            return;
        }
    };

    let session = state.chat.attach(&flow_id, chat_id, graph_data).await;
    relay_loop(&state, &flow_id, chat_id, &claims, &session, socket).await;
    state.chat.detach(&flow_id, chat_id).await;
    tracing::info!(%conn_id, flow_id, "chat connection closed");
}

async fn relay_loop(
    state: &AppState,
    flow_id: &str,
    chat_id: Option<&str>,
    claims: &AuthClaims,
    session: &Arc<Mutex<ChatSession>>,
    mut socket: WebSocket,
) {
    while let Some(frame) = socket.recv().await {
        let text = match frame {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                tracing::debug!(flow_id, error = %err, "chat socket receive error");
                break;
            }
        };

        let inbound = Message::user(&inbound_content(text.as_str()));
        let outbound = match state.chat.relay_turn(session, inbound.clone()).await {
            Ok(outbound) => outbound,
            Err(err) => {
                tracing::error!(flow_id, error = %err, "chat turn failed");
                let payload = json!({ "error": err.to_string() }).to_string();
                if socket.send(WsMessage::Text(payload.into())).await.is_err() {
                    break;
                }
                continue;
            }
        };

        if let Some(chat_id) = chat_id {
            persist_turn(state, flow_id, chat_id, claims.user_id, &inbound, &outbound).await;
        }

        let mut disconnected = false;
        for message in &outbound {
            let payload = match serde_json::to_string(message) {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::error!(flow_id, error = %err, "failed to encode reply");
                    continue;
                }
            };
            if socket.send(WsMessage::Text(payload.into())).await.is_err() {
                disconnected = true;
                break;
            }
        }
        if disconnected {
            break;
        }
    }
}

/// Clients may send either a bare string or `{"message": "..."}`.
fn inbound_content(raw: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw)
        && let Some(Value::String(message)) = map.get("message")
    {
        return message.clone();
    }
    raw.to_string()
}

async fn persist_turn(
    state: &AppState,
    flow_id: &str,
    chat_id: &str,
    user_id: i64,
    inbound: &Message,
    outbound: &[Message],
) {
    let mut records = Vec::with_capacity(outbound.len() + 1);
    records.push(ChatMessage::turn(flow_id, chat_id, user_id, inbound));
    for message in outbound {
        records.push(ChatMessage::turn(flow_id, chat_id, user_id, message));
    }
    for record in records {
        if let Err(err) = state.messages.append_message(record).await {
            tracing::error!(flow_id, chat_id, error = %err, "failed to persist chat message");
        }
    }
}

async fn close_socket(mut socket: WebSocket, code: u16, reason: &str) {
    let frame = CloseFrame {
        code,
        reason: reason.to_string().into(),
    };
    if let Err(err) = socket.send(WsMessage::Close(Some(frame))).await {
        tracing::debug!(error = %err, "failed to send close frame");
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub flow_id: String,
    pub chat_id: String,
    /// Page backwards from this message id.
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub page_size: Option<usize>,
}

/// `GET /chat/history`: one page of the caller's transcript, newest first.
pub async fn chat_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<ChatMessage>>>, ApiError> {
    let claims = authenticate(&state, &headers).await?;
    let page = state
        .messages
        .query_messages(MessageFilter {
            flow_id: Some(query.flow_id),
            chat_id: Some(query.chat_id),
            user_id: Some(claims.user_id),
            before_id: query.id,
            limit: Some(query.page_size.unwrap_or(DEFAULT_PAGE_SIZE)),
        })
        .await?;
    Ok(ApiResponse::ok(page))
}

#[derive(Debug, Serialize)]
pub struct ConversationListItem {
    pub flow_id: String,
    pub chat_id: String,
    pub flow_name: String,
    pub flow_description: String,
    pub create_time: chrono::DateTime<chrono::Utc>,
    pub update_time: chrono::DateTime<chrono::Utc>,
}

/// `GET /chat/list`: the caller's conversations, newest activity first.
/// Conversations whose flow was deleted are skipped.
pub async fn chat_list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<ConversationListItem>>>, ApiError> {
    let claims = authenticate(&state, &headers).await?;
    let summaries = state.messages.list_conversations(claims.user_id).await?;
    let mut items = Vec::with_capacity(summaries.len());
    for ConversationSummary {
        flow_id,
        chat_id,
        create_time,
        update_time,
    } in summaries
    {
        match state.flows.get_flow_by_id(&flow_id).await? {
            FlowLookup::Found(flow) => items.push(ConversationListItem {
                flow_id,
                chat_id,
                flow_name: flow.name,
                flow_description: flow.description,
                create_time,
                update_time,
            }),
            FlowLookup::NotFound => {
                tracing::debug!(flow_id, "skipping conversation for deleted flow");
            }
        }
    }
    Ok(ApiResponse::ok(items))
}

#[derive(Debug, Serialize)]
pub struct DeletedData {
    pub deleted: u64,
}

/// `DELETE /chat/{chat_id}`: drop the caller's messages in a conversation.
pub async fn delete_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(chat_id): Path<String>,
) -> Result<Json<ApiResponse<DeletedData>>, ApiError> {
    let claims = authenticate(&state, &headers).await?;
    let deleted = state
        .messages
        .delete_messages(MessageFilter {
            chat_id: Some(chat_id),
            user_id: Some(claims.user_id),
            ..Default::default()
        })
        .await?;
    Ok(ApiResponse::ok(DeletedData { deleted }))
}

#[derive(Debug, Deserialize)]
pub struct LikedRequest {
    pub message_id: i64,
    pub liked: bool,
}

/// `POST /liked`: flag one of the caller's own messages.
pub async fn like_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<LikedRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let claims = authenticate(&state, &headers).await?;
    state
        .messages
        .set_liked(payload.message_id, claims.user_id, payload.liked)
        .await?;
    Ok(ApiResponse::ok(()))
}

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    pub message_id: i64,
    pub comment: String,
}

/// `POST /chat/comment`: attach a comment to a message.
pub async fn comment_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CommentRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let _claims = authenticate(&state, &headers).await?;
    state
        .messages
        .set_comment(payload.message_id, payload.comment)
        .await?;
    Ok(ApiResponse::ok(()))
}
