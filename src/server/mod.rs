//! HTTP/WebSocket surface: build endpoints, the progress SSE stream, the
//! chat socket, and the transcript CRUD routes.

mod build_routes;
mod chat_routes;
mod response;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use crate::auth::AuthGuard;
use crate::build::{BuildOrchestrator, BuildStateMachine};
use crate::chat::ChatManager;
use crate::persistence::{FlowStore, MessageStore};

pub use response::{ApiError, ApiResponse};

/// Shared handles every route handler draws from.
#[derive(Clone)]
pub struct AppState {
    pub build_state: Arc<BuildStateMachine>,
    pub orchestrator: Arc<BuildOrchestrator>,
    pub chat: Arc<ChatManager>,
    pub auth: Arc<dyn AuthGuard>,
    pub flows: Arc<dyn FlowStore>,
    pub messages: Arc<dyn MessageStore>,
}

/// Build the full route table.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/build/init/{flow_id}", post(build_routes::init_build))
        .route("/build/{flow_id}/status", get(build_routes::build_status))
        .route("/build/stream/{flow_id}", get(build_routes::stream_build))
        .route("/chat/history", get(chat_routes::chat_history))
        .route("/chat/list", get(chat_routes::chat_list))
        .route("/chat/comment", post(chat_routes::comment_message))
        // GET upgrades a websocket for a flow id; DELETE drops a
        // conversation by chat id.
        .route(
            "/chat/{id}",
            get(chat_routes::chat_socket).delete(chat_routes::delete_chat),
        )
        .route("/liked", post(chat_routes::like_message))
        .with_state(state);
    Router::new().nest("/api/v1", api)
}
