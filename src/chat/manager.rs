//! Session registry and connection admission.

use std::sync::Arc;

use axum::extract::ws::close_code;
use rustc_hash::FxHashMap;
use tokio::sync::Mutex;

use crate::build::{BuildStateMachine, BuildStatus};
use crate::compiler::FlowCompiler;
use crate::message::Message;
use crate::persistence::{FlowLookup, FlowStore, PublishedStatus};

use super::session::{ChatSession, SessionKey};
use super::ChatError;

/// Why an incoming connection was refused, mapped to a close code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionRejection {
    /// The caller may not talk to this flow at all.
    Policy { reason: String },
    /// The flow exists but is not ready; retrying later can succeed.
    TryAgainLater { reason: String },
    /// Something on our side broke while admitting the connection.
    Internal { reason: String },
}

impl ConnectionRejection {
    fn policy(reason: impl Into<String>) -> Self {
        Self::Policy {
            reason: reason.into(),
        }
    }

    fn try_again(reason: impl Into<String>) -> Self {
        Self::TryAgainLater {
            reason: reason.into(),
        }
    }

    fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// WebSocket close code this rejection maps to.
    #[must_use]
    pub fn close_code(&self) -> u16 {
        match self {
            ConnectionRejection::Policy { .. } => close_code::POLICY,
            ConnectionRejection::TryAgainLater { .. } => close_code::AGAIN,
            ConnectionRejection::Internal { .. } => close_code::ERROR,
        }
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            ConnectionRejection::Policy { reason }
            | ConnectionRejection::TryAgainLater { reason }
            | ConnectionRejection::Internal { reason } => reason,
        }
    }
}

/// Owns every live [`ChatSession`] and decides who gets one.
///
/// Sessions keyed with a conversation id persist across disconnects so a
/// reconnect resumes its transcript; debug sessions are discarded and
/// rebuilt on every attach.
pub struct ChatManager {
    sessions: Mutex<FxHashMap<SessionKey, Arc<Mutex<ChatSession>>>>,
    flows: Arc<dyn FlowStore>,
    state: Arc<BuildStateMachine>,
    compiler: Arc<dyn FlowCompiler>,
}

impl ChatManager {
    #[must_use]
    pub fn new(
        flows: Arc<dyn FlowStore>,
        state: Arc<BuildStateMachine>,
        compiler: Arc<dyn FlowCompiler>,
    ) -> Self {
        Self {
            sessions: Mutex::new(FxHashMap::default()),
            flows,
            state,
            compiler,
        }
    }

    /// Admission check: find the graph description this connection is
    /// entitled to chat with.
    ///
    /// Named conversations resolve against durable storage and require a
    /// published flow. Debug connections resolve against the build record
    /// and require a successful build.
    pub async fn resolve_graph(
        &self,
        flow_id: &str,
        chat_id: Option<&str>,
    ) -> Result<String, ConnectionRejection> {
        if chat_id.is_some() {
            let lookup = self.flows.get_flow_by_id(flow_id).await.map_err(|err| {
                tracing::error!(flow_id, error = %err, "flow lookup failed");
                ConnectionRejection::internal(err.to_string())
            })?;
            return match lookup {
                FlowLookup::NotFound => {
                    Err(ConnectionRejection::policy("The flow has been deleted"))
                }
                FlowLookup::Found(flow) if flow.published_status != PublishedStatus::Online => {
                    Err(ConnectionRejection::policy(
                        "The flow is not published and cannot be chatted with directly",
                    ))
                }
                FlowLookup::Found(flow) => Ok(flow.definition_data),
            };
        }

        let record = self.state.read_record(flow_id).await.map_err(|err| {
            tracing::error!(flow_id, error = %err, "build record lookup failed");
            ConnectionRejection::internal(err.to_string())
        })?;
        match record {
            Some(record) if record.status == BuildStatus::Success => Ok(record.graph_data),
            _ => Err(ConnectionRejection::try_again(
                "The flow has not passed compilation",
            )),
        }
    }

    /// Attach a connection to its session, creating one if needed.
    ///
    /// Debug sessions always start fresh; named sessions are reused so the
    /// transcript survives reconnects.
    pub async fn attach(
        &self,
        flow_id: &str,
        chat_id: Option<&str>,
        graph_data: String,
    ) -> Arc<Mutex<ChatSession>> {
        let key = SessionKey::new(flow_id, chat_id.map(str::to_string));
        let mut sessions = self.sessions.lock().await;
        if key.is_debug() {
            sessions.remove(&key);
        }
        if let Some(existing) = sessions.get(&key) {
            let session = Arc::clone(existing);
            drop(sessions);
            // Storage may have a newer definition than the cached session.
            session.lock().await.set_graph_data(graph_data);
            return session;
        }
        let session = Arc::new(Mutex::new(ChatSession::new(key.clone(), graph_data)));
        sessions.insert(key, Arc::clone(&session));
        session
    }

    /// Serve one turn on a session.
    pub async fn relay_turn(
        &self,
        session: &Arc<Mutex<ChatSession>>,
        inbound: Message,
    ) -> Result<Vec<Message>, ChatError> {
        session
            .lock()
            .await
            .relay(self.compiler.as_ref(), inbound)
            .await
    }

    /// Orchestrator hook: wipe the session transcript after a successful
    /// rebuild. A no-op when no session exists.
    pub async fn reset_history(&self, flow_id: &str, chat_id: Option<&str>) {
        if let Some(session) = self.lookup(flow_id, chat_id).await {
            session.lock().await.clear_history();
            tracing::debug!(flow_id, "session history reset");
        }
    }

    /// Orchestrator hook: invalidate the cached artifact so the next turn
    /// rebuilds against the new definition. A no-op when no session exists.
    pub async fn drop_artifact(&self, flow_id: &str, chat_id: Option<&str>) {
        if let Some(session) = self.lookup(flow_id, chat_id).await {
            session.lock().await.drop_artifact();
        }
    }

    /// Discard a debug session once its connection closes; named sessions
    /// stay resident.
    pub async fn detach(&self, flow_id: &str, chat_id: Option<&str>) {
        let key = SessionKey::new(flow_id, chat_id.map(str::to_string));
        if key.is_debug() {
            self.sessions.lock().await.remove(&key);
        }
    }

    async fn lookup(
        &self,
        flow_id: &str,
        chat_id: Option<&str>,
    ) -> Option<Arc<Mutex<ChatSession>>> {
        let key = SessionKey::new(flow_id, chat_id.map(str::to_string));
        self.sessions.lock().await.get(&key).cloned()
    }
}
