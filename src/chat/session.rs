//! One live conversation and its lazily-built artifact.

use futures_util::StreamExt;

use crate::build::{InputKeysResponse, input_keys_response};
use crate::compiler::{CompileRequest, CompiledFlow, CompilerEvent, FlowCompiler};
use crate::message::Message;

use super::ChatError;

/// Identity of a session: a flow plus an optional conversation id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub flow_id: String,
    pub chat_id: Option<String>,
}

impl SessionKey {
    #[must_use]
    pub fn new(flow_id: impl Into<String>, chat_id: Option<String>) -> Self {
        Self {
            flow_id: flow_id.into(),
            chat_id,
        }
    }

    /// A session without a conversation id is a debug session and never
    /// survives reattachment.
    #[must_use]
    pub fn is_debug(&self) -> bool {
        self.chat_id.is_none()
    }
}

/// Per-conversation state: graph description, cached artifact, transcript.
///
/// The artifact is built lazily on the first turn that needs it and again
/// after the orchestrator invalidates it post-rebuild.
pub struct ChatSession {
    key: SessionKey,
    graph_data: Option<String>,
    artifact: Option<Box<dyn CompiledFlow>>,
    history: Vec<Message>,
    keys: InputKeysResponse,
}

impl ChatSession {
    #[must_use]
    pub fn new(key: SessionKey, graph_data: String) -> Self {
        Self {
            key,
            graph_data: Some(graph_data),
            artifact: None,
            history: Vec::new(),
            keys: InputKeysResponse::default(),
        }
    }

    #[must_use]
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    #[must_use]
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Input-key metadata of the current artifact; empty until one is built.
    #[must_use]
    pub fn input_keys(&self) -> &InputKeysResponse {
        &self.keys
    }

    #[must_use]
    pub fn has_artifact(&self) -> bool {
        self.artifact.is_some()
    }

    /// Replace the attached graph description without touching history.
    pub fn set_graph_data(&mut self, graph_data: String) {
        self.graph_data = Some(graph_data);
    }

    /// Invalidate the cached artifact; the next turn rebuilds it.
    pub fn drop_artifact(&mut self) {
        self.artifact = None;
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Build (or rebuild) the artifact from the attached graph description.
    ///
    /// Compiler progress frames are consumed silently here; interactive
    /// rebuilds narrate through logs, not through the chat socket.
    pub async fn ensure_artifact(&mut self, compiler: &dyn FlowCompiler) -> Result<(), ChatError> {
        if self.artifact.is_some() {
            return Ok(());
        }
        let graph_data = self.graph_data.clone().ok_or(ChatError::MissingGraph)?;
        tracing::debug!(
            flow_id = %self.key.flow_id,
            debug = self.key.is_debug(),
            "rebuilding session artifact"
        );
        let request = CompileRequest {
            graph_data,
            flow_id: self.key.flow_id.clone(),
            chat_id: self.key.chat_id.clone(),
        };
        let mut events = compiler.compile(request).await?;
        let mut artifact: Option<Box<dyn CompiledFlow>> = None;
        while let Some(item) = events.next().await {
            match item? {
                CompilerEvent::Progress(_) => {}
                CompilerEvent::Completed(flow) => artifact = Some(flow),
            }
        }
        let mut artifact =
            artifact.ok_or_else(|| ChatError::Turn("compiler produced no artifact".into()))?;
        artifact.realize().await?;
        self.keys = input_keys_response(&artifact.entry_points());
        self.artifact = Some(artifact);
        Ok(())
    }

    /// Serve one conversational turn, recording both sides in the
    /// transcript.
    pub async fn relay(
        &mut self,
        compiler: &dyn FlowCompiler,
        inbound: Message,
    ) -> Result<Vec<Message>, ChatError> {
        self.ensure_artifact(compiler).await?;
        let artifact = self
            .artifact
            .as_mut()
            .ok_or_else(|| ChatError::Turn("artifact vanished mid-turn".into()))?;
        let outbound = artifact
            .respond(&inbound)
            .await
            .map_err(|err| ChatError::Turn(err.0))?;
        self.history.push(inbound);
        self.history.extend(outbound.iter().cloned());
        Ok(outbound)
    }
}
