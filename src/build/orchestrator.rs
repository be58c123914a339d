//! Drives compilation of a stored graph description and narrates it.
//!
//! One invocation produces one logical stream of [`StreamData`] frames:
//!
//! 1. precondition gate (record exists, not already building, graph
//!    non-empty) — first violation emits a terminal `error` frame
//! 2. transition to `IN_PROGRESS` (inside the gate)
//! 3. compiler progress forwarded verbatim
//! 4. compiler failure → `FAILURE` + terminal `error` frame
//! 5. artifact realization pass
//! 6. derived input-key metadata emitted as one `message` frame
//! 7. chat session history + cached artifact invalidated
//! 8. transition to `SUCCESS`
//! 9. unconditional end-of-stream sentinel
//!
//! Each cache mutation is awaited before the next step begins. The build
//! task is detached from its consumer: a dropped receiver never cancels the
//! build, which runs to completion and records its final status.

use std::sync::Arc;

use futures_util::StreamExt;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::cache::CacheError;
use crate::chat::ChatManager;
use crate::compiler::{
    CompileRequest, CompiledFlow, CompilerEvent, EntryPoint, EntryPointKind, FlowCompiler,
};

use super::state::{BuildGate, BuildStateMachine};
use super::stream::StreamData;

/// Error frame text for a missing build record.
pub const ERR_INVALID_SESSION: &str = "Invalid session ID";
/// Error frame text when a build is already in flight.
pub const ERR_ALREADY_BUILDING: &str = "Already building";
/// Error frame text for an empty graph description.
pub const ERR_NO_DATA: &str = "No data provided";

/// Failures internal to the orchestration path itself.
///
/// These never reach the client as transport errors; the stream converts
/// them to terminal `error` frames.
#[derive(Debug, Error, Diagnostic)]
pub enum BuildError {
    #[error(transparent)]
    #[diagnostic(code(flowchat::build::cache))]
    Cache(#[from] CacheError),

    #[error("failed to encode build metadata: {0}")]
    #[diagnostic(code(flowchat::build::encode))]
    Encode(#[from] serde_json::Error),
}

/// Input-key metadata derived from an artifact's entry points.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InputKeysResponse {
    pub input_keys: Vec<Value>,
    pub memory_keys: Vec<String>,
    pub handle_keys: Vec<String>,
}

/// Collect and merge the input keys of every entry-point node.
///
/// Keys are unioned, each descriptor annotated with its owning node's
/// identity; bare file-ingestion points contribute a synthetic file-input
/// descriptor instead.
#[must_use]
pub fn input_keys_response(entry_points: &[EntryPoint]) -> InputKeysResponse {
    let mut response = InputKeysResponse::default();
    for entry in entry_points {
        match entry.kind {
            EntryPointKind::Conversational => {
                let mut descriptor = serde_json::Map::new();
                for key in &entry.input_keys {
                    descriptor.insert(key.clone(), json!(""));
                }
                descriptor.insert("id".to_string(), json!(entry.id));
                response.input_keys.push(Value::Object(descriptor));
                response.memory_keys.extend(entry.memory_keys.iter().cloned());
                response.handle_keys.extend(entry.handle_keys.iter().cloned());
            }
            EntryPointKind::FileIngest => {
                response.input_keys.push(json!({
                    "file_path": "",
                    "type": "file",
                    "id": entry.id,
                }));
            }
        }
    }
    response
}

/// Consumes stored graph descriptions and drives their compilation.
pub struct BuildOrchestrator {
    state: Arc<BuildStateMachine>,
    compiler: Arc<dyn FlowCompiler>,
    chat: Arc<ChatManager>,
}

impl BuildOrchestrator {
    #[must_use]
    pub fn new(
        state: Arc<BuildStateMachine>,
        compiler: Arc<dyn FlowCompiler>,
        chat: Arc<ChatManager>,
    ) -> Self {
        Self {
            state,
            compiler,
            chat,
        }
    }

    /// Start one build and return the receiving end of its progress stream.
    ///
    /// The build runs on a detached task; dropping the receiver does not
    /// cancel it.
    pub fn stream_build(
        self: &Arc<Self>,
        flow_id: String,
        chat_id: Option<String>,
    ) -> flume::Receiver<StreamData> {
        let (tx, rx) = flume::unbounded();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_build(&flow_id, chat_id.as_deref(), &tx).await;
        });
        rx
    }

    /// Run one build to completion, emitting frames into `tx`.
    ///
    /// The closing sentinel is emitted unconditionally, whatever the
    /// outcome.
    pub async fn run_build(
        &self,
        flow_id: &str,
        chat_id: Option<&str>,
        tx: &flume::Sender<StreamData>,
    ) {
        if let Err(err) = self.drive(flow_id, chat_id, tx).await {
            tracing::error!(flow_id, error = %err, "build orchestration failed");
            if let Err(mark_err) = self.state.mark_failure(flow_id).await {
                tracing::error!(flow_id, error = %mark_err, "failed to record build failure");
            }
            emit(tx, StreamData::error(err.to_string()));
        }
        emit(tx, StreamData::end_of_stream());
    }

    async fn drive(
        &self,
        flow_id: &str,
        chat_id: Option<&str>,
        tx: &flume::Sender<StreamData>,
    ) -> Result<(), BuildError> {
        let graph_data = match self.state.begin(flow_id).await? {
            BuildGate::Missing => {
                emit(tx, StreamData::error(ERR_INVALID_SESSION));
                return Ok(());
            }
            BuildGate::AlreadyBuilding => {
                emit(tx, StreamData::error(ERR_ALREADY_BUILDING));
                return Ok(());
            }
            BuildGate::EmptyGraph => {
                emit(tx, StreamData::error(ERR_NO_DATA));
                return Ok(());
            }
            BuildGate::Proceed { graph_data } => graph_data,
        };

        tracing::debug!(flow_id, "building flow artifact");
        let request = CompileRequest {
            graph_data,
            flow_id: flow_id.to_string(),
            chat_id: chat_id.map(str::to_string),
        };

        let mut artifact: Option<Box<dyn CompiledFlow>> = None;
        match self.compiler.compile(request).await {
            Err(err) => {
                return self.fail(flow_id, tx, err.to_string()).await;
            }
            Ok(mut events) => {
                while let Some(item) = events.next().await {
                    match item {
                        Ok(CompilerEvent::Progress(data)) => {
                            emit(tx, StreamData::message(data));
                        }
                        Ok(CompilerEvent::Completed(flow)) => {
                            artifact = Some(flow);
                        }
                        Err(err) => {
                            tracing::error!(flow_id, error = %err, "build flow error");
                            return self.fail(flow_id, tx, err.to_string()).await;
                        }
                    }
                }
            }
        }

        let Some(mut artifact) = artifact else {
            return self
                .fail(flow_id, tx, "compiler produced no artifact".to_string())
                .await;
        };

        // Second realization pass; the artifact is unusable until it passes.
        if let Err(err) = artifact.realize().await {
            tracing::error!(flow_id, error = %err, "artifact realization failed");
            return self.fail(flow_id, tx, err.to_string()).await;
        }

        let keys = input_keys_response(&artifact.entry_points());
        emit(tx, StreamData::message(serde_json::to_value(&keys)?));

        // A successful rebuild always invalidates prior conversational
        // context before the status flips to SUCCESS.
        self.chat.reset_history(flow_id, chat_id).await;
        self.chat.drop_artifact(flow_id, chat_id).await;
        self.state.mark_success(flow_id).await?;
        tracing::info!(flow_id, "flow build succeeded");
        Ok(())
    }

    async fn fail(
        &self,
        flow_id: &str,
        tx: &flume::Sender<StreamData>,
        description: String,
    ) -> Result<(), BuildError> {
        self.state.mark_failure(flow_id).await?;
        emit(tx, StreamData::error(description));
        Ok(())
    }
}

fn emit(tx: &flume::Sender<StreamData>, frame: StreamData) {
    // A dropped receiver means the client went away; the build still runs
    // to completion so a reconnect observes the final status.
    if tx.send(frame).is_err() {
        tracing::debug!("progress stream receiver dropped, continuing build");
    }
}
