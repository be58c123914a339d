//! Flow compiler capability consumed by the build orchestrator.
//!
//! The compiler is opaque to this crate: it takes a serialized graph
//! description and produces a lazy, finite sequence of progress events
//! terminated by a realized artifact or a failure. Every element of that
//! sequence is a tagged [`CompilerEvent`] — progress and completion are
//! distinguished by variant, never by runtime type inspection.

pub mod echo;

use std::fmt;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::Message;

pub use echo::{EchoCompiler, EchoFlow};

/// Input to one compilation run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileRequest {
    /// Serialized graph description, exactly as submitted by the client.
    pub graph_data: String,
    pub flow_id: String,
    pub chat_id: Option<String>,
}

/// One element of a compiler's output sequence.
pub enum CompilerEvent {
    /// A progress notification, forwarded verbatim to the build stream.
    Progress(serde_json::Value),
    /// The realized artifact. Terminates the sequence.
    Completed(Box<dyn CompiledFlow>),
}

impl fmt::Debug for CompilerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompilerEvent::Progress(data) => f.debug_tuple("Progress").field(data).finish(),
            CompilerEvent::Completed(_) => f.write_str("Completed(<artifact>)"),
        }
    }
}

/// Lazy compiler output: progress events ending in an artifact or an error.
pub type CompileStream = BoxStream<'static, Result<CompilerEvent, CompileError>>;

/// Errors raised while compiling or realizing a flow.
#[derive(Debug, Error, Diagnostic)]
pub enum CompileError {
    /// The graph description could not be compiled.
    #[error("graph compilation failed: {0}")]
    #[diagnostic(code(flowchat::compiler::graph))]
    Graph(String),

    /// The post-stream realization pass failed; the artifact is unusable.
    #[error("artifact realization failed: {0}")]
    #[diagnostic(code(flowchat::compiler::realize))]
    Realize(String),
}

/// Error from one conversational turn against a realized artifact.
#[derive(Debug, Error, Diagnostic)]
#[error("conversation turn failed: {0}")]
#[diagnostic(code(flowchat::compiler::turn))]
pub struct TurnError(pub String);

/// How an entry-point node accepts external input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPointKind {
    /// Accepts conversational input under declared input keys.
    Conversational,
    /// Bare file-ingestion point; contributes a synthetic file-input
    /// descriptor instead of declared keys.
    FileIngest,
}

/// A graph node recognized as accepting external conversational input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    /// Identity of the owning node.
    pub id: String,
    pub kind: EntryPointKind,
    #[serde(default)]
    pub input_keys: Vec<String>,
    #[serde(default)]
    pub memory_keys: Vec<String>,
    #[serde(default)]
    pub handle_keys: Vec<String>,
}

impl EntryPoint {
    /// Conversational entry point declaring the given input keys.
    #[must_use]
    pub fn conversational(id: impl Into<String>, input_keys: Vec<String>) -> Self {
        Self {
            id: id.into(),
            kind: EntryPointKind::Conversational,
            input_keys,
            memory_keys: Vec::new(),
            handle_keys: Vec::new(),
        }
    }

    /// Bare file-ingestion entry point.
    #[must_use]
    pub fn file_ingest(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: EntryPointKind::FileIngest,
            input_keys: Vec::new(),
            memory_keys: Vec::new(),
            handle_keys: Vec::new(),
        }
    }
}

/// Opaque capability that compiles graph descriptions.
#[async_trait]
pub trait FlowCompiler: Send + Sync {
    /// Start one compilation run.
    ///
    /// An `Err` here means compilation could not even start; errors midway
    /// arrive as `Err` items inside the returned stream.
    async fn compile(&self, request: CompileRequest) -> Result<CompileStream, CompileError>;
}

/// The realized, queryable result of compiling a flow's graph description.
#[async_trait]
pub trait CompiledFlow: Send + Sync {
    /// Second, synchronous realization pass run after the event stream
    /// completes. The artifact is not usable until this succeeds.
    async fn realize(&mut self) -> Result<(), CompileError>;

    /// Entry-point nodes this artifact expects conversational input on.
    fn entry_points(&self) -> Vec<EntryPoint>;

    /// Feed one inbound message into the artifact's conversational entry
    /// point; returns zero or more outbound messages in production order (an
    /// artifact may stream partial tokens before a final turn).
    async fn respond(&mut self, inbound: &Message) -> Result<Vec<Message>, TurnError>;
}
