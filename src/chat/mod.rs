//! Conversational sessions over built flow artifacts.
//!
//! A session is keyed by `(flow_id, chat_id)`; the absence of a `chat_id`
//! marks a debug session, which gets a clean slate on every attach. The
//! [`ChatManager`] owns the session map, admission control for incoming
//! connections, and the invalidation hooks the build orchestrator fires
//! after a successful rebuild.

mod manager;
mod session;

use miette::Diagnostic;
use thiserror::Error;

use crate::compiler::CompileError;

pub use manager::{ChatManager, ConnectionRejection};
pub use session::{ChatSession, SessionKey};

/// Failures while serving a conversational turn.
#[derive(Debug, Error, Diagnostic)]
pub enum ChatError {
    /// No graph description is attached to the session yet.
    #[error("no graph description available for this session")]
    #[diagnostic(code(flowchat::chat::missing_graph))]
    MissingGraph,

    #[error(transparent)]
    #[diagnostic(code(flowchat::chat::compile))]
    Compile(#[from] CompileError),

    #[error("turn failed: {0}")]
    #[diagnostic(code(flowchat::chat::turn))]
    Turn(String),
}
