//! Flowchat: a build orchestrator and chat session engine for graph-defined
//! conversational flows.
//!
//! A client submits a serialized graph description, watches its compilation
//! as a server-sent-event stream, then talks to the built artifact over a
//! websocket. The crate is organized around that lifecycle:
//!
//! - [`cache`] — the hash-record store (in-memory or redis) backing build
//!   state, selected by a factory with transparent fallback.
//! - [`build`] — the per-flow state machine
//!   (`STARTED → IN_PROGRESS → SUCCESS | FAILURE`), the orchestrator that
//!   drives compilation, and the progress stream frames it emits.
//! - [`compiler`] — the [`compiler::FlowCompiler`] / [`compiler::CompiledFlow`]
//!   seam between orchestration and whatever actually turns a graph
//!   description into something that can answer.
//! - [`chat`] — `(flow, chat)`-keyed sessions with lazily rebuilt artifacts
//!   and in-memory transcripts.
//! - [`persistence`] / [`auth`] — collaborator traits for durable flows,
//!   chat transcripts, and caller identity, with in-memory/static
//!   implementations.
//! - [`server`] — the axum surface: build endpoints, the SSE progress
//!   stream, the chat websocket, transcript CRUD.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use flowchat::auth::StaticTokenAuth;
//! use flowchat::build::{BuildOrchestrator, BuildStateMachine};
//! use flowchat::cache::InMemoryCacheStore;
//! use flowchat::chat::ChatManager;
//! use flowchat::compiler::EchoCompiler;
//! use flowchat::persistence::{InMemoryFlowStore, InMemoryMessageStore};
//! use flowchat::server::{self, AppState};
//!
//! let cache = Arc::new(InMemoryCacheStore::new());
//! let build_state = Arc::new(BuildStateMachine::new(cache, Duration::from_secs(600)));
//! let compiler = Arc::new(EchoCompiler::new());
//! let flows = Arc::new(InMemoryFlowStore::new());
//! let chat = Arc::new(ChatManager::new(
//!     flows.clone(),
//!     build_state.clone(),
//!     compiler.clone(),
//! ));
//! let orchestrator = Arc::new(BuildOrchestrator::new(
//!     build_state.clone(),
//!     compiler,
//!     chat.clone(),
//! ));
//! let router = server::router(AppState {
//!     build_state,
//!     orchestrator,
//!     chat,
//!     auth: Arc::new(StaticTokenAuth::open(1)),
//!     flows,
//!     messages: Arc::new(InMemoryMessageStore::new()),
//! });
//! ```

pub mod auth;
pub mod build;
pub mod cache;
pub mod chat;
pub mod compiler;
pub mod config;
pub mod message;
pub mod persistence;
pub mod server;
pub mod telemetry;
