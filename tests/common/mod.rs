//! Shared fixtures: a scriptable compiler and a fully wired harness.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;

use flowchat::build::{BuildOrchestrator, BuildStateMachine, StreamData};
use flowchat::cache::InMemoryCacheStore;
use flowchat::chat::ChatManager;
use flowchat::compiler::{
    CompileError, CompileRequest, CompileStream, CompiledFlow, CompilerEvent, EntryPoint,
    FlowCompiler, TurnError,
};
use flowchat::message::Message;
use flowchat::persistence::InMemoryFlowStore;

/// How a scripted compilation run ends.
#[derive(Clone)]
pub enum Outcome {
    Succeed {
        reply: String,
        entry_points: Vec<EntryPoint>,
    },
    FailMidStream(String),
    FailRealize(String),
}

/// Compiler that plays back a fixed script, counting invocations.
pub struct ScriptedCompiler {
    pub outcome: Outcome,
    pub progress: Vec<Value>,
    /// Inserted before the final event; lets tests hold a build in flight.
    pub delay: Duration,
    pub compiles: AtomicUsize,
}

impl ScriptedCompiler {
    pub fn succeeding(entry_points: Vec<EntryPoint>) -> Self {
        Self {
            outcome: Outcome::Succeed {
                reply: "ok".to_string(),
                entry_points,
            },
            progress: Vec::new(),
            delay: Duration::ZERO,
            compiles: AtomicUsize::new(0),
        }
    }

    pub fn with_outcome(outcome: Outcome) -> Self {
        Self {
            outcome,
            progress: Vec::new(),
            delay: Duration::ZERO,
            compiles: AtomicUsize::new(0),
        }
    }

    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FlowCompiler for ScriptedCompiler {
    async fn compile(&self, _request: CompileRequest) -> Result<CompileStream, CompileError> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        let outcome = self.outcome.clone();
        let progress = self.progress.clone();
        let delay = self.delay;
        let stream = try_stream! {
            for frame in progress {
                yield CompilerEvent::Progress(frame);
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match outcome {
                Outcome::Succeed {
                    reply,
                    entry_points,
                } => {
                    let flow = TestFlow::new(reply, entry_points, None);
                    yield CompilerEvent::Completed(Box::new(flow));
                }
                Outcome::FailMidStream(message) => {
                    Err(CompileError::Graph(message))?;
                }
                Outcome::FailRealize(message) => {
                    let flow = TestFlow::new(String::new(), Vec::new(), Some(message));
                    yield CompilerEvent::Completed(Box::new(flow));
                }
            }
        };
        Ok(stream.boxed())
    }
}

/// Artifact produced by [`ScriptedCompiler`].
pub struct TestFlow {
    realized: bool,
    reply: String,
    entry_points: Vec<EntryPoint>,
    realize_error: Option<String>,
}

impl TestFlow {
    pub fn new(reply: String, entry_points: Vec<EntryPoint>, realize_error: Option<String>) -> Self {
        Self {
            realized: false,
            reply,
            entry_points,
            realize_error,
        }
    }
}

#[async_trait]
impl CompiledFlow for TestFlow {
    async fn realize(&mut self) -> Result<(), CompileError> {
        if let Some(message) = &self.realize_error {
            return Err(CompileError::Realize(message.clone()));
        }
        self.realized = true;
        Ok(())
    }

    fn entry_points(&self) -> Vec<EntryPoint> {
        self.entry_points.clone()
    }

    async fn respond(&mut self, inbound: &Message) -> Result<Vec<Message>, TurnError> {
        if !self.realized {
            return Err(TurnError("artifact not realized".to_string()));
        }
        Ok(vec![Message::assistant(&format!(
            "{}: {}",
            self.reply, inbound.content
        ))])
    }
}

pub struct Harness {
    pub state: Arc<BuildStateMachine>,
    pub chat: Arc<ChatManager>,
    pub orchestrator: Arc<BuildOrchestrator>,
    pub flows: Arc<InMemoryFlowStore>,
}

/// Wire the full build/chat stack over an in-memory cache.
pub fn harness(compiler: Arc<dyn FlowCompiler>) -> Harness {
    let state = Arc::new(BuildStateMachine::new(
        Arc::new(InMemoryCacheStore::new()),
        Duration::from_secs(600),
    ));
    let flows = Arc::new(InMemoryFlowStore::new());
    let chat = Arc::new(ChatManager::new(
        flows.clone(),
        state.clone(),
        compiler.clone(),
    ));
    let orchestrator = Arc::new(BuildOrchestrator::new(
        state.clone(),
        compiler,
        chat.clone(),
    ));
    Harness {
        state,
        chat,
        orchestrator,
        flows,
    }
}

/// Drain a progress stream to completion.
pub async fn collect_frames(rx: flume::Receiver<StreamData>) -> Vec<StreamData> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.recv_async().await {
        frames.push(frame);
    }
    frames
}
