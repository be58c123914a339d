//! Reference compiler used by the server binary and tests.
//!
//! Compiles any non-empty graph description into an artifact that answers
//! each turn by echoing it back. Real deployments plug in their own
//! [`FlowCompiler`]; this one exists so the crate runs end to end without an
//! external compiler.

use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::json;

use crate::message::Message;

use super::{
    CompileError, CompileRequest, CompileStream, CompiledFlow, CompilerEvent, EntryPoint,
    TurnError,
};

/// Compiler that emits a couple of progress notes and completes with an
/// [`EchoFlow`].
#[derive(Clone, Debug, Default)]
pub struct EchoCompiler;

impl EchoCompiler {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl super::FlowCompiler for EchoCompiler {
    async fn compile(&self, request: CompileRequest) -> Result<CompileStream, CompileError> {
        let CompileRequest {
            graph_data,
            flow_id,
            ..
        } = request;
        let stream = try_stream! {
            yield CompilerEvent::Progress(json!({
                "log": format!("compiling flow {flow_id}"),
            }));
            serde_json::from_str::<serde_json::Value>(&graph_data)
                .map_err(|err| CompileError::Graph(err.to_string()))?;
            yield CompilerEvent::Progress(json!({
                "log": "graph validated",
            }));
            yield CompilerEvent::Completed(
                Box::new(EchoFlow::new()) as Box<dyn CompiledFlow>
            );
        };
        Ok(stream.boxed())
    }
}

/// Artifact that echoes each inbound turn.
#[derive(Clone, Debug, Default)]
pub struct EchoFlow {
    realized: bool,
}

impl EchoFlow {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CompiledFlow for EchoFlow {
    async fn realize(&mut self) -> Result<(), CompileError> {
        self.realized = true;
        Ok(())
    }

    fn entry_points(&self) -> Vec<EntryPoint> {
        vec![EntryPoint::conversational(
            "echo-input",
            vec!["input".to_string()],
        )]
    }

    async fn respond(&mut self, inbound: &Message) -> Result<Vec<Message>, TurnError> {
        if !self.realized {
            return Err(TurnError("artifact was not realized".to_string()));
        }
        Ok(vec![Message::assistant(&inbound.content)])
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;
    use crate::compiler::FlowCompiler;

    #[tokio::test]
    async fn compiles_valid_graph_to_echo_artifact() {
        let compiler = EchoCompiler::new();
        let mut stream = compiler
            .compile(CompileRequest {
                graph_data: r#"{"nodes": []}"#.to_string(),
                flow_id: "f1".to_string(),
                chat_id: None,
            })
            .await
            .unwrap();

        let mut artifact = None;
        let mut progress = 0;
        while let Some(item) = stream.next().await {
            match item.unwrap() {
                CompilerEvent::Progress(_) => progress += 1,
                CompilerEvent::Completed(flow) => artifact = Some(flow),
            }
        }
        assert_eq!(progress, 2);

        let mut artifact = artifact.expect("artifact produced");
        artifact.realize().await.unwrap();
        let outbound = artifact.respond(&Message::user("hi")).await.unwrap();
        assert_eq!(outbound, vec![Message::assistant("hi")]);
    }

    #[tokio::test]
    async fn invalid_graph_fails_mid_stream() {
        let compiler = EchoCompiler::new();
        let mut stream = compiler
            .compile(CompileRequest {
                graph_data: "not json".to_string(),
                flow_id: "f1".to_string(),
                chat_id: None,
            })
            .await
            .unwrap();

        let mut saw_error = false;
        while let Some(item) = stream.next().await {
            if item.is_err() {
                saw_error = true;
                break;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn unrealized_artifact_rejects_turns() {
        let mut flow = EchoFlow::new();
        assert!(flow.respond(&Message::user("hi")).await.is_err());
    }
}
