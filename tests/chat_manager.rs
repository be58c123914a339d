//! Connection admission and session lifecycle against the full stack.

mod common;

use std::sync::Arc;

use flowchat::chat::ConnectionRejection;
use flowchat::compiler::EntryPoint;
use flowchat::message::Message;
use flowchat::persistence::{FlowRead, PublishedStatus};

use common::{ScriptedCompiler, collect_frames, harness};

const GRAPH: &str = r#"{"nodes": [{"id": "n1"}]}"#;

fn compiler() -> Arc<ScriptedCompiler> {
    Arc::new(ScriptedCompiler::succeeding(vec![
        EntryPoint::conversational("entry", vec!["input".to_string()]),
    ]))
}

#[tokio::test]
async fn debug_connection_is_turned_away_until_built() {
    let h = harness(compiler());
    match h.chat.resolve_graph("f1", None).await {
        Err(ConnectionRejection::TryAgainLater { reason }) => {
            assert_eq!(reason, "The flow has not passed compilation");
        }
        other => panic!("expected TryAgainLater, got {other:?}"),
    }

    h.state.initialize("f1", GRAPH).await.unwrap();
    collect_frames(h.orchestrator.stream_build("f1".into(), None)).await;
    assert_eq!(h.chat.resolve_graph("f1", None).await.unwrap(), GRAPH);
}

#[tokio::test]
async fn named_connection_is_policed_by_publication_state() {
    let h = harness(compiler());

    let rejection = h.chat.resolve_graph("f1", Some("c1")).await.unwrap_err();
    assert!(matches!(rejection, ConnectionRejection::Policy { .. }));
    assert_eq!(rejection.close_code(), 1008);

    h.flows.insert(FlowRead {
        id: "f1".into(),
        name: "assistant".into(),
        description: "demo".into(),
        definition_data: GRAPH.into(),
        published_status: PublishedStatus::Draft,
    });
    let rejection = h.chat.resolve_graph("f1", Some("c1")).await.unwrap_err();
    assert_eq!(rejection.close_code(), 1008);
    assert!(rejection.reason().contains("not published"));

    h.flows.insert(FlowRead {
        id: "f1".into(),
        name: "assistant".into(),
        description: "demo".into(),
        definition_data: GRAPH.into(),
        published_status: PublishedStatus::Online,
    });
    // Published flows chat against durable storage, not the build cache.
    assert_eq!(h.chat.resolve_graph("f1", Some("c1")).await.unwrap(), GRAPH);
}

#[tokio::test]
async fn rejection_codes_match_their_class() {
    let h = harness(compiler());
    let try_again = h.chat.resolve_graph("f1", None).await.unwrap_err();
    assert_eq!(try_again.close_code(), 1013);
    let policy = h.chat.resolve_graph("f1", Some("c1")).await.unwrap_err();
    assert_eq!(policy.close_code(), 1008);
}

#[tokio::test]
async fn turns_flow_through_a_lazily_built_artifact() {
    let scripted = compiler();
    let h = harness(scripted.clone());
    let session = h.chat.attach("f1", Some("c1"), GRAPH.into()).await;
    assert_eq!(scripted.compile_count(), 0);

    let replies = h
        .chat
        .relay_turn(&session, Message::user("hello"))
        .await
        .unwrap();
    assert_eq!(replies, vec![Message::assistant("ok: hello")]);
    assert_eq!(scripted.compile_count(), 1);

    // The artifact is cached across turns.
    h.chat
        .relay_turn(&session, Message::user("again"))
        .await
        .unwrap();
    assert_eq!(scripted.compile_count(), 1);
    assert_eq!(session.lock().await.history().len(), 4);
}

#[tokio::test]
async fn invalidated_artifact_is_rebuilt_on_the_next_turn() {
    let scripted = compiler();
    let h = harness(scripted.clone());
    let session = h.chat.attach("f1", Some("c1"), GRAPH.into()).await;
    h.chat
        .relay_turn(&session, Message::user("one"))
        .await
        .unwrap();

    h.chat.drop_artifact("f1", Some("c1")).await;
    h.chat
        .relay_turn(&session, Message::user("two"))
        .await
        .unwrap();
    assert_eq!(scripted.compile_count(), 2);
}

#[tokio::test]
async fn debug_sessions_never_resume() {
    let h = harness(compiler());
    let first = h.chat.attach("f1", None, GRAPH.into()).await;
    h.chat
        .relay_turn(&first, Message::user("scratch"))
        .await
        .unwrap();

    let second = h.chat.attach("f1", None, GRAPH.into()).await;
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(second.lock().await.history().is_empty());
}

#[tokio::test]
async fn named_sessions_resume_their_transcript() {
    let h = harness(compiler());
    let first = h.chat.attach("f1", Some("c1"), GRAPH.into()).await;
    h.chat
        .relay_turn(&first, Message::user("kept"))
        .await
        .unwrap();

    // Simulate disconnect and reconnect.
    h.chat.detach("f1", Some("c1")).await;
    let second = h.chat.attach("f1", Some("c1"), GRAPH.into()).await;
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.lock().await.history().len(), 2);
}

#[tokio::test]
async fn reset_history_is_idempotent() {
    let h = harness(compiler());
    let session = h.chat.attach("f1", Some("c1"), GRAPH.into()).await;
    h.chat
        .relay_turn(&session, Message::user("hi"))
        .await
        .unwrap();

    h.chat.reset_history("f1", Some("c1")).await;
    h.chat.reset_history("f1", Some("c1")).await;
    assert!(session.lock().await.history().is_empty());
}
