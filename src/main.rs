//! Standalone server binary: in-memory stores, echo compiler, open auth.

use std::sync::Arc;

use miette::IntoDiagnostic;
use tokio::net::TcpListener;

use flowchat::auth::StaticTokenAuth;
use flowchat::build::{BuildOrchestrator, BuildStateMachine};
use flowchat::cache::create_cache_store;
use flowchat::chat::ChatManager;
use flowchat::compiler::EchoCompiler;
use flowchat::config::Settings;
use flowchat::persistence::{InMemoryFlowStore, InMemoryMessageStore};
use flowchat::server::{self, AppState};
use flowchat::telemetry;

#[tokio::main]
async fn main() -> miette::Result<()> {
    telemetry::init();
    let settings = Settings::from_env();

    let cache = create_cache_store(&settings.cache).await;
    let build_state = Arc::new(BuildStateMachine::new(cache, settings.build_ttl));
    let compiler = Arc::new(EchoCompiler::new());
    let flows = Arc::new(InMemoryFlowStore::new());
    let chat = Arc::new(ChatManager::new(
        flows.clone(),
        build_state.clone(),
        compiler.clone(),
    ));
    let orchestrator = Arc::new(BuildOrchestrator::new(
        build_state.clone(),
        compiler,
        chat.clone(),
    ));

    let router = server::router(AppState {
        build_state,
        orchestrator,
        chat,
        auth: Arc::new(StaticTokenAuth::open(1)),
        flows,
        messages: Arc::new(InMemoryMessageStore::new()),
    });

    let listener = TcpListener::bind(&settings.bind_addr)
        .await
        .into_diagnostic()?;
    tracing::info!(addr = %settings.bind_addr, "serving");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .into_diagnostic()?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received");
}
