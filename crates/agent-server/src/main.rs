//! home-agents HTTP Server
//!
//! Axum-based agent server: publishes an agent card, runs inbound tasks
//! through the reasoning loop and streams their messages back over SSE.
//!
//! The same binary serves as the device agent (with a `TOOL_ENDPOINT`) and
//! as the home agent (with `PEER_AGENT_URLS`).

mod catalog;
mod config;
mod handlers;
mod runner;
mod state;
mod tasks;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::bridge::ToolConnector;
use agent_core::card::CapabilityRegistry;
use agent_core::delegation::Delegator;
use agent_core::protocol::{AGENT_CARD_PATH, INVOKE_PATH, STREAM_PATH};
use agent_core::reasoning::Agent;
use agent_runtime::{A2aClient, McpConnector};

use crate::catalog::CatalogRefresher;
use crate::config::ServerConfig;
use crate::handlers::{agent_card, cancel_task, health_check, invoke_task, stream_task};
use crate::state::AppState;
use crate::tasks::TaskTable;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();
    let config = ServerConfig::from_env()?;

    // Initialize LLM provider
    let model = agent_runtime::resolve(&config.provider, &config.providers)?;
    if model.health_check().await {
        tracing::info!(provider = model.provider_name(), model = model.model(), "✓ Model backend reachable");
    } else {
        tracing::warn!(provider = model.provider_name(), model = model.model(), "⚠ Model backend not reachable; tasks will fail until it is");
    }

    // Capability sources
    let registry = Arc::new(CapabilityRegistry::new(config.identity()));
    let delegator: Arc<dyn Delegator> =
        Arc::new(A2aClient::new(config.bridge_timeouts.connect, config.discovery_timeout)?);
    let connector = match &config.tool_endpoint {
        Some(endpoint) => Some(Arc::new(McpConnector::new(endpoint.clone())?) as Arc<dyn ToolConnector>),
        None => None,
    };

    let mut refresher = CatalogRefresher::new(
        registry.clone(),
        connector.clone(),
        delegator.clone(),
        config.peer_urls.clone(),
        config.bridge_timeouts.clone(),
        config.retry.clone(),
    );
    let card = refresher.refresh().await;
    tracing::info!(skills = card.skills.len(), "Published agent card:");
    for skill in &card.skills {
        tracing::info!("  • {} ({})", skill.id, skill.peer().map_or("local", |p| p.name.as_str()));
    }

    let shutdown = CancellationToken::new();
    let catalog = tokio::spawn(refresher.run(config.card_refresh, shutdown.clone()));

    // Build application state
    let tasks = TaskTable::new();
    let state = AppState {
        agent: Arc::new(Agent::new(model, registry.clone(), Some(delegator), config.agent.clone())),
        registry,
        connector,
        bridge_timeouts: config.bridge_timeouts.clone(),
        retry: config.retry.clone(),
        tasks: tasks.clone(),
    };

    let app = build_router(state, config.cors_permissive);

    // Start server
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 {} running on http://{}", config.name, addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  {AGENT_CARD_PATH} - Agent card");
    tracing::info!("  POST {STREAM_PATH}                  - Streamed task");
    tracing::info!("  POST {INVOKE_PATH}                         - Task, single response");
    tracing::info!("  POST /a2a/tasks/{{task_id}}/cancel   - Cancel a task");
    tracing::info!("  GET  /health                       - Health check");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown, tasks))
        .await?;

    if let Err(e) = catalog.await {
        tracing::warn!(error = %e, "Catalog refresher ended abnormally");
    }
    tracing::info!("Server stopped");

    Ok(())
}

/// Router for all agent endpoints
pub(crate) fn build_router(state: AppState, cors_permissive: bool) -> Router {
    let router = Router::new()
        // Health & discovery
        .route("/health", get(health_check))
        .route(AGENT_CARD_PATH, get(agent_card))
        // Agent protocol
        .route(INVOKE_PATH, post(invoke_task))
        .route(STREAM_PATH, post(stream_task))
        .route("/a2a/tasks/{task_id}/cancel", post(cancel_task))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if cors_permissive {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router.layer(cors)
    } else {
        router
    }
}

/// Resolves on SIGINT/SIGTERM after cancelling in-flight work
async fn shutdown_signal(shutdown: CancellationToken, tasks: TaskTable) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!(in_flight = tasks.len(), "Shutting down");
    shutdown.cancel();
    tasks.cancel_all();
}
