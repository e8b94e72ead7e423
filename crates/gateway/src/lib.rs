//! HTTP gateway for Quarry.
//!
//! Exposes a health check and the v1 API, whose main endpoint streams a
//! run's events over SSE. Built on Axum.

pub mod api_v1;

use axum::extract::DefaultBodyLimit;
use axum::{Router, response::Json, routing::get};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use quarry_core::event::EventBus;
use quarry_core::tool::ToolService;
use quarry_orchestrator::Orchestrator;
use quarry_providers::OpenAiCompatProvider;
use quarry_tools::HttpToolService;

/// Build the full router: `/health` plus the v1 API under `/v1`.
///
/// Layers: request body limit (1 MB) and HTTP trace logging.
pub fn build_router(api_state: api_v1::SharedApiState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", api_v1::v1_router(api_state))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
///
/// Connects to the model provider and the tool service once; every run
/// shares them.
pub async fn start(config: quarry_config::AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let provider = Arc::new(OpenAiCompatProvider::from_config(&config)?);
    let tools: Arc<dyn ToolService> =
        Arc::new(HttpToolService::from_config(&config.tool_service).await?);
    info!(
        tool_service = %config.tool_service.url,
        tools = tools.definitions().len(),
        "Tool catalog loaded"
    );

    let event_bus = Arc::new(EventBus::default());
    let orchestrator = Orchestrator::from_config(provider, tools.clone(), &config)
        .with_event_bus(event_bus.clone());

    let api_state = Arc::new(api_v1::ApiV1State {
        orchestrator,
        tools,
        event_bus,
    });
    let app = build_router(api_state);

    info!(addr = %addr, model = %config.model, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
