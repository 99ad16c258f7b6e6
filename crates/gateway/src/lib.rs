//! HTTP gateway for Storyloom.
//!
//! Exposes the turn pipeline to the canvas front-end: a health check plus
//! the v1 API (role registry and turn execution).
//!
//! Built on Axum. One [`TurnPipeline`] is built at startup and shared by
//! every request; turns never share mutable state.

pub mod api_v1;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use axum::{Router, response::Json, routing::get};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use storyloom_agent::TurnPipeline;
use storyloom_config::{AppConfig, GatewayConfig};

/// Request bodies above this size are rejected with 413.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub pipeline: TurnPipeline,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(pipeline: TurnPipeline) -> SharedState {
        Arc::new(Self { pipeline })
    }
}

/// Build the full router: `/health` plus the v1 API.
///
/// Layers applied:
/// - CORS limited to the configured front-end origins
/// - Request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(state: SharedState, config: &GatewayConfig) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors_layer(&config.allowed_origins))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(3600))
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    if !config.has_api_key() {
        warn!("No API key configured; turns will answer with the not-configured reply");
    }
    let provider = storyloom_providers::build_from_config(&config.llm);
    let pipeline = TurnPipeline::from_config(&config, provider);
    info!(
        provider = %config.llm.provider,
        answer_model = %config.llm.answer_model,
        retrieval = pipeline.has_retriever(),
        "Turn pipeline ready"
    );

    let app = build_router(GatewayState::new(pipeline), &config.gateway);

    info!(addr = %addr, "Gateway starting");
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
