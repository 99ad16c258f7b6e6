//! HTTP API v1.
//!
//! Endpoints:
//!
//! - `GET  /v1/roles`: The persona registry with each role's canvas operations
//! - `POST /v1/turns`: Run one turn: `TurnRequest` in, `TurnOutcome` out

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde::Serialize;
use tracing::info;

use storyloom_core::message::{Role, last_user_text};
use storyloom_core::role::{self, RoleProfile};
use storyloom_core::{TurnOutcome, TurnRequest};

use crate::SharedState;

/// Build the v1 router.
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/roles", get(list_roles_handler))
        .route("/turns", post(turn_handler))
        .with_state(state)
}

#[derive(Serialize)]
struct RoleListResponse {
    default_role: &'static str,
    supervisor_role: &'static str,
    roles: &'static [RoleProfile],
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse { error: message.into() }),
    )
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn list_roles_handler() -> Json<RoleListResponse> {
    Json(RoleListResponse {
        default_role: role::DEFAULT_ROLE_ID,
        supervisor_role: role::SUPERVISOR_ROLE_ID,
        roles: role::all(),
    })
}

async fn turn_handler(
    State(state): State<SharedState>,
    Json(request): Json<TurnRequest>,
) -> Result<Json<TurnOutcome>, ApiError> {
    if !request.messages.iter().any(|m| m.role == Role::User) {
        return Err(bad_request("messages must contain at least one user message"));
    }
    if last_user_text(&request.messages).trim().is_empty() {
        return Err(bad_request("the latest user message is empty"));
    }

    info!(
        messages = request.messages.len(),
        loop_count = request.agent_loop_count,
        has_canvas = request.canvas_context.is_some(),
        "v1/turns request"
    );

    let outcome = state.pipeline.run(request).await;
    Ok(Json(outcome))
}
