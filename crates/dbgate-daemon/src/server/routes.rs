//! HTTP routes: `POST /execute` and `GET /health`.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tracing::warn;

use dbgate_core::ExecError;

use crate::gateway::Gateway;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
}

/// Response envelope shared by successes and failures.
#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub output: String,
    pub error: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub live: bool,
    pub queue_length: usize,
}

/// Build the HTTP router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/execute", post(execute))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// `POST /execute` with `{"command": "..."}`.
pub async fn execute(
    State(state): State<AppState>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Response {
    let command = match &payload {
        Ok(Json(body)) => body.get("command").and_then(serde_json::Value::as_str),
        Err(rejection) => {
            warn!(error = %rejection, "Rejected malformed execute request");
            None
        }
    };
    let Some(command) = command else {
        return failure(&ExecError::InvalidInput("missing command".into()));
    };

    match state.gateway.execute(command).await {
        Ok(out) => Json(ExecuteResponse {
            output: out.body,
            error: out.is_error,
        })
        .into_response(),
        Err(e) => failure(&e),
    }
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let health = state.gateway.health();
    Json(HealthResponse {
        status: if health.live { "healthy" } else { "unhealthy" },
        live: health.live,
        queue_length: health.queue_depth,
    })
}

fn failure(err: &ExecError) -> Response {
    let (status, message) = match err {
        ExecError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "Invalid command format"),
        ExecError::Unavailable => (
            StatusCode::SERVICE_UNAVAILABLE,
            "DBMS is temporarily unavailable. Please try again shortly.",
        ),
        ExecError::TimedOut { .. } => (StatusCode::GATEWAY_TIMEOUT, "Command timed out"),
        ExecError::WriteFailed(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to send command to DBMS",
        ),
        ExecError::Terminated => (
            StatusCode::SERVICE_UNAVAILABLE,
            "DBMS process exited while running the command",
        ),
        ExecError::Internal(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error during command processing",
        ),
    };
    (
        status,
        Json(ExecuteResponse {
            output: message.to_string(),
            error: true,
        }),
    )
        .into_response()
}
