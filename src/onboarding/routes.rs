//! REST endpoints for the onboarding flow.
//!
//! Caller identity comes from the `x-user-id` header, set by the
//! authentication layer in front of this service.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tracing::{debug, warn};

use crate::error::OnboardingError;

use super::manager::SessionManager;

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Shared state for onboarding routes.
#[derive(Clone)]
pub struct OnboardingRouteState {
    pub manager: Arc<SessionManager>,
}

/// Build the onboarding REST routes.
pub fn onboarding_routes(state: OnboardingRouteState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/onboarding/status", get(get_status))
        .route("/api/onboarding/steps/{step_key}", get(get_step_schema))
        .route("/api/onboarding/steps/{step_key}/answers", post(submit_answers))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "onboarding-engine"
    }))
}

/// GET /api/onboarding/steps/{step_key}
async fn get_step_schema(
    State(state): State<OnboardingRouteState>,
    Path(step_key): Path<String>,
) -> Response {
    match state.manager.get_step_schema(&step_key).await {
        Ok(schema) => Json(schema).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/onboarding/steps/{step_key}/answers
///
/// Accepts either the answers object itself or `{"answers": {...}}`.
/// A body that is not JSON is reported like any other malformed payload.
async fn submit_answers(
    State(state): State<OnboardingRouteState>,
    Path(step_key): Path<String>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Some(user_id) = user_id(&headers) else {
        return unauthorized();
    };
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            debug!(step_key, "Rejected answers body: {rejection}");
            return error_response(OnboardingError::InvalidInputShape);
        }
    };
    let answers = unwrap_answers(body);
    match state
        .manager
        .submit_step_answers(&user_id, &step_key, answers)
        .await
    {
        Ok(result) => Json(result).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/onboarding/status
async fn get_status(State(state): State<OnboardingRouteState>, headers: HeaderMap) -> Response {
    let Some(user_id) = user_id(&headers) else {
        return unauthorized();
    };
    match state.manager.get_status(&user_id).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => error_response(e),
    }
}

fn user_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `{"answers": {...}}` envelopes are unwrapped; anything else is passed
/// through as the answers payload.
fn unwrap_answers(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.len() == 1 && map.get("answers").is_some_and(Value::is_object) => {
            map.remove("answers").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": format!("Missing {USER_ID_HEADER} header")})),
    )
        .into_response()
}

fn error_response(err: OnboardingError) -> Response {
    let status = match &err {
        OnboardingError::StepNotFound { .. } => StatusCode::NOT_FOUND,
        OnboardingError::InvalidInputShape => StatusCode::BAD_REQUEST,
        OnboardingError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        OnboardingError::Internal(e) => {
            warn!("Onboarding request failed: {e}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Internal server error"})),
            )
                .into_response();
        }
    };
    (status, Json(serde_json::json!({"error": err.to_string()}))).into_response()
}
