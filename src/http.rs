// Copyright 2025 Cowboy AI, LLC.

//! HTTP surface of the saga coordinator
//!
//! All endpoints speak JSON; responses carry the saga's correlation id.
//! A shared-secret header (`X-API-Key`) gates the surface when a key is
//! configured; liveness stays open. The module also provides the router
//! adapter a participant service mounts to expose the participant contract
//! over HTTP.

use crate::errors::CoordinationError;
use crate::identifiers::SagaId;
use crate::orchestrator::SagaOrchestrator;
use crate::participant::{CompensateStepRequest, ExecuteStepRequest, SagaParticipant};
use crate::saga::SagaRequest;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceBuilder;

/// Shared state behind the coordinator routes
#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<SagaOrchestrator>,
    api_key: Option<String>,
}

/// Build the coordinator's router
pub fn router(orchestrator: Arc<SagaOrchestrator>) -> Router {
    let api_key = orchestrator.config().api_key.clone();
    let state = AppState {
        orchestrator,
        api_key,
    };

    let gated = Router::new()
        .route("/saga/execute", post(execute_saga))
        .route("/saga/status/:saga_id", get(saga_status))
        .route("/saga/compensate/:saga_id", post(compensate_saga))
        .route("/saga/metrics", get(metrics))
        .route("/saga/events/statistics", get(event_statistics))
        .layer(
            ServiceBuilder::new().layer(axum::middleware::from_fn_with_state(
                state.clone(),
                require_api_key,
            )),
        )
        .with_state(state.clone());

    Router::new()
        .route("/saga/health", get(health))
        .with_state(state)
        .merge(gated)
}

async fn require_api_key(
    State(state): State<AppState>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(expected) = &state.api_key {
        let provided = req
            .headers()
            .get("x-api-key")
            .and_then(|value| value.to_str().ok());
        if provided != Some(expected.as_str()) {
            return Err(StatusCode::UNAUTHORIZED);
        }
    }
    Ok(next.run(req).await)
}

async fn execute_saga(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    // Decoded by hand so an unknown saga type or malformed field reads as a
    // validation error (400), not a generic extractor rejection.
    let request: SagaRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(err) => {
            return json_error(StatusCode::BAD_REQUEST, "validation_error", err.to_string())
        }
    };
    match state.orchestrator.execute_saga(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn saga_status(State(state): State<AppState>, Path(saga_id): Path<String>) -> Response {
    let saga_id = match saga_id.parse::<SagaId>() {
        Ok(id) => id,
        Err(_) => {
            return json_error(
                StatusCode::BAD_REQUEST,
                "invalid_saga_id",
                format!("{saga_id} is not a valid saga id"),
            )
        }
    };
    match state.orchestrator.get_saga_status(saga_id).await {
        Ok(saga) => (StatusCode::OK, Json(saga)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn compensate_saga(State(state): State<AppState>, Path(saga_id): Path<String>) -> Response {
    let saga_id = match saga_id.parse::<SagaId>() {
        Ok(id) => id,
        Err(_) => {
            return json_error(
                StatusCode::BAD_REQUEST,
                "invalid_saga_id",
                format!("{saga_id} is not a valid saga id"),
            )
        }
    };
    match state.orchestrator.compensate(saga_id).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.orchestrator.metrics().render() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

async fn event_statistics(State(state): State<AppState>) -> Response {
    let stats = state.orchestrator.event_statistics().await;
    (StatusCode::OK, Json(stats)).into_response()
}

async fn health() -> Response {
    (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
}

/// Router a participant service mounts under its own prefix
///
/// Exposes `POST /saga/participate`, `POST /saga/compensate`, and
/// `GET /saga/info` over any [`SagaParticipant`].
pub fn participant_router(participant: Arc<dyn SagaParticipant>) -> Router {
    Router::new()
        .route("/saga/participate", post(participate))
        .route("/saga/compensate", post(compensate_step))
        .route("/saga/info", get(participant_info))
        .with_state(participant)
}

/// Convenience wrapper nesting the participant router under
/// `/{service_name}`
pub fn participant_app(participant: Arc<dyn SagaParticipant>) -> Router {
    let service = participant.info().service_name;
    Router::new().nest(&format!("/{service}"), participant_router(participant))
}

async fn participate(
    State(participant): State<Arc<dyn SagaParticipant>>,
    Json(request): Json<ExecuteStepRequest>,
) -> Response {
    match participant.execute_step(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn compensate_step(
    State(participant): State<Arc<dyn SagaParticipant>>,
    Json(request): Json<CompensateStepRequest>,
) -> Response {
    match participant.compensate_step(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn participant_info(State(participant): State<Arc<dyn SagaParticipant>>) -> Response {
    (StatusCode::OK, Json(participant.info())).into_response()
}

fn error_response(err: CoordinationError) -> Response {
    let status = if err.is_validation_error() {
        StatusCode::BAD_REQUEST
    } else if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if err.is_conflict() {
        StatusCode::CONFLICT
    } else if matches!(
        err,
        CoordinationError::EventLogUnavailable(_) | CoordinationError::StoreError(_)
    ) {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    json_error(status, error_code(&err), err.to_string())
}

fn error_code(err: &CoordinationError) -> &'static str {
    match err {
        CoordinationError::SagaNotFound(_) => "saga_not_found",
        CoordinationError::PlanUnknown(_) => "plan_unknown",
        CoordinationError::AlreadyExists(_) => "already_exists",
        CoordinationError::SagaAlreadyTerminal { .. } => "saga_terminal",
        CoordinationError::InvalidStateTransition { .. } => "invalid_transition",
        CoordinationError::ConcurrencyConflict { .. } => "concurrency_conflict",
        CoordinationError::ValidationError(_) => "validation_error",
        CoordinationError::ParticipantUnresolved { .. } => "participant_unresolved",
        CoordinationError::ParticipantUnreachable { .. } => "participant_unreachable",
        CoordinationError::Timeout(_) => "timeout",
        CoordinationError::EventLogUnavailable(_) => "event_log_unavailable",
        CoordinationError::StoreError(_) => "store_error",
        CoordinationError::Serialization(_) => "serialization_error",
        CoordinationError::Metrics(_) => "metrics_error",
        CoordinationError::Generic(_) => "coordination_error",
    }
}

fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
