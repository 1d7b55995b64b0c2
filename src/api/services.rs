use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    models::{HealthResponse, JobAcceptedResponse, OperationsQuery},
    state::AppState,
    validation::JobValidationError,
};
use crate::api::error::ApiError;
use crate::orchestrator::JobRequest;

/// Job intake endpoint (POST /jobs)
///
/// ## Flow:
/// 1. Validate Content-Type (application/json, optional charset)
/// 2. Read the body (gzip already undone by RequestDecompressionLayer) up to the size limit
/// 3. Deserialize and validate the JobRequest
/// 4. Assign a UUIDv7 job_id unless the caller supplied one
/// 5. Hand the job to the broker and return 202 with the intake sequence
///
/// Nothing is reserved here. The worker reserves funds when it picks the job up,
/// so a job rejected for insufficient funds is still accepted by this endpoint.
pub async fn submit_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    super::utils::require_json(&headers)?;
    let body_bytes = super::utils::read_limited(body, state.config.server.max_payload_bytes).await?;

    let mut request: JobRequest = serde_json::from_slice(&body_bytes)?;
    super::validation::validate_job(&request).map_err(map_validation_error)?;

    let job_id = request
        .job_id
        .get_or_insert_with(|| Uuid::now_v7().to_string())
        .clone();
    let user_id = request.user_id;
    let kind = request.kind;

    let seq = state.broker.enqueue(request).await.map_err(|e| {
        warn!(job_id = %job_id, error = %e, "Failed to hand job to workers");
        ApiError::Unavailable(e.to_string())
    })?;

    state.metrics.job_accepted();
    info!(job_id = %job_id, user_id, kind = %kind, seq, "Job accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(JobAcceptedResponse { job_id, seq }),
    ))
}

fn map_validation_error(err: JobValidationError) -> ApiError {
    ApiError::InvalidPayload(err.to_string())
}

/// Account row for a user (GET /users/{user_id}/balance)
///
/// Users without a row get a zero balance rather than 404.
pub async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let account = state.ledger.account(user_id)?;
    Ok((StatusCode::OK, Json(account)))
}

/// Newest-first operations for a user (GET /users/{user_id}/operations?limit=N)
pub async fn list_operations(
    State(state): State<AppState>,
    Path(user_id): Path<u64>,
    Query(query): Query<OperationsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let operations = state
        .ledger
        .operations_for_user(user_id, query.effective_limit())?;
    Ok((StatusCode::OK, Json(operations)))
}

/// Usage aggregates for a user (GET /users/{user_id}/stats)
pub async fn get_user_stats(
    State(state): State<AppState>,
    Path(user_id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state.ledger.user_stats(user_id)?;
    Ok((StatusCode::OK, Json(stats)))
}

/// Single operation (GET /operations/{id})
pub async fn get_operation(
    State(state): State<AppState>,
    Path(operation_id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let operation = state
        .ledger
        .operation(operation_id)?
        .ok_or_else(|| ApiError::NotFound(format!("operation {operation_id}")))?;

    Ok((StatusCode::OK, Json(operation)))
}

/// Health check endpoint (GET /health)
///
/// Components:
/// - api: answering this request
/// - ledger: fjall keyspace readable
/// - workers: every broker channel still open
///
/// Returns 503 Service Unavailable if any component is unhealthy.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = HashMap::new();
    components.insert("api".to_string(), "healthy".to_string());

    let ledger = match state.ledger.stats() {
        Ok(stats) => {
            components.insert("ledger".to_string(), "healthy".to_string());
            Some(stats)
        }
        Err(e) => {
            warn!(error = %e, "Ledger health check failed");
            components.insert("ledger".to_string(), "unhealthy".to_string());
            None
        }
    };

    let workers = if state.broker.health_check() {
        "healthy"
    } else {
        "unhealthy"
    };
    components.insert("workers".to_string(), workers.to_string());

    let all_healthy = components.values().all(|status| status == "healthy");
    let (overall_status, status_code) = if all_healthy {
        ("healthy", StatusCode::OK)
    } else {
        ("unhealthy", StatusCode::SERVICE_UNAVAILABLE)
    };

    let response = HealthResponse {
        status: overall_status.to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
        metrics: state.metrics.snapshot(),
        ledger,
    };

    (status_code, Json(response))
}
