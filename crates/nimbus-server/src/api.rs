//! HTTP API for nimbus.
//!
//! Provides endpoints for submitting deployments, starting and inspecting
//! orchestrations, and operating counter entities.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use nimbus_durable::{
    Counter, CounterOperation, EngineError, EntityHost, InstanceId, InstanceStatus,
    OrchestrationEngine,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::dispatcher::{DispatchError, Dispatcher};

/// Shared application state.
pub struct AppState {
    pub engine: OrchestrationEngine,
    pub dispatcher: Dispatcher,
    pub counters: EntityHost<Counter>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl ToString) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

/// Creates the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Deployments
        .route("/deployments", post(submit_deployment))
        // Orchestrations
        .route(
            "/orchestrations/{name}",
            post(start_orchestration).get(get_orchestration),
        )
        // Entities
        .route("/entities/counter/{key}", get(get_counter_state))
        .route("/entities/counter/{key}/{operation}", post(operate_counter))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse { status: "healthy" })
}

/// Submit a deployment request.
async fn submit_deployment(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    match state.dispatcher.dispatch(&body).await {
        Ok(instance_id) => Ok((
            StatusCode::ACCEPTED,
            Json(StartedResponse::new(instance_id)),
        )),
        Err(e @ DispatchError::Malformed(_)) => Err(api_error(StatusCode::BAD_REQUEST, e)),
        Err(e) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e)),
    }
}

/// Start an orchestration by program name. The body, if any, is its input.
async fn start_orchestration(
    State(state): State<Arc<AppState>>,
    Path(program): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let input = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("invalid input: {e}")))?
    };

    match state.engine.start(&program, input).await {
        Ok(instance_id) => {
            info!(instance_id = %instance_id, program = %program, "Orchestration started via API");
            Ok((
                StatusCode::ACCEPTED,
                Json(StartedResponse::new(instance_id)),
            ))
        }
        Err(e @ EngineError::UnknownProgram(_)) => Err(api_error(StatusCode::NOT_FOUND, e)),
        Err(e) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e)),
    }
}

/// Get the status of an orchestration instance.
async fn get_orchestration(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<InstanceStatus>, ApiError> {
    let instance_id = InstanceId::new(&id);

    match state.engine.query(&instance_id).await {
        Ok(Some(status)) => Ok(Json(status)),
        Ok(None) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("orchestration instance not found: {id}"),
        )),
        Err(e) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e)),
    }
}

/// Committed state of a counter. Keys never written read as zero.
async fn get_counter_state(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<CounterStateResponse>, ApiError> {
    let counter = state
        .counters
        .read_state(&key)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    Ok(Json(CounterStateResponse {
        key,
        state: counter,
    }))
}

/// Apply an operation to a counter.
///
/// `add`, `reset` and `delete` are one-way signals answered with `202`;
/// `get` waits for the value.
async fn operate_counter(
    State(state): State<Arc<AppState>>,
    Path((key, operation)): Path<(String, String)>,
    body: Bytes,
) -> Result<axum::response::Response, ApiError> {
    let operation = match operation.as_str() {
        "add" => {
            let request: AddRequest = serde_json::from_slice(&body).map_err(|e| {
                api_error(StatusCode::BAD_REQUEST, format!("add expects {{\"amount\": n}}: {e}"))
            })?;
            CounterOperation::Add(request.amount)
        }
        "reset" => CounterOperation::Reset,
        "delete" => CounterOperation::Delete,
        "get" => {
            let value = state
                .counters
                .call(&key, CounterOperation::Get)
                .await
                .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;
            return Ok(Json(CounterValueResponse { key, value }).into_response());
        }
        other => {
            return Err(api_error(
                StatusCode::NOT_FOUND,
                format!("unknown counter operation: {other}"),
            ))
        }
    };

    state
        .counters
        .signal(&key, operation)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SignalResponse {
            key,
            operation: format!("{operation:?}"),
        }),
    )
        .into_response())
}

// Request types

#[derive(Debug, Deserialize)]
struct AddRequest {
    amount: i64,
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Response to an accepted deployment or orchestration start.
#[derive(Debug, Serialize, Deserialize)]
pub struct StartedResponse {
    pub instance_id: String,
    pub status_url: String,
}

impl StartedResponse {
    fn new(instance_id: InstanceId) -> Self {
        Self {
            status_url: format!("/orchestrations/{instance_id}"),
            instance_id: instance_id.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CounterValueResponse {
    pub key: String,
    pub value: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CounterStateResponse {
    pub key: String,
    pub state: Counter,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignalResponse {
    pub key: String,
    pub operation: String,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
