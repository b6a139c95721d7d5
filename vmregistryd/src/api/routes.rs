use std::collections::HashMap;
use std::sync::Arc;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use shared::protocol::{
    ERR_CONNECTION_LOST, ERR_DEADLINE_EXCEEDED, ERR_ENUMERATION, ERR_INVALID_REQUEST,
    HEALTH_PATH, LIST_VMS_PATH, VMS_HASH_PATH,
};
use shared::types::{ErrorReply, ListVmReply};
use crate::connection::{Connection, ConnectionState};
use crate::inventory::assembler::{AssemblyError, Assembler};

#[derive(Clone)]
pub struct AppState {
    pub assembler: Arc<Assembler>,
    pub connection: Arc<Connection>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub state: ConnectionState,
    pub uri: String,
}

/// Failure reply: status code plus a JSON `ErrorReply` body
pub struct ApiError {
    status: StatusCode,
    reply: ErrorReply,
}

impl ApiError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            reply: ErrorReply {
                code: code.to_string(),
                message: message.into(),
            },
        }
    }
}

impl From<AssemblyError> for ApiError {
    fn from(err: AssemblyError) -> Self {
        let message = err.to_string();
        match err {
            AssemblyError::ConnectionLost => {
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, ERR_CONNECTION_LOST, message)
            }
            AssemblyError::Enumeration(_) => {
                ApiError::new(StatusCode::BAD_GATEWAY, ERR_ENUMERATION, message)
            }
            AssemblyError::DeadlineExceeded(_) => {
                ApiError::new(StatusCode::GATEWAY_TIMEOUT, ERR_DEADLINE_EXCEEDED, message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.reply)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(LIST_VMS_PATH, get(list_vms))
        .route(VMS_HASH_PATH, get(get_hash))
        .route(HEALTH_PATH, get(get_health))
        .with_state(state)
}

/// `List` takes no parameters; anything passed is a caller error
fn validate_empty(params: &HashMap<String, String>) -> Result<(), ApiError> {
    if params.is_empty() {
        return Ok(());
    }
    let mut names: Vec<&str> = params.keys().map(String::as_str).collect();
    names.sort_unstable();
    Err(ApiError::new(
        StatusCode::BAD_REQUEST,
        ERR_INVALID_REQUEST,
        format!("unexpected parameters: {}", names.join(", ")),
    ))
}

async fn list_vms(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ListVmReply>, ApiError> {
    validate_empty(&params)?;

    let snapshot = state.assembler.build_snapshot(&state.connection).await.map_err(|e| {
        tracing::error!("Failed to list VMs: {}", e);
        ApiError::from(e)
    })?;

    Ok(Json(snapshot.into_reply()))
}

async fn get_hash(State(state): State<AppState>) -> Result<String, ApiError> {
    let snapshot = state.assembler.build_snapshot(&state.connection).await.map_err(|e| {
        tracing::error!("Failed to hash VM inventory: {}", e);
        ApiError::from(e)
    })?;
    Ok(snapshot.digest())
}

async fn get_health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let connection_state = state.connection.state();
    let status = match connection_state {
        ConnectionState::Connected => StatusCode::OK,
        ConnectionState::Unconnected | ConnectionState::Lost => StatusCode::SERVICE_UNAVAILABLE,
    };

    (
        status,
        Json(HealthResponse {
            state: connection_state,
            uri: state.connection.uri().to_string(),
        }),
    )
}
