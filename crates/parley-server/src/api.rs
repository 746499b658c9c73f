//! JSON API handlers for the Parley server.

use crate::conversation::{ConversationError, GreetingDelivery};
use crate::AppState;
use axum::{
    extract::{Extension, Json, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use parley_db::{CallDirection, NewCall};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Request body for starting a conversation ahead of an outbound call.
#[derive(Debug, Deserialize)]
pub struct StartConversationRequest {
    #[serde(rename = "callId")]
    pub call_id: String,
    #[serde(rename = "tenantId")]
    pub tenant_id: String,
    /// Number of the party being called.
    #[serde(rename = "callerNumber")]
    pub caller_number: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartConversationResponse {
    pub greeting: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RelayStatusResponse {
    #[serde(rename = "activeConnections")]
    pub active_connections: usize,
    #[serde(rename = "activeCalls")]
    pub active_calls: Vec<String>,
}

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<ConversationError> for ApiError {
    fn from(e: ConversationError) -> Self {
        match e {
            ConversationError::UnknownTenant(id) => ApiError::NotFound(format!("tenant {}", id)),
        }
    }
}

/// Owned form of [`NewCall`] that can cross into a blocking task.
pub(crate) struct CallAnnouncement {
    pub call_id: String,
    pub tenant_id: Option<String>,
    pub direction: CallDirection,
    pub caller_number: Option<String>,
    pub called_number: Option<String>,
}

/// Inserts the call row for a call signaling has just seen.
pub(crate) async fn record_call_start(
    state: &AppState,
    call: CallAnnouncement,
) -> Result<(), ApiError> {
    let pool = state.pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| {
            ApiError::InternalServerError(format!("db connection failed: {}", e))
        })?;
        parley_db::create_call(
            &conn,
            &NewCall {
                call_id: &call.call_id,
                tenant_id: call.tenant_id.as_deref(),
                direction: call.direction,
                caller_number: call.caller_number.as_deref(),
                called_number: call.called_number.as_deref(),
            },
        )
        .map_err(|e| ApiError::InternalServerError(format!("failed to record call: {}", e)))
    })
    .await
    .map_err(|e| ApiError::InternalServerError(format!("task join error: {}", e)))?
}

/// Handler for `POST /api/conversations`.
pub async fn start_conversation_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<StartConversationRequest>,
) -> Result<Json<StartConversationResponse>, ApiError> {
    if payload.call_id.trim().is_empty() {
        return Err(ApiError::BadRequest("callId is required".to_string()));
    }

    let greeting = state.conversations.start_conversation(
        &payload.call_id,
        &payload.tenant_id,
        payload.caller_number.as_deref(),
        GreetingDelivery::MediaStream,
    )?;

    if let Err(e) = record_call_start(
        &state,
        CallAnnouncement {
            call_id: payload.call_id.clone(),
            tenant_id: Some(payload.tenant_id.clone()),
            direction: CallDirection::Outbound,
            caller_number: payload.caller_number.clone(),
            called_number: None,
        },
    )
    .await
    {
        tracing::warn!(call_id = %payload.call_id, "call row not created: {}", e);
    }

    Ok(Json(StartConversationResponse { greeting }))
}

/// Handler for `GET /api/relay/status`.
pub async fn relay_status_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<RelayStatusResponse> {
    Json(RelayStatusResponse {
        active_connections: state.relay.connection_count(),
        active_calls: state.relay.active_call_ids(),
    })
}

/// Handler for `GET /api/relay/calls/{callId}`.
pub async fn connection_info_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(call_id): Path<String>,
) -> Result<Json<crate::connection::ConnectionInfo>, ApiError> {
    state
        .relay
        .connection_info(&call_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no media stream for call {}", call_id)))
}
