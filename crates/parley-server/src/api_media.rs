//! Media-relay WebSocket endpoint.

use crate::AppState;
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct MediaStreamParams {
    /// Tenant to use when signaling never started a conversation for the call.
    pub tenant: Option<String>,
}

/// WebSocket handler: `GET /media-stream/{callId}?tenant=...`.
///
/// The telephony provider opens this socket after the signaling webhook
/// answered the call. Each socket is handed to the [`MediaRelay`](crate::relay::MediaRelay),
/// which owns it until the call ends.
pub async fn media_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(call_id): Path<String>,
    Query(params): Query<MediaStreamParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if call_id.trim().is_empty() {
        tracing::warn!(remote_addr = %addr, "media stream without call id rejected");
        return StatusCode::BAD_REQUEST.into_response();
    }

    tracing::info!(
        call_id = %call_id,
        remote_addr = %addr,
        "media stream upgrade requested"
    );
    let relay = Arc::clone(&state.relay);
    ws.on_upgrade(move |socket| relay.handle_socket(socket, call_id, params.tenant))
}
