//! Telephony signaling webhooks.
//!
//! The provider posts form-encoded call events here. An inbound call is
//! answered with TwiML that speaks the greeting and then connects the call's
//! audio to `/media-stream/{CallSid}`; a terminal status ends the call.

use crate::api::{record_call_start, CallAnnouncement};
use crate::conversation::GreetingDelivery;
use crate::AppState;
use axum::{
    extract::{Extension, Form},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use parley_db::CallDirection;
use serde::Deserialize;
use std::sync::Arc;

const UNKNOWN_NUMBER_APOLOGY: &str =
    "We're sorry, this number is not configured to take calls. Goodbye.";

const TERMINAL_STATUSES: &[&str] = &["completed", "failed", "busy", "no-answer", "canceled"];

#[derive(Debug, Deserialize)]
pub struct InboundCallForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "From")]
    pub from: Option<String>,
    #[serde(rename = "To")]
    pub to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallStatusForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "CallStatus")]
    pub call_status: String,
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

fn twiml(body: String) -> Response {
    (
        [(header::CONTENT_TYPE, "application/xml")],
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><Response>{}</Response>"#,
            body
        ),
    )
        .into_response()
}

/// TwiML that greets the caller and bridges the call to the media relay.
pub fn connect_twiml(greeting: &str, stream_url: &str) -> Response {
    twiml(format!(
        r#"<Say>{}</Say><Connect><Stream url="{}"/></Connect>"#,
        xml_escape(greeting),
        xml_escape(stream_url)
    ))
}

fn reject_twiml() -> Response {
    twiml(format!(
        "<Say>{}</Say><Hangup/>",
        xml_escape(UNKNOWN_NUMBER_APOLOGY)
    ))
}

/// Handler for `POST /voice/inbound`.
pub async fn inbound_call_handler(
    Extension(state): Extension<Arc<AppState>>,
    Form(form): Form<InboundCallForm>,
) -> Response {
    let call_id = form.call_sid;
    let dialled = form.to.unwrap_or_default();

    let Some(tenant_id) = state
        .conversations
        .tenants()
        .by_inbound_number(&dialled)
        .map(|tenant| tenant.id.clone())
    else {
        tracing::warn!(call_id = %call_id, to = %dialled, "inbound call to unknown number rejected");
        return reject_twiml();
    };

    if let Err(e) = record_call_start(
        &state,
        CallAnnouncement {
            call_id: call_id.clone(),
            tenant_id: Some(tenant_id.clone()),
            direction: CallDirection::Inbound,
            caller_number: form.from.clone(),
            called_number: Some(dialled.clone()),
        },
    )
    .await
    {
        tracing::warn!(call_id = %call_id, "call row not created: {}", e);
    }

    let greeting = match state.conversations.start_conversation(
        &call_id,
        &tenant_id,
        form.from.as_deref(),
        GreetingDelivery::Signaling,
    ) {
        Ok(greeting) => greeting,
        Err(e) => {
            tracing::error!(call_id = %call_id, "failed to start conversation: {}", e);
            return reject_twiml();
        }
    };

    tracing::info!(call_id = %call_id, tenant_id = %tenant_id, "inbound call answered");
    let stream_url = format!("{}/media-stream/{}", state.media_stream_base, call_id);
    connect_twiml(&greeting, &stream_url)
}

/// Handler for `POST /voice/status`.
pub async fn call_status_handler(
    Extension(state): Extension<Arc<AppState>>,
    Form(form): Form<CallStatusForm>,
) -> StatusCode {
    let status = form.call_status.to_ascii_lowercase();
    if TERMINAL_STATUSES.contains(&status.as_str()) {
        tracing::info!(call_id = %form.call_sid, status = %status, "call reached terminal status");
        state.relay.cleanup_connection(&form.call_sid).await;
    } else {
        tracing::debug!(call_id = %form.call_sid, status = %status, "call status update");
    }
    StatusCode::NO_CONTENT
}
