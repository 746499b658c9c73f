//! Transport state for one media-relay WebSocket.

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

/// Where a call is in its relay lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayPhase {
    Connecting,
    Greeting,
    Streaming,
    ProcessingTurn,
    Stopped,
}

#[derive(Debug)]
pub struct ConnectionState {
    pub call_id: String,
    pub connected_at: DateTime<Utc>,
    /// Provider stream id; outbound media is only sent once this is set.
    pub stream_sid: Option<String>,
    pub media_format: Option<Value>,
    pub last_activity: DateTime<Utc>,
    /// Consecutive frames that failed to process.
    pub error_count: u32,
    pub phase: RelayPhase,
    audio: VecDeque<u8>,
    audio_capacity: usize,
}

impl ConnectionState {
    pub fn new(call_id: impl Into<String>, audio_capacity: usize) -> Self {
        let now = Utc::now();
        Self {
            call_id: call_id.into(),
            connected_at: now,
            stream_sid: None,
            media_format: None,
            last_activity: now,
            error_count: 0,
            phase: RelayPhase::Connecting,
            audio: VecDeque::new(),
            audio_capacity: audio_capacity.max(1),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Counts a failed frame and returns the new consecutive total.
    pub fn record_error(&mut self) -> u32 {
        self.error_count = self.error_count.saturating_add(1);
        self.error_count
    }

    pub fn reset_errors(&mut self) {
        self.error_count = 0;
    }

    /// True when the connection has been idle for longer than `idle`.
    pub fn is_stale(&self, now: DateTime<Utc>, idle: Duration) -> bool {
        let idle = chrono::Duration::from_std(idle).unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(self.last_activity) > idle
    }

    /// Appends inbound audio, dropping the oldest bytes beyond capacity.
    pub fn buffer_audio(&mut self, bytes: &[u8]) {
        self.audio.extend(bytes);
        let excess = self.audio.len().saturating_sub(self.audio_capacity);
        if excess > 0 {
            self.audio.drain(..excess);
        }
    }

    /// Copies the current turn's audio, leaving it buffered.
    pub fn buffered_audio(&self) -> Vec<u8> {
        self.audio.iter().copied().collect()
    }

    /// Takes everything buffered for the current turn.
    pub fn take_audio(&mut self) -> Vec<u8> {
        self.audio.drain(..).collect()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.audio.len()
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            call_id: self.call_id.clone(),
            connected_at: self.connected_at,
            stream_sid: self.stream_sid.clone(),
            last_activity: self.last_activity,
            error_count: self.error_count,
            phase: self.phase,
            buffered_bytes: self.audio.len(),
        }
    }
}

/// Monitoring snapshot of one connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub call_id: String,
    pub connected_at: DateTime<Utc>,
    pub stream_sid: Option<String>,
    pub last_activity: DateTime<Utc>,
    pub error_count: u32,
    pub phase: RelayPhase,
    pub buffered_bytes: usize,
}

/// Registry entry for an open socket.
///
/// `session_id` distinguishes a reconnect for the same call from the socket it
/// replaced, so a late teardown of the old socket cannot evict the new one.
#[derive(Debug, Clone)]
pub struct LiveConnection {
    pub session_id: Uuid,
    pub state: Arc<Mutex<ConnectionState>>,
    pub outbound: mpsc::Sender<Message>,
    closer: Arc<Notify>,
}

impl LiveConnection {
    pub fn new(state: ConnectionState, outbound: mpsc::Sender<Message>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            state: Arc::new(Mutex::new(state)),
            outbound,
            closer: Arc::new(Notify::new()),
        }
    }

    /// Runs `f` against the connection state.
    pub fn with_state<T>(&self, f: impl FnOnce(&mut ConnectionState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        self.closer.notified().await;
    }

    /// Asks the receive loop to stop and queues a close frame. Safe to repeat.
    pub fn close(&self) {
        self.closer.notify_one();
        if let Err(e) = self.outbound.try_send(Message::Close(None)) {
            tracing::debug!("close frame not queued: {}", e);
        }
    }
}
