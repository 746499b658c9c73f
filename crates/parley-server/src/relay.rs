//! Media-relay connection handling.
//!
//! One task owns each call's socket and processes provider events strictly in
//! arrival order: `connected`, `start` (stream id and media format), `media`
//! (a caller utterance to recognize, answer and speak back) and `stop`.
//! Outbound frames go through a bounded channel drained by a writer task, so
//! teardown from the sweeper or shutdown can queue a close frame without
//! owning the socket.
//!
//! Provider failures never end a call on their own. An unrecognized
//! utterance is skipped, a failed reply becomes an apology, and missing
//! audio becomes a `mark` frame. Only a run of consecutive frame failures,
//! a dead socket or the staleness sweep stop a call.

use crate::background::start_sweep_task;
use crate::config::RelayConfig;
use crate::connection::{ConnectionInfo, ConnectionState, LiveConnection, RelayPhase};
use crate::conversation::Conversations;
use crate::protocol::{self, InboundEvent};
use crate::registry::{CallSessionRegistry, SharedContext};
use axum::extract::ws::{Message, WebSocket};
use chrono::{DateTime, Utc};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use parley_types::Role;
use parley_voice::{AudioTranscoder, SpeechToText, VoiceError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Outbound frames buffered per call before senders wait.
const OUTBOUND_QUEUE: usize = 256;

/// How long teardown waits for queued frames to flush.
const SEND_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub struct RelaySettings {
    pub receive_timeout: Duration,
    pub max_consecutive_errors: u32,
    pub stale_after: Duration,
    pub sweep_interval: Duration,
    pub tts_timeout: Duration,
    pub frame_ms: u32,
    pub audio_buffer_bytes: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        RelayConfig::default().settings()
    }
}

/// Why one inbound frame could not be processed.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),

    #[error("invalid media payload: {0}")]
    InvalidPayload(#[from] base64::DecodeError),

    #[error("speech recognition failed: {0}")]
    Recognition(#[source] VoiceError),

    #[error("outbound channel closed")]
    ChannelClosed,
}

enum Flow {
    Continue,
    Stop,
}

pub struct MediaRelay {
    conversations: Arc<Conversations>,
    registry: Arc<CallSessionRegistry>,
    stt: Arc<dyn SpeechToText>,
    transcoder: AudioTranscoder,
    settings: RelaySettings,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

async fn send_text(connection: &LiveConnection, frame: String) -> Result<(), RelayError> {
    connection
        .outbound
        .send(Message::Text(frame.into()))
        .await
        .map_err(|_| RelayError::ChannelClosed)
}

impl MediaRelay {
    pub fn new(
        conversations: Arc<Conversations>,
        registry: Arc<CallSessionRegistry>,
        stt: Arc<dyn SpeechToText>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            conversations,
            registry,
            stt,
            transcoder: AudioTranscoder::new(settings.frame_ms),
            settings,
            sweeper: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// Starts the staleness sweeper. Calling it again while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if sweeper.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        *sweeper = Some(tokio::spawn(start_sweep_task(
            Arc::downgrade(self),
            self.settings.sweep_interval,
        )));
    }

    /// Stops the sweeper, waits for it to exit, then tears down every
    /// connection still registered and ends every conversation left without
    /// one.
    pub async fn shutdown(&self) {
        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = sweeper {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::warn!("sweep task ended abnormally: {}", e);
                }
            }
        }

        let call_ids = self.registry.connections.list_ids();
        for call_id in &call_ids {
            self.cleanup_connection(call_id).await;
        }
        let orphaned = self.conversations.end_all().await;
        tracing::info!(
            closed = call_ids.len(),
            orphaned,
            "media relay shut down"
        );
    }

    pub fn connection_count(&self) -> usize {
        self.registry.connections.count()
    }

    pub fn active_call_ids(&self) -> Vec<String> {
        self.registry.connections.list_ids()
    }

    pub fn connection_info(&self, call_id: &str) -> Option<ConnectionInfo> {
        self.registry
            .connections
            .get(call_id)
            .map(|connection| connection.with_state(|state| state.info()))
    }

    /// Tears a call down from outside its receive loop.
    ///
    /// Removes the connection, ends the conversation, then closes the socket.
    /// Repeating it, or calling it for an unknown call, does nothing.
    /// Returns whether a connection was removed.
    pub async fn cleanup_connection(&self, call_id: &str) -> bool {
        let removed = self.registry.connections.remove(call_id);
        self.conversations.end_conversation(call_id).await;
        if let Some(connection) = &removed {
            connection.with_state(|state| state.phase = RelayPhase::Stopped);
            connection.close();
            tracing::info!(call_id = %call_id, "media stream cleaned up");
        }
        removed.is_some()
    }

    /// Tears down every connection idle for longer than the stale threshold
    /// as of `now`, then ends conversations older than the threshold whose
    /// media stream never connected. Returns the affected call ids.
    pub async fn sweep_stale_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let stale: Vec<String> = self
            .registry
            .connections
            .snapshot()
            .into_iter()
            .filter(|(_, connection)| {
                connection.with_state(|state| state.is_stale(now, self.settings.stale_after))
            })
            .map(|(call_id, _)| call_id)
            .collect();

        for call_id in &stale {
            tracing::warn!(call_id = %call_id, "tearing down stale media stream");
            self.cleanup_connection(call_id).await;
        }

        let mut swept = stale;
        if let Ok(stale_after) = chrono::Duration::from_std(self.settings.stale_after) {
            swept.extend(
                self.conversations
                    .end_orphaned_before(now - stale_after)
                    .await,
            );
        }
        swept
    }

    pub async fn sweep_stale(&self) -> Vec<String> {
        self.sweep_stale_at(Utc::now()).await
    }

    /// Runs one call's media stream until it stops, then tears it down.
    pub async fn handle_socket(
        self: Arc<Self>,
        socket: WebSocket,
        call_id: String,
        tenant_hint: Option<String>,
    ) {
        let (mut sink, mut stream) = socket.split();
        let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);

        let mut send_task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if sink.send(message).await.is_err() || closing {
                    break;
                }
            }
        });

        let connection = LiveConnection::new(
            ConnectionState::new(&call_id, self.settings.audio_buffer_bytes),
            tx,
        );
        if let Some(previous) = self
            .registry
            .connections
            .register(&call_id, connection.clone())
        {
            tracing::warn!(call_id = %call_id, "media stream reconnected, closing previous socket");
            previous.close();
        }
        tracing::info!(
            call_id = %call_id,
            session_id = %connection.session_id,
            "media stream connected"
        );

        connection.with_state(|state| state.phase = RelayPhase::Greeting);
        let context = self.conversations.attach(&call_id, tenant_hint.as_deref());
        connection.with_state(|state| state.phase = RelayPhase::Streaming);

        self.receive_loop(&call_id, &connection, &context, &mut stream)
            .await;
        self.finish(&call_id, &connection).await;

        if tokio::time::timeout(SEND_DRAIN_TIMEOUT, &mut send_task)
            .await
            .is_err()
        {
            send_task.abort();
        }
    }

    async fn receive_loop(
        &self,
        call_id: &str,
        connection: &LiveConnection,
        context: &SharedContext,
        stream: &mut SplitStream<WebSocket>,
    ) {
        loop {
            let next = tokio::select! {
                () = connection.closed() => {
                    tracing::info!(call_id = %call_id, "media stream closed by relay");
                    return;
                }
                next = tokio::time::timeout(self.settings.receive_timeout, stream.next()) => next,
            };

            let message = match next {
                Err(_) => {
                    tracing::warn!(
                        call_id = %call_id,
                        idle_secs = self.settings.receive_timeout.as_secs(),
                        "media stream idle, probing with ping"
                    );
                    if connection
                        .outbound
                        .send(Message::Ping(Default::default()))
                        .await
                        .is_err()
                    {
                        tracing::warn!(call_id = %call_id, "ping failed, closing media stream");
                        return;
                    }
                    continue;
                }
                Ok(None) => {
                    tracing::info!(call_id = %call_id, "media stream disconnected");
                    return;
                }
                Ok(Some(Err(e))) => {
                    tracing::warn!(call_id = %call_id, "media stream receive error: {}", e);
                    return;
                }
                Ok(Some(Ok(message))) => message,
            };

            connection.with_state(ConnectionState::touch);
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => {
                    tracing::info!(call_id = %call_id, "provider closed media stream");
                    return;
                }
                _ => continue,
            };

            match self
                .process_frame(call_id, connection, context, text.as_str())
                .await
            {
                Ok(Flow::Continue) => connection.with_state(|state| {
                    state.reset_errors();
                    if state.phase == RelayPhase::ProcessingTurn {
                        state.phase = RelayPhase::Streaming;
                    }
                }),
                Ok(Flow::Stop) => return,
                Err(e) => {
                    let count = connection.with_state(|state| {
                        if state.phase == RelayPhase::ProcessingTurn {
                            state.phase = RelayPhase::Streaming;
                        }
                        state.record_error()
                    });
                    tracing::warn!(
                        call_id = %call_id,
                        error_count = count,
                        "failed to process relay frame: {}",
                        e
                    );
                    if count >= self.settings.max_consecutive_errors {
                        tracing::error!(
                            call_id = %call_id,
                            error_count = count,
                            "too many consecutive errors, closing media stream"
                        );
                        return;
                    }
                }
            }
        }
    }

    async fn process_frame(
        &self,
        call_id: &str,
        connection: &LiveConnection,
        context: &SharedContext,
        text: &str,
    ) -> Result<Flow, RelayError> {
        match InboundEvent::parse(text)? {
            InboundEvent::Connected => {
                tracing::info!(call_id = %call_id, "media stream handshake received");
            }
            InboundEvent::Start {
                stream_sid: Some(stream_sid),
                media_format,
            } => {
                tracing::info!(call_id = %call_id, stream_sid = %stream_sid, "media stream started");
                connection.with_state(|state| {
                    state.stream_sid = Some(stream_sid);
                    state.media_format = media_format;
                });
                if let Some(greeting) = self.conversations.take_pending_greeting(context).await {
                    connection.with_state(|state| state.phase = RelayPhase::Greeting);
                    self.speak(connection, context, &greeting).await?;
                }
                connection.with_state(|state| state.phase = RelayPhase::Streaming);
            }
            InboundEvent::Start {
                stream_sid: None, ..
            } => {
                tracing::warn!(call_id = %call_id, "start event without streamSid ignored");
            }
            InboundEvent::Media {
                payload: Some(payload),
            } if !payload.is_empty() => {
                let audio = protocol::decode_payload(&payload)?;
                self.handle_turn(call_id, connection, context, &audio).await?;
            }
            InboundEvent::Media { .. } => {}
            InboundEvent::Stop => {
                tracing::info!(call_id = %call_id, "media stream stopped by provider");
                connection.with_state(|state| {
                    state.stream_sid = None;
                    state.phase = RelayPhase::Stopped;
                });
                self.conversations.end_conversation(call_id).await;
                return Ok(Flow::Stop);
            }
            InboundEvent::Mark { name } => {
                tracing::debug!(call_id = %call_id, mark = ?name, "mark acknowledged");
            }
            InboundEvent::Clear => {
                tracing::debug!(call_id = %call_id, "clear received");
            }
            InboundEvent::Unknown(event) => {
                tracing::warn!(call_id = %call_id, event = %event, "unknown relay event ignored");
            }
        }
        Ok(Flow::Continue)
    }

    /// Recognizes one utterance, answers it and speaks the answer back.
    async fn handle_turn(
        &self,
        call_id: &str,
        connection: &LiveConnection,
        context: &SharedContext,
        audio: &[u8],
    ) -> Result<(), RelayError> {
        let utterance = connection.with_state(|state| {
            state.phase = RelayPhase::ProcessingTurn;
            state.buffer_audio(audio);
            state.buffered_audio()
        });
        let recognized = self
            .stt
            .transcribe(&self.transcoder.to_recognizer(&utterance))
            .await;
        connection.with_state(|state| state.take_audio());

        let transcript = recognized.map_err(RelayError::Recognition)?;
        let transcript = transcript.trim();
        if transcript.is_empty() {
            tracing::debug!(call_id = %call_id, "no speech recognized, turn skipped");
            return Ok(());
        }
        tracing::info!(call_id = %call_id, chars = transcript.len(), "caller utterance recognized");

        let heard_at = Utc::now();
        let reply = {
            let mut context = context.lock().await;
            context.add_message(Role::User, transcript, None);
            let reply = self
                .conversations
                .engine()
                .generate_reply(&mut context)
                .await;
            context.add_message(Role::Assistant, reply.clone(), None);
            reply
        };
        let replied_at = Utc::now();

        let spoken = self.speak(connection, context, &reply).await;

        self.conversations
            .record_turn(call_id, Role::User, transcript, heard_at)
            .await;
        self.conversations
            .record_turn(call_id, Role::Assistant, &reply, replied_at)
            .await;
        spoken
    }

    /// Synthesizes `text` and streams it as media frames, falling back to a
    /// `mark` frame when synthesis fails, times out or yields nothing.
    /// Nothing is sent before the provider has assigned a stream id.
    async fn speak(
        &self,
        connection: &LiveConnection,
        context: &SharedContext,
        text: &str,
    ) -> Result<(), RelayError> {
        let (call_id, stream_sid) =
            connection.with_state(|state| (state.call_id.clone(), state.stream_sid.clone()));
        let Some(stream_sid) = stream_sid else {
            tracing::debug!(call_id = %call_id, "no stream id yet, outbound audio dropped");
            return Ok(());
        };

        let synthesized = {
            let context = context.lock().await;
            tokio::time::timeout(
                self.settings.tts_timeout,
                self.conversations.engine().synthesize_speech(text, &context),
            )
            .await
        };

        let audio = match synthesized {
            Ok(audio) if !audio.is_empty() => audio,
            Ok(_) => {
                tracing::warn!(call_id = %call_id, "no audio synthesized, sending fallback mark");
                return send_text(connection, protocol::fallback_mark_frame(&stream_sid)).await;
            }
            Err(_) => {
                tracing::warn!(
                    call_id = %call_id,
                    timeout_secs = self.settings.tts_timeout.as_secs(),
                    "speech synthesis timed out, sending fallback mark"
                );
                return send_text(connection, protocol::fallback_mark_frame(&stream_sid)).await;
            }
        };

        let wire = self.transcoder.to_wire(&audio);
        let mut frames = 0usize;
        for frame in self.transcoder.frames(&wire) {
            send_text(connection, protocol::media_frame(&stream_sid, frame)).await?;
            frames += 1;
        }
        tracing::info!(call_id = %call_id, frames, chars = text.len(), "reply streamed");
        Ok(())
    }

    /// Teardown after the receive loop exits. A socket that was replaced by a
    /// reconnect leaves the call's conversation alone.
    async fn finish(&self, call_id: &str, connection: &LiveConnection) {
        connection.with_state(|state| state.phase = RelayPhase::Stopped);
        let removed = self
            .registry
            .connections
            .remove_if(call_id, |current| current.session_id == connection.session_id);
        if removed.is_some() {
            self.conversations.end_conversation(call_id).await;
        }
        connection.close();
        tracing::info!(call_id = %call_id, "media stream torn down");
    }
}
