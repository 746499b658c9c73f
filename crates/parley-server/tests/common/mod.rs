#![allow(dead_code)]

use async_trait::async_trait;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use parley_agent::NoKnowledge;
use parley_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};
use parley_server::config::Config;
use parley_server::{app, AppState, Providers};
use parley_types::{ChatMessage, Completion, TenantProfile, ToolDefinition, VoiceParams};
use parley_voice::{CompletionOptions, LanguageModel, SpeechToText, TextToSpeech, VoiceError};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};

pub type MediaSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const TENANT_ID: &str = "acme";
pub const TENANT_NUMBER: &str = "+15550001111";
pub const HEARD: &str = "hello there";
pub const REPLY: &str = "Sure, I can help with that.";
pub const SUMMARY: &str = "Caller asked for help.";

/// Recognizer answering from a script, then with [`HEARD`].
#[derive(Default)]
pub struct FakeStt {
    script: Mutex<VecDeque<Result<String, VoiceError>>>,
    calls: Mutex<usize>,
}

impl FakeStt {
    pub fn push(&self, answer: Result<String, VoiceError>) {
        self.script.lock().unwrap().push_back(answer);
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl SpeechToText for FakeStt {
    async fn transcribe(&self, _audio: &[u8]) -> Result<String, VoiceError> {
        *self.calls.lock().unwrap() += 1;
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(HEARD.to_string()))
    }
}

/// Chat model answering replies from a script, then with [`REPLY`].
/// Summary requests, which offer no tools, always get [`SUMMARY`].
#[derive(Default)]
pub struct FakeLlm {
    script: Mutex<VecDeque<Result<Completion, VoiceError>>>,
    reply_calls: Mutex<usize>,
}

impl FakeLlm {
    pub fn push(&self, answer: Result<Completion, VoiceError>) {
        self.script.lock().unwrap().push_back(answer);
    }

    pub fn reply_calls(&self) -> usize {
        *self.reply_calls.lock().unwrap()
    }
}

#[async_trait]
impl LanguageModel for FakeLlm {
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        tools: &[ToolDefinition],
        _options: CompletionOptions,
    ) -> Result<Completion, VoiceError> {
        if tools.is_empty() {
            return Ok(Completion::Text(SUMMARY.to_string()));
        }
        *self.reply_calls.lock().unwrap() += 1;
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Completion::Text(REPLY.to_string())))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtsMode {
    /// 20 ms of 8 kHz silence: exactly one outbound media frame.
    #[default]
    Audio,
    Empty,
    Fail,
    Hang,
}

#[derive(Default)]
pub struct FakeTts {
    mode: Mutex<TtsMode>,
    texts: Mutex<Vec<String>>,
}

impl FakeTts {
    pub fn set_mode(&self, mode: TtsMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextToSpeech for FakeTts {
    async fn synthesize(&self, text: &str, _voice: &VoiceParams) -> Result<Vec<u8>, VoiceError> {
        self.texts.lock().unwrap().push(text.to_string());
        let mode = *self.mode.lock().unwrap();
        match mode {
            TtsMode::Audio => Ok(parley_voice::audio::pcm16_to_wav(&[0u8; 320], 8000).unwrap()),
            TtsMode::Empty => Ok(Vec::new()),
            TtsMode::Fail => Err(VoiceError::Timeout {
                provider: "elevenlabs",
            }),
            TtsMode::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
        }
    }
}

pub fn test_tenant() -> TenantProfile {
    let mut tenant = TenantProfile::new(TENANT_ID, "Acme Dental");
    tenant.agent_name = "Ava".to_string();
    tenant.phone = Some("+1 555 000 2222".to_string());
    tenant.inbound_numbers = vec![TENANT_NUMBER.to_string()];
    tenant
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.server.public_url = Some("https://calls.example.test".to_string());
    config.tenants = vec![test_tenant()];
    config
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub pool: DbPool,
    pub stt: Arc<FakeStt>,
    pub llm: Arc<FakeLlm>,
    pub tts: Arc<FakeTts>,
    _dir: tempfile::TempDir,
}

impl TestServer {
    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn connect_media(&self, call_id: &str, tenant: Option<&str>) -> MediaSocket {
        let url = match tenant {
            Some(tenant) => format!("ws://{}/media-stream/{}?tenant={}", self.addr, call_id, tenant),
            None => format!("ws://{}/media-stream/{}", self.addr, call_id),
        };
        let (socket, _) = connect_async(url).await.expect("media stream should connect");
        socket
    }

    /// Polls until the relay has registered `count` connections.
    pub async fn wait_for_connections(&self, count: usize) {
        for _ in 0..100 {
            if self.state.relay.connection_count() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "expected {} connections, relay has {}",
            count,
            self.state.relay.connection_count()
        );
    }

    /// Polls until the call's conversation has been ended.
    pub async fn wait_for_conversation_end(&self, call_id: &str) {
        for _ in 0..100 {
            if self.state.conversations.context(call_id).is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("conversation for {} was never ended", call_id);
    }

    /// Polls until the call's transcript holds `rows` entries.
    pub async fn wait_for_transcript(&self, call_id: &str, rows: usize) {
        for _ in 0..100 {
            if self.transcript(call_id).len() >= rows {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("transcript for {} never reached {} rows", call_id, rows);
    }

    pub fn transcript(&self, call_id: &str) -> Vec<(String, String)> {
        let conn = self.pool.get().unwrap();
        parley_db::list_transcript(&conn, call_id)
            .unwrap()
            .into_iter()
            .map(|entry| (entry.speaker.to_string(), entry.text))
            .collect()
    }

    pub fn call_record(&self, call_id: &str) -> Option<parley_db::CallRecord> {
        let conn = self.pool.get().unwrap();
        parley_db::get_call(&conn, call_id).unwrap()
    }
}

pub async fn spawn_server() -> TestServer {
    spawn_server_with(test_config()).await
}

pub async fn spawn_server_with(config: Config) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("parley.db");
    let pool = create_pool(path.to_str().unwrap(), DbRuntimeSettings::default()).unwrap();
    {
        let conn = pool.get().unwrap();
        run_migrations(&conn).unwrap();
    }

    let stt = Arc::new(FakeStt::default());
    let llm = Arc::new(FakeLlm::default());
    let tts = Arc::new(FakeTts::default());
    let providers = Providers {
        llm: llm.clone(),
        stt: stt.clone(),
        tts: tts.clone(),
        knowledge: Arc::new(NoKnowledge),
    };
    let state = AppState::new(&config, pool.clone(), providers);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app(state.clone());
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        addr,
        state,
        pool,
        stt,
        llm,
        tts,
        _dir: dir,
    }
}

pub async fn send_event(socket: &mut MediaSocket, event: Value) {
    socket
        .send(WsMessage::Text(event.to_string().into()))
        .await
        .expect("frame should send");
}

pub async fn send_raw(socket: &mut MediaSocket, text: &str) {
    socket
        .send(WsMessage::Text(text.to_string().into()))
        .await
        .expect("frame should send");
}

pub fn start_event(stream_sid: &str) -> Value {
    json!({
        "event": "start",
        "sequenceNumber": "1",
        "start": {
            "streamSid": stream_sid,
            "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1}
        }
    })
}

pub fn media_event(stream_sid: &str, audio: &[u8]) -> Value {
    json!({
        "event": "media",
        "streamSid": stream_sid,
        "media": {"payload": base64::engine::general_purpose::STANDARD.encode(audio)}
    })
}

/// Connects and sends the `connected` and `start` handshake.
pub async fn open_stream(server: &TestServer, call_id: &str, stream_sid: &str) -> MediaSocket {
    let mut socket = server.connect_media(call_id, None).await;
    send_event(&mut socket, json!({"event": "connected", "protocol": "Call"})).await;
    send_event(&mut socket, start_event(stream_sid)).await;
    socket
}

/// Next JSON text frame from the server, skipping pings.
pub async fn next_frame(socket: &mut MediaSocket) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for a frame");
        match message {
            Some(Ok(WsMessage::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
            Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => continue,
            other => panic!("expected a text frame, got {:?}", other),
        }
    }
}

/// Asserts the server sends nothing for `wait`.
pub async fn assert_silent(socket: &mut MediaSocket, wait: Duration) {
    if let Ok(message) = tokio::time::timeout(wait, socket.next()).await {
        panic!("expected silence, got {:?}", message);
    }
}

/// Reads until the server closes the socket.
pub async fn expect_closed(socket: &mut MediaSocket) {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for the socket to close");
        match message {
            None | Some(Ok(WsMessage::Close(_))) | Some(Err(_)) => return,
            Some(Ok(_)) => continue,
        }
    }
}

pub fn decode_media(frame: &Value) -> Vec<u8> {
    base64::engine::general_purpose::STANDARD
        .decode(frame["media"]["payload"].as_str().unwrap())
        .unwrap()
}
