//! Parley server library logic.

pub mod api;
pub mod api_media;
pub mod api_voice;
pub mod background;
pub mod config;
pub mod connection;
pub mod conversation;
pub mod protocol;
pub mod records;
pub mod registry;
pub mod relay;
pub mod tenants;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use config::Config;
use conversation::Conversations;
use parley_agent::{ConversationEngine, HttpKnowledgeSearch, KnowledgeSearch, NoKnowledge};
use parley_db::DbPool;
use parley_voice::{
    ElevenLabsTts, LanguageModel, OpenAiChat, SpeechToText, TextToSpeech, VoiceError, WhisperStt,
};
use records::SqliteCallRecords;
use registry::CallSessionRegistry;
use relay::MediaRelay;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tenants::TenantDirectory;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Conversation lifecycle service.
    pub conversations: Arc<Conversations>,
    /// Media relay owning every live call socket.
    pub relay: Arc<MediaRelay>,
    /// `ws://` or `wss://` prefix handed to the telephony provider.
    pub media_stream_base: String,
}

/// The external services a server talks to.
pub struct Providers {
    pub llm: Arc<dyn LanguageModel>,
    pub stt: Arc<dyn SpeechToText>,
    pub tts: Arc<dyn TextToSpeech>,
    pub knowledge: Arc<dyn KnowledgeSearch>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("voice provider: {0}")]
    Voice(#[from] VoiceError),
    #[error("knowledge search: {0}")]
    Knowledge(#[from] parley_agent::CollaboratorError),
}

impl Providers {
    /// Builds the HTTP provider clients from configuration. Without a
    /// knowledge URL, prompts are built without knowledge snippets.
    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        let knowledge: Arc<dyn KnowledgeSearch> = match &config.knowledge.url {
            Some(url) => Arc::new(HttpKnowledgeSearch::new(
                url.clone(),
                Duration::from_secs(config.knowledge.timeout_secs),
            )?),
            None => {
                tracing::info!("no knowledge service configured, prompts carry no snippets");
                Arc::new(NoKnowledge)
            }
        };

        Ok(Self {
            llm: Arc::new(OpenAiChat::new(config.openai.clone())?),
            stt: Arc::new(WhisperStt::new(config.openai.clone())?),
            tts: Arc::new(ElevenLabsTts::new(config.elevenlabs.clone())?),
            knowledge,
        })
    }
}

impl AppState {
    /// Wires the registry, conversation service and media relay together.
    pub fn new(config: &Config, pool: DbPool, providers: Providers) -> Self {
        let registry = Arc::new(CallSessionRegistry::new());
        let tenants = Arc::new(TenantDirectory::new(config.tenants.iter().cloned()));
        tracing::info!(count = tenants.len(), "loaded tenant profiles");

        let engine = ConversationEngine::new(
            providers.llm,
            providers.tts,
            providers.knowledge,
            config.engine.settings(&config.elevenlabs),
        );
        let conversations = Arc::new(Conversations::new(
            engine,
            tenants,
            Arc::clone(&registry),
            Arc::new(SqliteCallRecords::new(pool.clone())),
        ));
        let relay = Arc::new(MediaRelay::new(
            Arc::clone(&conversations),
            registry,
            providers.stt,
            config.relay.settings(),
        ));

        Self {
            pool,
            conversations,
            relay,
            media_stream_base: config.server.media_stream_base(),
        }
    }
}

/// Maximum request body size (1 MiB). Webhooks and JSON bodies are tiny.
const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/voice/inbound", post(api_voice::inbound_call_handler))
        .route("/voice/status", post(api_voice::call_status_handler))
        .route(
            "/api/conversations",
            post(api::start_conversation_handler),
        )
        .route("/api/relay/status", get(api::relay_status_handler))
        .route(
            "/api/relay/calls/{callId}",
            get(api::connection_info_handler),
        )
        .route("/media-stream/{callId}", get(api_media::media_stream_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
