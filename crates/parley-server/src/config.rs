//! Server configuration loading from file and environment variables.

use crate::relay::RelaySettings;
use parley_agent::EngineSettings;
use parley_types::TenantProfile;
use parley_voice::{CompletionOptions, ElevenLabsConfig, OpenAiConfig};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Media-relay connection handling.
    #[serde(default)]
    pub relay: RelayConfig,

    /// Prompt and sampling limits for the conversation engine.
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub openai: OpenAiConfig,

    #[serde(default)]
    pub elevenlabs: ElevenLabsConfig,

    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Businesses served by this deployment.
    #[serde(default)]
    pub tenants: Vec<TenantProfile>,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally reachable base URL, used when telling the telephony
    /// provider where to open the media stream.
    #[serde(default)]
    pub public_url: Option<String>,
}

impl ServerConfig {
    /// WebSocket base URL for `/media-stream/{call_id}`.
    pub fn media_stream_base(&self) -> String {
        match self.public_url.as_deref().map(|url| url.trim_end_matches('/')) {
            Some(url) if url.starts_with("https://") => format!("wss://{}", &url[8..]),
            Some(url) if url.starts_with("http://") => format!("ws://{}", &url[7..]),
            Some(url) if !url.is_empty() => url.to_string(),
            _ => format!("ws://{}:{}", self.host, self.port),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "parley_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Idle time before the relay probes the socket with a ping.
    #[serde(default = "default_receive_timeout_secs")]
    pub receive_timeout_secs: u64,

    /// Consecutive failed frames that end a call.
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,

    /// Inactivity after which the sweeper tears a connection down.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Upper bound on one speech synthesis before the mark fallback is sent.
    #[serde(default = "default_tts_timeout_secs")]
    pub tts_timeout_secs: u64,

    /// Duration of each outbound media frame.
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u32,

    /// Cap on inbound audio held for one turn.
    #[serde(default = "default_audio_buffer_bytes")]
    pub audio_buffer_bytes: usize,
}

impl RelayConfig {
    pub fn settings(&self) -> RelaySettings {
        RelaySettings {
            receive_timeout: Duration::from_secs(self.receive_timeout_secs.max(1)),
            max_consecutive_errors: self.max_consecutive_errors.max(1),
            stale_after: Duration::from_secs(self.stale_after_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
            tts_timeout: Duration::from_secs(self.tts_timeout_secs.max(1)),
            frame_ms: self.frame_ms,
            audio_buffer_bytes: self.audio_buffer_bytes,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    #[serde(default = "default_knowledge_limit")]
    pub knowledge_limit: usize,

    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,

    #[serde(default = "default_summary_temperature")]
    pub summary_temperature: f32,
}

impl EngineConfig {
    pub fn settings(&self, elevenlabs: &ElevenLabsConfig) -> EngineSettings {
        EngineSettings {
            history_turns: self.history_turns,
            knowledge_limit: self.knowledge_limit,
            snippet_chars: self.snippet_chars,
            reply: CompletionOptions {
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            },
            summary: CompletionOptions {
                max_tokens: self.summary_max_tokens,
                temperature: self.summary_temperature,
            },
            default_voice: elevenlabs.default_voice.clone(),
        }
    }
}

/// External knowledge-search service. Without a URL, prompts carry no snippets.
#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeConfig {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_knowledge_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "parley.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_receive_timeout_secs() -> u64 {
    30
}

fn default_max_consecutive_errors() -> u32 {
    5
}

fn default_stale_after_secs() -> u64 {
    30 * 60
}

fn default_sweep_interval_secs() -> u64 {
    5 * 60
}

fn default_tts_timeout_secs() -> u64 {
    10
}

fn default_frame_ms() -> u32 {
    20
}

fn default_audio_buffer_bytes() -> usize {
    64 * 1024
}

fn default_history_turns() -> usize {
    10
}

fn default_knowledge_limit() -> usize {
    3
}

fn default_snippet_chars() -> usize {
    200
}

fn default_max_tokens() -> u32 {
    1500
}

fn default_temperature() -> f32 {
    0.7
}

fn default_summary_max_tokens() -> u32 {
    150
}

fn default_summary_temperature() -> f32 {
    0.3
}

fn default_knowledge_timeout_secs() -> u64 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            receive_timeout_secs: default_receive_timeout_secs(),
            max_consecutive_errors: default_max_consecutive_errors(),
            stale_after_secs: default_stale_after_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            tts_timeout_secs: default_tts_timeout_secs(),
            frame_ms: default_frame_ms(),
            audio_buffer_bytes: default_audio_buffer_bytes(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_turns: default_history_turns(),
            knowledge_limit: default_knowledge_limit(),
            snippet_chars: default_snippet_chars(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            summary_max_tokens: default_summary_max_tokens(),
            summary_temperature: default_summary_temperature(),
        }
    }
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_knowledge_timeout_secs(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `PARLEY_HOST` overrides `server.host`
/// - `PARLEY_PORT` overrides `server.port`
/// - `PARLEY_PUBLIC_URL` overrides `server.public_url`
/// - `PARLEY_DB_PATH` overrides `database.path`
/// - `PARLEY_LOG_LEVEL` overrides `logging.level`
/// - `PARLEY_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `PARLEY_OPENAI_API_KEY` overrides `openai.api_key`
/// - `PARLEY_ELEVENLABS_API_KEY` overrides `elevenlabs.api_key`
/// - `PARLEY_KNOWLEDGE_URL` overrides `knowledge.url`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("PARLEY_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("PARLEY_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(url) = var("PARLEY_PUBLIC_URL") {
        config.server.public_url = Some(url);
    }
    if let Some(db_path) = var("PARLEY_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = var("PARLEY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("PARLEY_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(key) = var("PARLEY_OPENAI_API_KEY") {
        config.openai.api_key = key;
    }
    if let Some(key) = var("PARLEY_ELEVENLABS_API_KEY") {
        config.elevenlabs.api_key = key;
    }
    if let Some(url) = var("PARLEY_KNOWLEDGE_URL") {
        config.knowledge.url = Some(url).filter(|u| !u.trim().is_empty());
    }
}
