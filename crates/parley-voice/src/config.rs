use parley_types::VoiceParams;
use serde::{Deserialize, Serialize};
use std::fmt;

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_chat_model() -> String {
    "gpt-4".to_string()
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_elevenlabs_base_url() -> String {
    "https://api.elevenlabs.io/v1".to_string()
}

fn default_output_sample_rate() -> u32 {
    16_000
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Credentials and model choices for the OpenAI chat and transcription APIs.
#[derive(Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,
    /// ISO-639-1 hint passed to the recognizer.
    #[serde(default = "default_language")]
    pub language: String,
    /// Upper bound on a single HTTP exchange. Default: 30.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_openai_base_url(),
            chat_model: default_chat_model(),
            transcription_model: default_transcription_model(),
            language: default_language(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("chat_model", &self.chat_model)
            .field("transcription_model", &self.transcription_model)
            .field("language", &self.language)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Credentials and defaults for the ElevenLabs synthesis API.
#[derive(Clone, Serialize, Deserialize)]
pub struct ElevenLabsConfig {
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_elevenlabs_base_url")]
    pub base_url: String,
    /// Voice used when a tenant has no override.
    #[serde(default)]
    pub default_voice: VoiceParams,
    /// Sample rate of the PCM stream requested from the provider.
    #[serde(default = "default_output_sample_rate")]
    pub output_sample_rate: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_elevenlabs_base_url(),
            default_voice: VoiceParams::default(),
            output_sample_rate: default_output_sample_rate(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl fmt::Debug for ElevenLabsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElevenLabsConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("default_voice", &self.default_voice)
            .field("output_sample_rate", &self.output_sample_rate)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}
