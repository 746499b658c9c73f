use crate::config::OpenAiConfig;
use crate::error::{check_status, VoiceError};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;

/// Maximum audio input size for STT (10 MiB). Prevents OOM from oversized payloads.
const MAX_STT_INPUT_BYTES: usize = 10 * 1024 * 1024;

const PROVIDER: &str = "whisper";

/// Speech recognition.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribes recognizer-format audio (16 kHz mono WAV).
    ///
    /// An empty string means nothing intelligible was said.
    async fn transcribe(&self, audio: &[u8]) -> Result<String, VoiceError>;
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// OpenAI Whisper transcription over HTTP.
#[derive(Debug, Clone)]
pub struct WhisperStt {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl WhisperStt {
    pub fn new(config: OpenAiConfig) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| VoiceError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl SpeechToText for WhisperStt {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, VoiceError> {
        if audio.len() > MAX_STT_INPUT_BYTES {
            return Err(VoiceError::InputTooLarge {
                size: audio.len(),
                limit: MAX_STT_INPUT_BYTES,
            });
        }

        let file = Part::bytes(audio.to_vec())
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceError::transport(PROVIDER, e))?;
        let form = Form::new()
            .part("file", file)
            .text("model", self.config.transcription_model.clone())
            .text("language", self.config.language.clone())
            .text("response_format", "json");

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VoiceError::transport(PROVIDER, e))?;
        let response = check_status(PROVIDER, response).await?;

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::invalid_response(PROVIDER, e.to_string()))?;
        Ok(body.text.trim().to_string())
    }
}
