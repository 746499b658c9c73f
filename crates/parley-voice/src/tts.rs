use crate::audio::pcm16_to_wav;
use crate::config::ElevenLabsConfig;
use crate::error::{check_status, VoiceError};
use async_trait::async_trait;
use parley_types::VoiceParams;
use serde::Serialize;
use std::time::Duration;

/// Maximum text input size for TTS (64 KiB). Prevents resource exhaustion from
/// oversized synthesis requests.
const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

const PROVIDER: &str = "elevenlabs";

/// Speech synthesis.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Renders `text` with the given voice, returning a WAV container.
    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<Vec<u8>, VoiceError>;
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

/// ElevenLabs synthesis over HTTP, requesting raw PCM and wrapping it as WAV.
#[derive(Debug, Clone)]
pub struct ElevenLabsTts {
    client: reqwest::Client,
    config: ElevenLabsConfig,
}

impl ElevenLabsTts {
    pub fn new(config: ElevenLabsConfig) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| VoiceError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl TextToSpeech for ElevenLabsTts {
    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<Vec<u8>, VoiceError> {
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(VoiceError::InputTooLarge {
                size: text.len(),
                limit: MAX_TTS_INPUT_BYTES,
            });
        }
        if !(0.0..=1.0).contains(&voice.stability) || !(0.0..=1.0).contains(&voice.similarity_boost)
        {
            return Err(VoiceError::Config(
                "stability and similarity_boost must be between 0.0 and 1.0".to_string(),
            ));
        }

        let request = SynthesisRequest {
            text,
            model_id: &voice.model_id,
            voice_settings: VoiceSettings {
                stability: voice.stability,
                similarity_boost: voice.similarity_boost,
            },
        };

        let response = self
            .client
            .post(format!(
                "{}/text-to-speech/{}",
                self.config.base_url, voice.voice_id
            ))
            .query(&[(
                "output_format",
                format!("pcm_{}", self.config.output_sample_rate),
            )])
            .header("xi-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| VoiceError::transport(PROVIDER, e))?;
        let response = check_status(PROVIDER, response).await?;

        let pcm = response
            .bytes()
            .await
            .map_err(|e| VoiceError::transport(PROVIDER, e))?;
        if pcm.is_empty() {
            return Ok(Vec::new());
        }
        pcm16_to_wav(&pcm, self.config.output_sample_rate)
            .map_err(|e| VoiceError::invalid_response(PROVIDER, e.to_string()))
    }
}
