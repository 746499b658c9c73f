//! Voice parameters for speech synthesis.
//!
//! A tenant may override the platform's default voice; the engine passes the
//! resolved `VoiceParams` to the synthesizer on every turn.

use serde::{Deserialize, Serialize};

fn default_voice_id() -> String {
    "21m00Tcm4TlvDq8ikWAM".to_string()
}

fn default_model_id() -> String {
    "eleven_monolingual_v1".to_string()
}

fn default_stability() -> f32 {
    0.5
}

fn default_similarity_boost() -> f32 {
    0.75
}

/// Synthesizer settings for one voice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceParams {
    /// Provider-side voice identifier.
    #[serde(default = "default_voice_id")]
    pub voice_id: String,
    /// Provider-side synthesis model.
    #[serde(default = "default_model_id")]
    pub model_id: String,
    /// Lower values make delivery more expressive, higher values more even (0.0..=1.0).
    #[serde(default = "default_stability")]
    pub stability: f32,
    /// How closely the output should track the reference voice (0.0..=1.0).
    #[serde(default = "default_similarity_boost")]
    pub similarity_boost: f32,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            voice_id: default_voice_id(),
            model_id: default_model_id(),
            stability: default_stability(),
            similarity_boost: default_similarity_boost(),
        }
    }
}
