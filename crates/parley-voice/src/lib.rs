//! Speech and language provider adapters for Parley.
//!
//! A phone call needs three AI capabilities: speech recognition, a chat
//! model that can also select tools, and speech synthesis. Each is exposed
//! as an object-safe async trait ([`SpeechToText`], [`LanguageModel`],
//! [`TextToSpeech`]) with one HTTP-backed implementation per provider, so the
//! orchestration layer can be driven by fakes in tests.
//!
//! The [`audio`] module bridges the telephony wire format (8 kHz G.711
//! mu-law) and the WAV containers the providers speak.

pub mod audio;
pub mod config;
pub mod error;
pub mod llm;
pub mod mulaw;
pub mod stt;
pub mod tts;

pub use audio::{AudioEncoding, AudioInfo, AudioTranscoder};
pub use config::{ElevenLabsConfig, OpenAiConfig};
pub use error::VoiceError;
pub use llm::{CompletionOptions, LanguageModel, OpenAiChat};
pub use stt::{SpeechToText, WhisperStt};
pub use tts::{ElevenLabsTts, TextToSpeech};
