//! Media-relay wire protocol: JSON text frames tagged by `event`.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Default, Deserialize)]
struct StartPayload {
    #[serde(rename = "streamSid")]
    stream_sid: Option<String>,
    #[serde(rename = "mediaFormat")]
    media_format: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct MediaPayload {
    payload: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MarkPayload {
    name: Option<String>,
}

/// Raw frame shape. Providers put `start` details either at the top level or
/// inside a nested `start` object; both are accepted.
#[derive(Debug, Deserialize)]
struct RawFrame {
    event: String,
    #[serde(rename = "streamSid")]
    stream_sid: Option<String>,
    #[serde(rename = "mediaFormat")]
    media_format: Option<Value>,
    start: Option<StartPayload>,
    media: Option<MediaPayload>,
    mark: Option<MarkPayload>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Connected,
    Start {
        stream_sid: Option<String>,
        media_format: Option<Value>,
    },
    /// Base64 audio payload, still encoded.
    Media { payload: Option<String> },
    Stop,
    Mark { name: Option<String> },
    Clear,
    Unknown(String),
}

impl InboundEvent {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawFrame = serde_json::from_str(text)?;
        Ok(match raw.event.as_str() {
            "connected" => Self::Connected,
            "start" => {
                let nested = raw.start.unwrap_or_default();
                Self::Start {
                    stream_sid: raw
                        .stream_sid
                        .or(nested.stream_sid)
                        .filter(|sid| !sid.trim().is_empty()),
                    media_format: raw.media_format.or(nested.media_format),
                }
            }
            "media" => Self::Media {
                payload: raw.media.and_then(|m| m.payload),
            },
            "stop" => Self::Stop,
            "mark" => Self::Mark {
                name: raw.mark.and_then(|m| m.name),
            },
            "clear" => Self::Clear,
            _ => Self::Unknown(raw.event),
        })
    }
}

#[derive(Serialize)]
struct OutboundMedia {
    payload: String,
}

#[derive(Serialize)]
struct OutboundMark {
    name: String,
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum OutboundFrame<'a> {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
        media: OutboundMedia,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
        mark: OutboundMark,
    },
}

fn render(frame: &OutboundFrame<'_>) -> String {
    // Serializing these shapes cannot fail: every field is a string.
    serde_json::to_string(frame).unwrap_or_default()
}

/// One frame of outbound audio, base64 encoded and keyed to the stream.
pub fn media_frame(stream_sid: &str, audio: &[u8]) -> String {
    render(&OutboundFrame::Media {
        stream_sid,
        media: OutboundMedia {
            payload: base64::engine::general_purpose::STANDARD.encode(audio),
        },
    })
}

/// A non-audio acknowledgment sent when no speech could be produced.
pub fn fallback_mark_frame(stream_sid: &str) -> String {
    let stamp = chrono::Utc::now().timestamp_millis();
    render(&OutboundFrame::Mark {
        stream_sid,
        mark: OutboundMark {
            name: format!("fallback_response_{}", stamp),
        },
    })
}

/// Decodes a media payload.
pub fn decode_payload(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD.decode(payload.trim())
}
