use parley_types::FailureKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{provider} request timed out")]
    Timeout { provider: &'static str },

    #[error("{provider} request failed: {source}")]
    Transport {
        provider: &'static str,
        source: reqwest::Error,
    },

    #[error("{provider} returned HTTP {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider} returned an unexpected response: {detail}")]
    InvalidResponse {
        provider: &'static str,
        detail: String,
    },

    #[error("input exceeds maximum size: {size} bytes (limit: {limit} bytes)")]
    InputTooLarge { size: usize, limit: usize },
}

impl VoiceError {
    pub(crate) fn transport(provider: &'static str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { provider }
        } else {
            Self::Transport { provider, source }
        }
    }

    pub(crate) fn invalid_response(provider: &'static str, detail: impl Into<String>) -> Self {
        Self::InvalidResponse {
            provider,
            detail: detail.into(),
        }
    }

    /// Classifies the failure so callers can choose a fallback.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Transport { .. } => FailureKind::Unavailable,
            Self::Status { status, .. } if *status == 429 || *status >= 500 => {
                FailureKind::Unavailable
            }
            Self::Status { .. } | Self::Config(_) | Self::InputTooLarge { .. } => {
                FailureKind::Rejected
            }
            Self::InvalidResponse { .. } => FailureKind::Malformed,
        }
    }
}

/// Turns a non-success HTTP response into a [`VoiceError::Status`].
pub(crate) async fn check_status(
    provider: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, VoiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(VoiceError::Status {
        provider,
        status: status.as_u16(),
        body,
    })
}
