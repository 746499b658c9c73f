//! Shared types for the Parley call-orchestration workspace.
//!
//! Every crate in the workspace takes its cross-cutting vocabulary from
//! here: conversation roles and messages, the tool-invocation union the
//! language model can answer with, adapter failure kinds, voice parameters,
//! tenant profiles and knowledge snippets. Keeping them in one leaf crate
//! lets the provider adapters (`parley-voice`) and the conversation engine
//! (`parley-agent`) agree on shapes without depending on each other.

pub mod conversation;
pub mod tenant;
pub mod tools;
pub mod voice;

pub use conversation::{ChatMessage, ConversationMessage};
pub use tenant::{KnowledgeSnippet, TenantProfile};
pub use tools::{Completion, ToolCallError, ToolDefinition, ToolInvocation};
pub use voice::VoiceParams;

use serde::{Deserialize, Serialize};

/// Who produced a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The caller.
    User,
    /// The AI agent.
    Assistant,
    /// Instructions injected by the platform.
    System,
}

impl Role {
    /// Returns the wire label used by chat-completion APIs and transcripts.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    /// Parses a wire label back into a `Role`.
    ///
    /// Returns `None` for unrecognized labels.
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification of a failed call to an external AI provider.
///
/// Adapters map their concrete errors onto these kinds so orchestration can
/// pick a fallback without inspecting transport details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The provider did not answer in time.
    Timeout,
    /// The provider could not be reached or answered with a server error.
    Unavailable,
    /// The provider refused the request (bad credentials, invalid input).
    Rejected,
    /// The provider answered with something we could not interpret.
    Malformed,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
            Self::Rejected => "rejected",
            Self::Malformed => "malformed",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
