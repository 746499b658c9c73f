//! Reply generation, speech synthesis and call summaries.
//!
//! Every operation here degrades instead of failing: provider errors are
//! logged with their [`FailureKind`](parley_types::FailureKind) and replaced by
//! a fixed fallback, so a broken provider never aborts a call.

use crate::collaborators::KnowledgeSearch;
use crate::context::{keys, ConversationContext};
use crate::prompt;
use chrono::Utc;
use parley_types::{ChatMessage, Completion, ToolDefinition, ToolInvocation, VoiceParams};
use parley_voice::{CompletionOptions, LanguageModel, TextToSpeech};
use std::cmp::Ordering;
use std::sync::Arc;

pub const FALLBACK_REPLY: &str =
    "I apologize, but I'm having trouble processing your request right now.";
pub const EMPTY_SUMMARY: &str = "No conversation recorded.";
pub const SUMMARY_UNAVAILABLE: &str = "Call summary unavailable.";

/// Tunables for prompt size and sampling.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Most recent messages included after the system prompt.
    pub history_turns: usize,
    /// Knowledge snippets requested per turn.
    pub knowledge_limit: usize,
    /// Characters kept from each snippet.
    pub snippet_chars: usize,
    pub reply: CompletionOptions,
    pub summary: CompletionOptions,
    /// Voice used when the tenant has no override.
    pub default_voice: VoiceParams,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            history_turns: 10,
            knowledge_limit: 3,
            snippet_chars: 200,
            reply: CompletionOptions {
                max_tokens: 1500,
                temperature: 0.7,
            },
            summary: CompletionOptions {
                max_tokens: 150,
                temperature: 0.3,
            },
            default_voice: VoiceParams::default(),
        }
    }
}

pub struct ConversationEngine {
    llm: Arc<dyn LanguageModel>,
    tts: Arc<dyn TextToSpeech>,
    knowledge: Arc<dyn KnowledgeSearch>,
    tools: Vec<ToolDefinition>,
    settings: EngineSettings,
}

impl ConversationEngine {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        tts: Arc<dyn TextToSpeech>,
        knowledge: Arc<dyn KnowledgeSearch>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            llm,
            tts,
            knowledge,
            tools: ToolInvocation::catalog(),
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Produces the assistant's next utterance.
    ///
    /// The caller appends the user's utterance before calling and the
    /// returned reply afterwards. Tool invocations update `context` flags and
    /// yield a confirmation sentence in place of model text.
    pub async fn generate_reply(&self, context: &mut ConversationContext) -> String {
        let snippets = self.relevant_knowledge(context).await;

        let mut messages = Vec::with_capacity(self.settings.history_turns + 1);
        messages.push(ChatMessage::system(prompt::system_prompt(
            context,
            &snippets,
            self.settings.snippet_chars,
            Utc::now(),
        )));
        messages.extend(
            context
                .get_conversation_history(self.settings.history_turns)
                .iter()
                .map(ChatMessage::from),
        );

        match self
            .llm
            .complete(&messages, &self.tools, self.settings.reply)
            .await
        {
            Ok(Completion::Text(text)) => text,
            Ok(Completion::Tool(invocation)) => apply_tool(context, invocation),
            Err(e) => {
                tracing::warn!(
                    call_id = %context.call_id(),
                    kind = %e.kind(),
                    "reply generation failed, using fallback: {}",
                    e
                );
                FALLBACK_REPLY.to_string()
            }
        }
    }

    async fn relevant_knowledge(
        &self,
        context: &ConversationContext,
    ) -> Vec<parley_types::KnowledgeSnippet> {
        let limit = self.settings.knowledge_limit;
        let query = match context.last_user_utterance() {
            Some(query) if limit > 0 && !query.trim().is_empty() => query,
            _ => return Vec::new(),
        };

        match self.knowledge.search(context.tenant_id(), query, limit).await {
            Ok(mut snippets) => {
                snippets.sort_by(|a, b| {
                    b.relevance
                        .partial_cmp(&a.relevance)
                        .unwrap_or(Ordering::Equal)
                });
                snippets.truncate(limit);
                snippets
            }
            Err(e) => {
                tracing::warn!(
                    call_id = %context.call_id(),
                    tenant_id = %context.tenant_id(),
                    "knowledge search failed: {}",
                    e
                );
                Vec::new()
            }
        }
    }

    /// Voice for this call: the tenant override if one was stored, else the default.
    pub fn voice_for(&self, context: &ConversationContext) -> VoiceParams {
        context
            .get_context(keys::VOICE)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_else(|| self.settings.default_voice.clone())
    }

    /// Synthesizes `text` in the call's voice. Empty output means no audio.
    pub async fn synthesize_speech(&self, text: &str, context: &ConversationContext) -> Vec<u8> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let voice = self.voice_for(context);
        match self.tts.synthesize(text, &voice).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(
                    call_id = %context.call_id(),
                    kind = %e.kind(),
                    "speech synthesis failed: {}",
                    e
                );
                Vec::new()
            }
        }
    }

    /// Two or three sentences describing the call, for the call record.
    pub async fn summarize(&self, context: &ConversationContext) -> String {
        if context.messages().is_empty() {
            return EMPTY_SUMMARY.to_string();
        }

        let messages = [
            ChatMessage::system(prompt::SUMMARY_INSTRUCTION),
            ChatMessage::user(context.transcript()),
        ];
        match self.llm.complete(&messages, &[], self.settings.summary).await {
            Ok(Completion::Text(summary)) => summary,
            Ok(Completion::Tool(invocation)) => {
                tracing::warn!(
                    call_id = %context.call_id(),
                    tool = invocation.name(),
                    "summary request answered with a tool call"
                );
                SUMMARY_UNAVAILABLE.to_string()
            }
            Err(e) => {
                tracing::warn!(
                    call_id = %context.call_id(),
                    kind = %e.kind(),
                    "call summary failed: {}",
                    e
                );
                SUMMARY_UNAVAILABLE.to_string()
            }
        }
    }

    pub fn initial_greeting(&self, context: &ConversationContext) -> String {
        format!(
            "Hello! This is {} from {}. How can I help you today?",
            context.context_str(keys::AGENT_NAME, "AI Assistant"),
            context.context_str(keys::TENANT_NAME, "our company"),
        )
    }
}

fn apply_tool(context: &mut ConversationContext, invocation: ToolInvocation) -> String {
    tracing::info!(
        call_id = %context.call_id(),
        tool = invocation.name(),
        "model invoked tool"
    );
    match invocation {
        ToolInvocation::TransferToHuman { reason } => {
            let reply = format!("I'll transfer you to a human agent now. Reason: {}", reason);
            context.set_context(keys::TRANSFER_REQUESTED, true);
            context.set_context(keys::TRANSFER_REASON, reason);
            reply
        }
        ToolInvocation::ScheduleCallback {
            phone_number,
            preferred_time,
        } => {
            let reply = format!(
                "I've scheduled a callback to {} at {}. You'll receive a confirmation shortly.",
                phone_number, preferred_time
            );
            context.set_context(keys::CALLBACK_REQUESTED, true);
            context.set_context(keys::CALLBACK_PHONE, phone_number);
            context.set_context(keys::CALLBACK_TIME, preferred_time);
            reply
        }
    }
}
