//! Mutable per-call conversation state.

use chrono::{DateTime, Utc};
use parley_types::{ConversationMessage, Role, TenantProfile};
use serde_json::Value;
use std::collections::HashMap;

/// Well-known keys in [`ConversationContext`]'s context data.
pub mod keys {
    pub const TENANT_NAME: &str = "tenant_name";
    pub const AGENT_NAME: &str = "agent_name";
    pub const PERSONALITY: &str = "personality";
    pub const TENANT_PHONE: &str = "tenant_phone";
    pub const TENANT_EMAIL: &str = "tenant_email";
    pub const CALLER_NUMBER: &str = "caller_number";
    pub const VOICE: &str = "voice";

    pub const TRANSFER_REQUESTED: &str = "transfer_requested";
    pub const TRANSFER_REASON: &str = "transfer_reason";
    pub const CALLBACK_REQUESTED: &str = "callback_requested";
    pub const CALLBACK_PHONE: &str = "callback_phone";
    pub const CALLBACK_TIME: &str = "callback_time";
}

/// Everything the agent knows about one call.
///
/// Messages are kept in insertion order. Context data holds tenant facts and
/// tool-set flags that feed prompts and the final call record; session data
/// is scratch space for the transport layer.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    call_id: String,
    tenant_id: String,
    started_at: DateTime<Utc>,
    messages: Vec<ConversationMessage>,
    context_data: HashMap<String, Value>,
    session_data: HashMap<String, Value>,
}

impl ConversationContext {
    pub fn new(call_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            tenant_id: tenant_id.into(),
            started_at: Utc::now(),
            messages: Vec::new(),
            context_data: HashMap::new(),
            session_data: HashMap::new(),
        }
    }

    /// Creates a context preloaded with the tenant's facts and the caller.
    pub fn for_tenant(
        call_id: impl Into<String>,
        tenant: &TenantProfile,
        caller_number: Option<&str>,
    ) -> Self {
        let mut context = Self::new(call_id, tenant.id.clone());
        context.set_context(keys::TENANT_NAME, tenant.name.clone());
        context.set_context(keys::AGENT_NAME, tenant.agent_name.clone());
        if let Some(personality) = &tenant.personality {
            context.set_context(keys::PERSONALITY, personality.clone());
        }
        if let Some(phone) = &tenant.phone {
            context.set_context(keys::TENANT_PHONE, phone.clone());
        }
        if let Some(email) = &tenant.email {
            context.set_context(keys::TENANT_EMAIL, email.clone());
        }
        if let Some(caller) = caller_number {
            context.set_context(keys::CALLER_NUMBER, caller);
        }
        if let Some(voice) = &tenant.voice {
            if let Ok(value) = serde_json::to_value(voice) {
                context.set_context(keys::VOICE, value);
            }
        }
        context
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    /// Appends a message stamped with the current time.
    pub fn add_message(&mut self, role: Role, content: impl Into<String>, metadata: Option<Value>) {
        self.messages.push(ConversationMessage {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata,
        });
    }

    /// Returns the most recent `limit` messages, oldest first.
    pub fn get_conversation_history(&self, limit: usize) -> &[ConversationMessage] {
        let start = self.messages.len().saturating_sub(limit);
        &self.messages[start..]
    }

    /// The latest thing the caller said, if anything.
    pub fn last_user_utterance(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    pub fn set_context(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.context_data.insert(key.into(), value.into());
    }

    pub fn get_context(&self, key: &str) -> Option<&Value> {
        self.context_data.get(key)
    }

    /// String-valued context entry, or `default` when absent or not a string.
    pub fn context_str<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.context_data
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
    }

    /// Boolean flag; absent or non-boolean values read as `false`.
    pub fn context_flag(&self, key: &str) -> bool {
        self.context_data
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn set_session(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.session_data.insert(key.into(), value.into());
    }

    pub fn get_session(&self, key: &str) -> Option<&Value> {
        self.session_data.get(key)
    }

    /// Renders the whole conversation as `role: content` lines.
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
