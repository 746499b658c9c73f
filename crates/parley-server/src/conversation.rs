//! Conversation lifecycle as seen by signaling and the media relay.

use crate::registry::{CallSessionRegistry, SharedContext};
use crate::tenants::TenantDirectory;
use chrono::{DateTime, Utc};
use parley_agent::context::keys;
use parley_agent::{CallRecordStore, CallSummary, ConversationContext, ConversationEngine};
use parley_types::Role;
use std::sync::Arc;
use thiserror::Error;

/// Session key set while a greeting still has to be spoken on the stream.
pub const GREETING_PENDING: &str = "greeting_pending";

/// Who plays a new conversation's greeting to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GreetingDelivery {
    /// Signaling speaks it before the stream opens, as TwiML `<Say>` does.
    Signaling,
    /// The relay speaks it once the provider assigns a stream id.
    MediaStream,
}

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("unknown tenant: {0}")]
    UnknownTenant(String),
}

/// Creates, looks up and ends per-call conversations.
pub struct Conversations {
    engine: ConversationEngine,
    tenants: Arc<TenantDirectory>,
    registry: Arc<CallSessionRegistry>,
    records: Arc<dyn CallRecordStore>,
}

impl Conversations {
    pub fn new(
        engine: ConversationEngine,
        tenants: Arc<TenantDirectory>,
        registry: Arc<CallSessionRegistry>,
        records: Arc<dyn CallRecordStore>,
    ) -> Self {
        Self {
            engine,
            tenants,
            registry,
            records,
        }
    }

    pub fn engine(&self) -> &ConversationEngine {
        &self.engine
    }

    pub fn tenants(&self) -> &TenantDirectory {
        &self.tenants
    }

    pub fn context(&self, call_id: &str) -> Option<SharedContext> {
        self.registry.contexts.get(call_id)
    }

    fn greeted(&self, mut context: ConversationContext) -> (SharedContext, String) {
        let greeting = self.engine.initial_greeting(&context);
        context.add_message(Role::Assistant, greeting.clone(), None);
        (Arc::new(tokio::sync::Mutex::new(context)), greeting)
    }

    /// Opens a conversation before the media stream connects and returns the
    /// greeting. A second start for the same call replaces the first.
    pub fn start_conversation(
        &self,
        call_id: &str,
        tenant_id: &str,
        caller_number: Option<&str>,
        delivery: GreetingDelivery,
    ) -> Result<String, ConversationError> {
        let tenant = self
            .tenants
            .get(tenant_id)
            .ok_or_else(|| ConversationError::UnknownTenant(tenant_id.to_string()))?;

        let mut context = ConversationContext::for_tenant(call_id, tenant, caller_number);
        if delivery == GreetingDelivery::MediaStream {
            context.set_session(GREETING_PENDING, true);
        }
        let (context, greeting) = self.greeted(context);
        if self.registry.contexts.register(call_id, context).is_some() {
            tracing::warn!(call_id = %call_id, "conversation restarted, previous context replaced");
        }
        tracing::info!(call_id = %call_id, tenant_id = %tenant_id, "conversation started");
        Ok(greeting)
    }

    /// Returns the call's conversation, creating one if signaling never did.
    ///
    /// `tenant_hint` selects the tenant for a new context; without a known
    /// tenant the context is created bare and prompts use placeholders.
    pub fn attach(&self, call_id: &str, tenant_hint: Option<&str>) -> SharedContext {
        self.registry.contexts.get_or_insert_with(call_id, || {
            let context = match tenant_hint.and_then(|id| self.tenants.get(id)) {
                Some(tenant) => ConversationContext::for_tenant(call_id, tenant, None),
                None => {
                    tracing::warn!(
                        call_id = %call_id,
                        tenant_hint = ?tenant_hint,
                        "media stream without a started conversation or known tenant"
                    );
                    ConversationContext::new(call_id, tenant_hint.unwrap_or("unknown"))
                }
            };
            self.greeted(context).0
        })
    }

    /// Persists one utterance. Failures are logged and swallowed.
    pub async fn record_turn(&self, call_id: &str, speaker: Role, text: &str, at: DateTime<Utc>) {
        if let Err(e) = self.records.save_turn(call_id, speaker, text, at).await {
            tracing::warn!(call_id = %call_id, speaker = %speaker, "failed to save transcript turn: {}", e);
        }
    }

    /// Takes the greeting still owed to the caller, if any. Later calls
    /// return `None`.
    pub async fn take_pending_greeting(&self, context: &SharedContext) -> Option<String> {
        let mut context = context.lock().await;
        let pending = context
            .get_session(GREETING_PENDING)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !pending {
            return None;
        }
        context.set_session(GREETING_PENDING, false);
        context
            .messages()
            .iter()
            .find(|message| message.role == Role::Assistant)
            .map(|message| message.content.clone())
    }

    /// Ends every conversation that has no live media stream and started
    /// before `cutoff`. Returns the ended call ids.
    pub async fn end_orphaned_before(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        let mut ended = Vec::new();
        for (call_id, context) in self.registry.contexts.snapshot() {
            if self.registry.connections.get(&call_id).is_some() {
                continue;
            }
            if context.lock().await.started_at() >= cutoff {
                continue;
            }
            if self.registry.connections.get(&call_id).is_some() {
                continue;
            }
            tracing::warn!(call_id = %call_id, "ending conversation whose media stream never connected");
            if self.end_conversation(&call_id).await.is_some() {
                ended.push(call_id);
            }
        }
        ended
    }

    /// Ends every conversation still registered.
    pub async fn end_all(&self) -> usize {
        let mut ended = 0;
        for call_id in self.registry.contexts.list_ids() {
            if self.end_conversation(&call_id).await.is_some() {
                ended += 1;
            }
        }
        ended
    }

    /// Summarizes and persists the call, then forgets it.
    ///
    /// Returns the summary, or `None` when the call is unknown or already
    /// ended.
    pub async fn end_conversation(&self, call_id: &str) -> Option<String> {
        let Some(context) = self.registry.contexts.remove(call_id) else {
            tracing::debug!(call_id = %call_id, "end_conversation for unknown call ignored");
            return None;
        };
        let context = context.lock().await;

        let summary = self.engine.summarize(&context).await;
        let outcome = CallSummary {
            summary: summary.clone(),
            transfer_requested: context.context_flag(keys::TRANSFER_REQUESTED),
            transfer_reason: context
                .get_context(keys::TRANSFER_REASON)
                .and_then(|v| v.as_str())
                .map(str::to_string),
        };
        if context.context_flag(keys::CALLBACK_REQUESTED) {
            tracing::info!(
                call_id = %call_id,
                phone = %context.context_str(keys::CALLBACK_PHONE, ""),
                time = %context.context_str(keys::CALLBACK_TIME, ""),
                "callback requested during call"
            );
        }
        if let Err(e) = self.records.save_summary(call_id, &outcome).await {
            tracing::warn!(call_id = %call_id, "failed to save call summary: {}", e);
        }

        tracing::info!(
            call_id = %call_id,
            messages = context.messages().len(),
            transfer_requested = outcome.transfer_requested,
            "conversation ended"
        );
        Some(summary)
    }
}
