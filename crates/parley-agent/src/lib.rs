//! Per-call conversation state and the reply engine.
//!
//! [`ConversationContext`] is the mutable record of one phone call: what was
//! said, who the tenant is, and any flags set by tool invocations.
//! [`ConversationEngine`] turns that context into the agent's next utterance,
//! synthesizes it, and writes the end-of-call summary. The engine talks to
//! the outside world only through traits: the provider adapters from
//! `parley-voice` and the [`KnowledgeSearch`] / [`CallRecordStore`]
//! collaborators defined here.

pub mod collaborators;
pub mod context;
pub mod engine;
pub mod prompt;

pub use collaborators::{
    CallRecordStore, CallSummary, CollaboratorError, HttpKnowledgeSearch, KnowledgeSearch,
    NoKnowledge,
};
pub use context::ConversationContext;
pub use engine::{ConversationEngine, EngineSettings};
