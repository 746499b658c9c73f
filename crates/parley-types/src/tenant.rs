//! Tenant identity and knowledge snippets.

use crate::VoiceParams;
use serde::{Deserialize, Serialize};

fn default_agent_name() -> String {
    "AI Assistant".to_string()
}

/// A business deploying a phone agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantProfile {
    /// Stable tenant identifier.
    pub id: String,
    /// Business name spoken in greetings and used in prompts.
    pub name: String,
    /// Name the agent introduces itself with.
    #[serde(default = "default_agent_name")]
    pub agent_name: String,
    /// Free-form persona instructions appended to the system prompt.
    #[serde(default)]
    pub personality: Option<String>,
    /// Public contact phone number.
    #[serde(default)]
    pub phone: Option<String>,
    /// Public contact email.
    #[serde(default)]
    pub email: Option<String>,
    /// Dialled numbers routed to this tenant.
    #[serde(default)]
    pub inbound_numbers: Vec<String>,
    /// Voice override; the platform default is used when absent.
    #[serde(default)]
    pub voice: Option<VoiceParams>,
}

impl TenantProfile {
    /// Builds a tenant with only the required fields set.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            agent_name: default_agent_name(),
            personality: None,
            phone: None,
            email: None,
            inbound_numbers: Vec::new(),
            voice: None,
        }
    }
}

/// A knowledge-base passage returned by the search collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSnippet {
    pub content: String,
    pub relevance: f64,
}
