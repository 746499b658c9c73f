//! System prompt composition.

use crate::context::{keys, ConversationContext};
use chrono::{DateTime, Utc};
use parley_types::KnowledgeSnippet;
use std::fmt::Write;

pub const SUMMARY_INSTRUCTION: &str = "Summarize this customer service call in 2-3 sentences. \
Include the main topic, any actions taken, and the outcome.";

/// Cuts `content` to at most `max_chars` characters, marking the cut with `...`.
pub fn truncate_snippet(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

/// Builds the system message for a reply turn.
///
/// `snippets` are expected to be ordered best first; each is cut to
/// `snippet_chars` characters.
pub fn system_prompt(
    context: &ConversationContext,
    snippets: &[KnowledgeSnippet],
    snippet_chars: usize,
    now: DateTime<Utc>,
) -> String {
    let tenant_name = context.context_str(keys::TENANT_NAME, "our company");
    let agent_name = context.context_str(keys::AGENT_NAME, "AI Assistant");

    let mut prompt = format!("You are {}, an AI assistant for {}.\n", agent_name, tenant_name);

    let personality = context.context_str(keys::PERSONALITY, "").trim();
    if !personality.is_empty() {
        let _ = write!(prompt, "\n{}\n", personality);
    }

    let _ = write!(
        prompt,
        "\nInstructions:\n\
         - Be helpful, professional, and friendly\n\
         - You are speaking on the phone, so keep responses short and conversational\n\
         - If you don't know something, say so and offer to find out\n\
         - Use the knowledge base information when relevant\n\
         - If the caller asks for a person, use the transfer_to_human tool\n\
         - If the caller wants to be called back, use the schedule_callback tool\n\
         - Stay in character as a representative of {}\n",
        tenant_name
    );

    let _ = write!(
        prompt,
        "\nCompany information:\n- Company: {}\n- Phone: {}\n- Email: {}\n",
        tenant_name,
        context.context_str(keys::TENANT_PHONE, "Not specified"),
        context.context_str(keys::TENANT_EMAIL, "Not specified"),
    );

    if !snippets.is_empty() {
        prompt.push_str("\nRelevant knowledge:\n");
        for snippet in snippets {
            let _ = writeln!(prompt, "- {}", truncate_snippet(&snippet.content, snippet_chars));
        }
    }

    let _ = write!(
        prompt,
        "\nCurrent call:\n- Caller: {}\n- Time: {} UTC\n",
        context.context_str(keys::CALLER_NUMBER, "Unknown"),
        now.format("%Y-%m-%d %H:%M:%S"),
    );

    prompt
}
