//! Transcript rendering for prompts.

use storyloom_core::message::{Message, Role};
use storyloom_core::state::ConversationState;

fn speaker(role: Role) -> &'static str {
    match role {
        Role::User => "User",
        Role::Assistant => "Assistant",
        Role::System => "System",
        Role::Tool => "Tool",
    }
}

/// One `Speaker: text` line per message.
pub fn format_messages(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", speaker(m.role), m.content.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The research topic: a lone message verbatim, otherwise the formatted
/// exchange.
pub fn research_topic(messages: &[Message]) -> String {
    match messages {
        [] => String::new(),
        [only] => only.content.trim().to_string(),
        many => format_messages(many),
    }
}

/// Summary-prefixed tail of the conversation, used by the role router.
pub fn compact_conversation(state: &ConversationState, tail: usize) -> String {
    let recent = format_messages(state.tail(tail));
    match state.summary() {
        Some(summary) if !recent.trim().is_empty() => {
            format!("Conversation summary:\n{summary}\n\nRecent turns:\n{recent}")
        }
        Some(summary) => summary.to_string(),
        None => recent,
    }
}

/// Summary-prefixed research topic, used by the answer prompt and as the
/// retrieval query.
pub fn research_topic_with_summary(state: &ConversationState, tail: usize) -> String {
    let topic = research_topic(state.tail(tail));
    match state.summary() {
        Some(summary) if !topic.trim().is_empty() => {
            format!("Conversation summary:\n{summary}\n\nRecent conversation:\n{topic}")
        }
        Some(summary) => summary.to_string(),
        None => topic,
    }
}
