//! Per-turn conversation state.
//!
//! Built from a [`TurnRequest`] at the start of a turn and threaded
//! through every pipeline stage. Nothing here outlives the request.

use crate::canvas::CanvasContext;
use crate::message::{self, Message};
use crate::reply::{SourceRef, TurnRequest};
use crate::role::{self, RoleProfile, ToolTier};

#[derive(Debug, Clone)]
pub struct ConversationState {
    pub messages: Vec<Message>,

    /// Rolling summary from earlier turns (trimmed, never empty)
    pub conversation_summary: Option<String>,

    pub active_role: &'static RoleProfile,
    pub active_role_reason: String,
    pub active_intent: String,
    pub tool_tier: ToolTier,
    pub allow_canvas_tools: bool,
    pub allow_canvas_tools_reason: String,

    pub canvas: CanvasContext,

    /// Knowledge-base snippets for the answer prompt
    pub snippets: Vec<String>,
    pub sources: Vec<SourceRef>,

    /// Turn counter for this thread, already including the current turn
    pub agent_loop_count: u32,
}

impl ConversationState {
    /// Start a turn. The loop counter is advanced here, once per turn.
    pub fn from_request(request: TurnRequest) -> Self {
        let canvas = request
            .canvas_context
            .as_ref()
            .map(CanvasContext::from_value)
            .unwrap_or_default();
        let conversation_summary = request
            .conversation_summary
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Self {
            messages: request.messages,
            conversation_summary,
            active_role: role::default_role(),
            active_role_reason: String::new(),
            active_intent: String::new(),
            tool_tier: ToolTier::None,
            allow_canvas_tools: false,
            allow_canvas_tools_reason: String::new(),
            canvas,
            snippets: Vec::new(),
            sources: Vec::new(),
            agent_loop_count: request.agent_loop_count.saturating_add(1),
        }
    }

    pub fn last_user_text(&self) -> &str {
        message::last_user_text(&self.messages)
    }

    pub fn summary(&self) -> Option<&str> {
        self.conversation_summary.as_deref()
    }

    /// The newest `limit` messages.
    pub fn tail(&self, limit: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(limit);
        &self.messages[start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_request_advances_loop_count_and_parses_canvas() {
        let request = TurnRequest {
            messages: vec![Message::user("你好"), Message::assistant("嗨"), Message::user("画一只狐狸")],
            conversation_summary: Some("   ".into()),
            canvas_context: Some(serde_json::json!({"nodes": [{"label": "狐狸", "kind": "image"}, 3]})),
            agent_loop_count: 4,
        };
        let state = ConversationState::from_request(request);
        assert_eq!(state.agent_loop_count, 5);
        assert!(state.summary().is_none());
        assert_eq!(state.canvas.nodes.len(), 1);
        assert_eq!(state.last_user_text(), "画一只狐狸");
        assert_eq!(state.active_role.id, role::DEFAULT_ROLE_ID);
        assert!(!state.allow_canvas_tools);
    }

    #[test]
    fn tail_is_bounded() {
        let state = ConversationState::from_request(TurnRequest::from_user_text("hi"));
        assert_eq!(state.tail(16).len(), 1);
        assert_eq!(state.tail(0).len(), 0);
    }
}
