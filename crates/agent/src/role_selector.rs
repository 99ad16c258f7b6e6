//! Role routing: persona choice and tool-permission tier for a turn.

use std::sync::Arc;

use serde::Deserialize;
use storyloom_config::TriggerPhrases;
use storyloom_core::error::ProviderError;
use storyloom_core::provider::Provider;
use storyloom_core::role::{self, RoleProfile, ToolTier};
use storyloom_core::state::ConversationState;
use storyloom_core::text::{char_len, clip, collapse_whitespace, contains_any};
use tracing::info;

use crate::prompts;
use crate::structured::{StructuredOutput, call_structured};
use crate::transcript;

const DEFAULT_DECISION_REASON: &str = "基于对话意图的默认选择。";
const DEFAULT_PERMISSION_REASON: &str = "根据用户意图判断。";
const RAG_PERMISSION_REASON: &str = "本轮为知识库检索（RAG）意图，禁用画布工具以保持互斥。";
const SHORT_UTTERANCE_REASON: &str = "用户输入过短且未表达明确创作动作，先用选项确认下一步。";

/// Raw router output.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RoleDecision {
    pub role_id: String,
    pub role_name: String,
    pub reason: String,
    pub allow_canvas_tools: bool,
    pub allow_canvas_tools_reason: String,
    pub tool_tier: String,
    pub intent: String,
}

impl StructuredOutput for RoleDecision {
    const NAME: &'static str = "RoleDecision";

    fn schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "role_id": {"type": "string"},
                "role_name": {"type": "string"},
                "reason": {"type": "string"},
                "allow_canvas_tools": {"type": "boolean"},
                "allow_canvas_tools_reason": {"type": "string"},
                "tool_tier": {"type": "string", "enum": ["none", "canvas", "rag"]},
                "intent": {"type": "string"},
            },
            "required": [
                "role_id", "role_name", "reason", "allow_canvas_tools",
                "allow_canvas_tools_reason", "tool_tier", "intent",
            ],
            "additionalProperties": false,
        })
    }

    /// Keyword match of role ids and display names in the raw text. Canvas
    /// permission stays off: an unparseable router never unlocks tools.
    fn fallback(raw: &str, error: Option<&ProviderError>) -> Self {
        let raw = raw.trim();
        let lowered = raw.to_lowercase();
        let chosen = role::all()
            .iter()
            .find(|r| lowered.contains(r.id) || lowered.contains(&r.name.to_lowercase()))
            .unwrap_or_else(|| role::default_role());

        let reason = match error {
            Some(e) if raw.is_empty() => format!("Fallback due to OpenAI error: {e}"),
            _ if raw.is_empty() => "Fallback parse from model output: 无理由".to_string(),
            _ => format!("Fallback parse from model output: {}", clip(raw, 120)),
        };

        Self {
            role_id: chosen.id.into(),
            role_name: chosen.name.into(),
            reason,
            ..Self::default()
        }
    }
}

/// Normalized routing result applied to the turn state.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleSelection {
    pub role: &'static RoleProfile,
    pub reason: String,
    pub allow_canvas_tools: bool,
    pub allow_canvas_tools_reason: String,
    pub tool_tier: ToolTier,
    pub intent: String,
}

impl RoleSelection {
    /// Normalize a router decision.
    ///
    /// Tiers are mutually exclusive: canvas permission forces the `canvas`
    /// tier, `canvas` without permission becomes `none`, and `rag` always
    /// revokes permission. A short last utterance without a creation hint
    /// never unlocks the canvas.
    pub fn from_decision(decision: RoleDecision, last_user_text: &str, triggers: &TriggerPhrases) -> Self {
        let role = role::resolve(&decision.role_id);
        let reason = non_empty_or(decision.reason, DEFAULT_DECISION_REASON);
        let mut allow = decision.allow_canvas_tools;
        let mut allow_reason = non_empty_or(decision.allow_canvas_tools_reason, DEFAULT_PERMISSION_REASON);
        let mut tier = ToolTier::parse(&decision.tool_tier).unwrap_or_default();

        if allow {
            tier = ToolTier::Canvas;
        } else if tier == ToolTier::Canvas {
            tier = ToolTier::None;
        }

        if tier == ToolTier::Rag {
            allow = false;
            allow_reason = RAG_PERMISSION_REASON.into();
        }

        let compact = collapse_whitespace(last_user_text.trim());
        if allow
            && !compact.is_empty()
            && char_len(&compact) <= triggers.short_utterance_max_chars
            && !contains_any(&compact, &triggers.creation_hints)
        {
            allow = false;
            allow_reason = SHORT_UTTERANCE_REASON.into();
            tier = ToolTier::None;
        }

        Self {
            role,
            reason,
            allow_canvas_tools: allow,
            allow_canvas_tools_reason: allow_reason,
            tool_tier: tier,
            intent: decision.intent.trim().to_string(),
        }
    }

    pub fn apply_to(self, state: &mut ConversationState) {
        state.active_role = self.role;
        state.active_role_reason = self.reason;
        state.allow_canvas_tools = self.allow_canvas_tools;
        state.allow_canvas_tools_reason = self.allow_canvas_tools_reason;
        state.tool_tier = self.tool_tier;
        state.active_intent = self.intent;
    }
}

fn non_empty_or(value: String, default: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() { default.to_string() } else { trimmed.to_string() }
}

/// Stage 1: picks the persona and permission tier.
pub struct RoleSelector {
    provider: Arc<dyn Provider>,
    model: String,
    conversation_tail: usize,
    triggers: TriggerPhrases,
}

impl RoleSelector {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, triggers: TriggerPhrases) -> Self {
        Self {
            provider,
            model: model.into(),
            conversation_tail: 16,
            triggers,
        }
    }

    pub fn with_conversation_tail(mut self, tail: usize) -> Self {
        self.conversation_tail = tail;
        self
    }

    pub async fn select(&self, state: &ConversationState) -> RoleSelection {
        let conversation = transcript::compact_conversation(state, self.conversation_tail);
        let prompt = prompts::role_router(&conversation, &state.canvas.render_for_prompt());

        let decision: RoleDecision = call_structured(self.provider.as_ref(), &self.model, &prompt).await;
        let selection = RoleSelection::from_decision(decision, state.last_user_text(), &self.triggers);

        info!(
            role = selection.role.id,
            tier = selection.tool_tier.as_str(),
            allow_canvas_tools = selection.allow_canvas_tools,
            intent = %selection.intent,
            "Role selected"
        );
        selection
    }
}
