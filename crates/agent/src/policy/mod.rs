//! Continuity policy: a fixed chain of rules over the proposed turn.
//!
//! Each rule is a pure transformation of a [`TurnDraft`] snapshot
//! (reply text, tool calls, quick replies). Rules run in order and see the
//! cumulative effect of the rules before them. A rule that fails is logged
//! and skipped; the chain continues from the last good snapshot.

pub mod autorun;
pub mod finish;
pub mod gates;
pub mod normalize;
pub mod wiring;

use std::collections::HashSet;

use storyloom_config::{PolicyConfig, TriggerPhrases};
use storyloom_core::canvas::{CanvasContext, CanvasNode};
use storyloom_core::error::RuleError;
use storyloom_core::message::Message;
use storyloom_core::reply::QuickReply;
use storyloom_core::state::ConversationState;
use storyloom_core::text::{clip, contains_any};
use storyloom_core::tool::{CanvasOp, ToolCall};
use tracing::{debug, warn};

pub use finish::finish_reply;

/// The mutable part of an outgoing turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnDraft {
    pub reply: String,
    pub tool_calls: Vec<ToolCall>,
    pub quick_replies: Vec<QuickReply>,
}

impl TurnDraft {
    pub fn new(reply: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            reply: reply.into(),
            tool_calls,
            quick_replies: Vec::new(),
        }
    }

    /// `createNode` calls with their positions.
    pub fn creates(&self) -> impl Iterator<Item = (usize, &ToolCall)> {
        self.tool_calls
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is(CanvasOp::CreateNode))
    }

    pub fn has_create_of_type(&self, node_type: &str) -> bool {
        self.creates().any(|(_, c)| c.node_type() == Some(node_type))
    }

    /// Labels of image-like nodes created this turn, in call order.
    pub fn created_image_labels(&self) -> Vec<&str> {
        self.creates()
            .filter(|(_, c)| is_image_type(c.node_type()))
            .filter_map(|(_, c)| c.label())
            .collect()
    }

    /// Labels of nodes targeted by `runNode`.
    pub fn run_targets(&self) -> HashSet<&str> {
        self.tool_calls
            .iter()
            .filter(|c| c.is(CanvasOp::RunNode))
            .filter_map(ToolCall::node_id)
            .collect()
    }

    /// `(source, target)` pairs already connected this turn.
    pub fn connected_pairs(&self) -> HashSet<(String, String)> {
        self.tool_calls
            .iter()
            .filter(|c| c.is(CanvasOp::ConnectNodes))
            .filter_map(|c| Some((c.source()?.to_string(), c.target()?.to_string())))
            .collect()
    }
}

/// `image` and its deprecated alias.
pub fn is_image_type(node_type: Option<&str>) -> bool {
    matches!(node_type, Some("image" | "textToImage"))
}

/// Node kinds that carry a finished image usable as a reference.
fn is_reference_kind(kind: Option<&str>) -> bool {
    matches!(kind, Some("image" | "textToImage" | "mosaic"))
}

/// Successful image node with a result, as `(label, node)`.
pub(crate) fn finished_image(node: &CanvasNode) -> Option<(&str, &CanvasNode)> {
    let label = node.label.as_deref().map(str::trim).filter(|l| !l.is_empty())?;
    if !is_reference_kind(node.kind()) || !node.is_success() {
        return None;
    }
    node.image_url()?;
    Some((label, node))
}

/// Everything a rule may read besides the draft itself.
pub struct PolicyContext<'a> {
    pub last_user_text: &'a str,
    pub messages: &'a [Message],
    pub canvas: &'a CanvasContext,
    pub allow_canvas_tools: bool,
    /// Includes the current turn
    pub agent_loop_count: u32,
    pub hard_max_turn_loops: u32,
    pub triggers: &'a TriggerPhrases,
}

impl<'a> PolicyContext<'a> {
    pub fn new(state: &'a ConversationState, config: &'a PolicyConfig) -> Self {
        Self {
            last_user_text: state.last_user_text(),
            messages: &state.messages,
            canvas: &state.canvas,
            allow_canvas_tools: state.allow_canvas_tools,
            agent_loop_count: state.agent_loop_count,
            hard_max_turn_loops: config.hard_max_turn_loops,
            triggers: &config.triggers,
        }
    }

    fn user_says(&self, phrases: &[String]) -> bool {
        contains_any(self.last_user_text, phrases)
    }

    /// Open-ended "what happens next" request without production keywords.
    pub fn story_suggestion_request(&self) -> bool {
        let t = self.triggers;
        self.user_says(&t.story_continuation)
            && self.user_says(&t.story_recommendation)
            && !self.user_says(&t.story_production)
    }

    pub fn storyboard_intent(&self) -> bool {
        self.user_says(&self.triggers.storyboard_intent)
    }

    pub fn turn_cap_reached(&self) -> bool {
        self.hard_max_turn_loops > 0 && self.agent_loop_count >= self.hard_max_turn_loops
    }

    /// Explicit lock phrase, the turn cap, or an implicit go-ahead on a
    /// storyboard request.
    pub fn lock_confirmed(&self) -> bool {
        let t = self.triggers;
        self.user_says(&t.lock_confirmation)
            || self.turn_cap_reached()
            || (self.storyboard_intent() && self.user_says(&t.implicit_confirmation))
    }

    pub fn continuation_step(&self) -> bool {
        self.user_says(&self.triggers.continuation_step) && !self.story_suggestion_request()
    }

    pub fn reference_intent(&self) -> bool {
        self.user_says(&self.triggers.reference_intent)
    }

    /// Whether a label or prompt marks a storyboard grid.
    pub fn is_storyboard_text(&self, text: &str) -> bool {
        contains_any(text, &self.triggers.storyboard_markers)
    }

    /// The most recent style lock the user confirmed, first line only.
    pub fn style_lock(&self) -> Option<String> {
        let prefixes = &self.triggers.style_lock_prefixes;
        for text in storyloom_core::message::user_texts(self.messages).rev() {
            for prefix in prefixes.iter().filter(|p| !p.is_empty()) {
                let Some((_, after)) = text.split_once(prefix.as_str()) else {
                    continue;
                };
                let after = after.trim();
                if after.is_empty() {
                    continue;
                }
                let first_line = after.lines().next().unwrap_or("").trim();
                return (!first_line.is_empty()).then(|| clip(first_line, 80).to_string());
            }
        }
        None
    }

    /// The storyboard grid created this turn: the first image `createNode`
    /// whose label or prompt carries a storyboard marker.
    pub fn storyboard_create<'d>(&self, draft: &'d TurnDraft) -> Option<(usize, &'d ToolCall)> {
        draft
            .creates()
            .filter(|(_, c)| c.node_type() == Some("image"))
            .find(|(_, c)| {
                let hint = format!("{}\n{}", c.label().unwrap_or(""), c.prompt());
                self.is_storyboard_text(&hint)
            })
    }

    /// Label of [`Self::storyboard_create`], when it has one.
    pub fn storyboard_label(&self, draft: &TurnDraft) -> Option<String> {
        self.storyboard_create(draft)
            .and_then(|(_, c)| c.label())
            .map(str::to_string)
    }
}

/// One step of the chain.
pub trait PolicyRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, draft: &TurnDraft, ctx: &PolicyContext<'_>) -> Result<TurnDraft, RuleError>;
}

/// The ordered rule chain.
pub struct ContinuityPolicy {
    rules: Vec<Box<dyn PolicyRule>>,
}

impl Default for ContinuityPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl ContinuityPolicy {
    pub fn new(rules: Vec<Box<dyn PolicyRule>>) -> Self {
        Self { rules }
    }

    /// The full chain in its fixed order.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(gates::StoryBranchSuggestion),
            Box::new(gates::LockConfirmationGate),
            Box::new(gates::SupervisorOverride),
            Box::new(gates::NewCharacterConfirmation),
            Box::new(normalize::ImageTypeNormalization),
            Box::new(normalize::ComposeVideoDuration),
            Box::new(wiring::StoryboardReferences),
            Box::new(wiring::AutoComposeVideo),
            Box::new(wiring::GeneralReferences),
            Box::new(autorun::PrematureVideoRun),
            Box::new(autorun::AutoRunImages),
        ])
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn apply(&self, draft: TurnDraft, ctx: &PolicyContext<'_>) -> TurnDraft {
        self.rules.iter().fold(draft, |current, rule| match rule.apply(&current, ctx) {
            Ok(next) => {
                if next != current {
                    debug!(rule = rule.name(), calls = next.tool_calls.len(), "Policy rule changed the turn");
                }
                next
            }
            Err(e) => {
                warn!(rule = rule.name(), error = %e, "Policy rule failed, keeping previous snapshot");
                current
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use serde_json::{Map, Value, json};
    use storyloom_core::reply::TurnRequest;

    pub fn state(user_text: &str) -> ConversationState {
        let mut state = ConversationState::from_request(TurnRequest::from_user_text(user_text));
        state.allow_canvas_tools = true;
        state
    }

    pub fn with_canvas(mut state: ConversationState, canvas: Value) -> ConversationState {
        state.canvas = CanvasContext::from_value(&canvas);
        state
    }

    pub fn config(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    pub fn image(label: &str, prompt: &str) -> ToolCall {
        ToolCall::create_node(format!("create_{label}"), "image", label, config(json!({"kind": "image", "prompt": prompt})))
    }

    pub fn video(label: &str, cfg: Value) -> ToolCall {
        ToolCall::create_node(format!("create_{label}"), "composeVideo", label, config(cfg))
    }

    pub fn run(label: &str) -> ToolCall {
        ToolCall::run(format!("run_{label}"), label)
    }

    pub fn ids(draft: &TurnDraft) -> Vec<&str> {
        draft.tool_calls.iter().map(|c| c.id.as_str()).collect()
    }
}
