//! Content safety: a model classifier plus deterministic rewrites.
//!
//! The classifier only decides; every change to the turn is made by the
//! fixed replacement tables below, so the same input always yields the
//! same output.

use std::sync::Arc;

use serde_json::Value;
use storyloom_core::error::ProviderError;
use storyloom_core::provider::Provider;
use storyloom_core::reply::QuickReply;
use storyloom_core::safety::SafetyDecision;
use storyloom_core::tool::{CanvasOp, ToolCall};
use tracing::{info, warn};

use crate::policy::TurnDraft;
use crate::prompts;
use crate::structured::{StructuredOutput, call_structured};

const SEXUAL_REPLACEMENTS: &[(&str, &str)] = &[
    ("无码", "（不展示细节）"),
    ("露点", "穿着完整（不露骨）"),
    ("裸体", "穿着完整（不露骨）"),
    ("性交", "亲密互动（不露骨）"),
    ("做爱", "亲密互动（不露骨）"),
    ("口交", "亲密互动（不露骨）"),
    ("肛交", "亲密互动（不露骨）"),
    ("强奸", "性侵（不展示细节，仅点到为止）"),
    ("迷奸", "性侵（不展示细节，仅点到为止）"),
    ("porn", "（不露骨）"),
];

const VIOLENT_REPLACEMENTS: &[(&str, &str)] = &[
    ("爆头", "强烈冲击（不展示细节）"),
    ("脑浆", "冲击性的后果（不展示细节）"),
    ("断肢", "受伤倒下（不展示细节）"),
    ("肢解", "镜头切走（用暗示表达）"),
    ("开膛", "镜头切走（用暗示表达）"),
    ("剖腹", "镜头切走（用暗示表达）"),
    ("割喉", "镜头切走（用暗示表达）"),
    ("斩首", "镜头切走（用暗示表达）"),
    ("砍头", "镜头切走（用暗示表达）"),
    ("内脏", "不展示细节"),
    ("肠子", "不展示细节"),
    ("碎尸", "不展示细节"),
    ("喷血", "用剪影/反应镜头表达冲击（不展示细节）"),
    ("血浆", "用光影/音效表达冲击（不展示细节）"),
    ("血肉模糊", "画面用遮挡/虚焦表达（不展示细节）"),
];

const SEXUAL_NEGATIVE: &str = "nude, naked, explicit sex, porn, nipples, genitalia";
const VIOLENT_NEGATIVE: &str =
    "gore, dismemberment, intestines, brains, blood splatter close-up, explicit violence, torture porn, nude, explicit sex";

const BLOCK_TEXT: &str = "内容安全检查判定为需要先降级到 PG-13（不露骨、不裸露）。我不会生成露骨色情内容；可以先把表达改成含蓄、电影化暗示再继续做分镜/视频。点一个按钮继续。";

fn replace_all(text: &str, table: &[(&str, &str)]) -> String {
    table
        .iter()
        .fold(text.to_string(), |acc, (from, to)| acc.replace(from, to))
}

pub fn sanitize_sexual_text(text: &str) -> String {
    replace_all(text, SEXUAL_REPLACEMENTS)
}

pub fn sanitize_violent_text(text: &str) -> String {
    replace_all(text, VIOLENT_REPLACEMENTS)
}

/// Append `tokens` to a negative prompt unless already present.
fn merge_negative(existing: &str, tokens: &str) -> String {
    if existing.contains(tokens) {
        return existing.to_string();
    }
    if existing.is_empty() {
        tokens.to_string()
    } else {
        format!("{existing}\n{tokens}").trim().to_string()
    }
}

/// Prompts of every `createNode` in the turn, for the classifier.
pub fn planned_prompts(calls: &[ToolCall]) -> String {
    calls
        .iter()
        .filter(|c| c.is(CanvasOp::CreateNode))
        .map(ToolCall::prompt)
        .filter(|p| !p.trim().is_empty())
        .map(|p| format!("\n{p}"))
        .collect()
}

fn sanitize_prompts(calls: &mut [ToolCall], rewrite: fn(&str) -> String, negative: &str) {
    for call in calls.iter_mut().filter(|c| c.is(CanvasOp::CreateNode)) {
        if call.config().is_none() {
            continue;
        }
        call.edit_config(|cfg| {
            if let Some(Value::String(prompt)) = cfg.get_mut("prompt") {
                *prompt = rewrite(prompt);
            }
            let current = cfg.get("negativePrompt").and_then(Value::as_str).unwrap_or("");
            let merged = merge_negative(current, negative);
            cfg.insert("negativePrompt".into(), Value::String(merged));
        });
    }
}

fn block_replies() -> Vec<QuickReply> {
    vec![
        QuickReply::new(
            "改成含蓄浪漫（不露骨）",
            "把刚才的内容改写成含蓄浪漫、PG-13表达：不出现裸体/性行为/露骨描写，用暗示与情绪推进；然后再生成九宫格分镜。",
        ),
        QuickReply::new(
            "改成亲密但克制",
            "把亲密内容改成拥抱/牵手/靠近等克制表达（不涉及色情），强调关系与情绪；然后再生成分镜/视频。",
        ),
        QuickReply::new(
            "只保留剧情，不生成画面",
            "先不要生成画面。把内容改成适合大众平台的剧情梗概（不露骨），并给我3个可选走向按钮。",
        ),
        QuickReply::new(
            "我只是要分镜（无色情）",
            "我这段没有色情/裸露/性行为内容，只是要做分镜与提示词；请按原剧情继续生成九宫格分镜与统一提示词，并在提示词里明确：无裸露、无性行为、PG-13。",
        ),
    ]
}

/// Apply a classifier decision to the turn.
///
/// Blocking wins over sanitizing, and sexual content over violence. A
/// blocked turn loses all calls; a sanitized one keeps them with rewritten
/// prompts and extended negative prompts.
pub fn apply(decision: &SafetyDecision, draft: TurnDraft) -> TurnDraft {
    if decision.should_block && decision.is_sexual() {
        return TurnDraft {
            reply: BLOCK_TEXT.into(),
            tool_calls: Vec::new(),
            quick_replies: block_replies(),
        };
    }

    let mut next = draft;
    if decision.should_sanitize && decision.is_sexual() {
        sanitize_prompts(&mut next.tool_calls, sanitize_sexual_text, SEXUAL_NEGATIVE);
    } else if decision.should_sanitize && decision.is_violent() {
        next.reply = sanitize_violent_text(&next.reply);
        sanitize_prompts(&mut next.tool_calls, sanitize_violent_text, VIOLENT_NEGATIVE);
    }
    next
}

impl StructuredOutput for SafetyDecision {
    const NAME: &'static str = "SafetyDecision";

    fn schema() -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "sexual": {"type": "boolean"},
                "nudity": {"type": "boolean"},
                "gore": {"type": "boolean"},
                "violence": {"type": "boolean"},
                "should_block": {"type": "boolean"},
                "should_sanitize": {"type": "boolean"},
                "reason": {"type": "string"},
            },
            "required": ["sexual", "nudity", "gore", "violence", "should_block", "should_sanitize", "reason"],
            "additionalProperties": false,
        })
    }

    fn fallback(_raw: &str, error: Option<&ProviderError>) -> Self {
        if let Some(e) = error {
            warn!(error = %e, "Safety classifier unavailable");
        }
        SafetyDecision::fallback()
    }
}

/// Stage 4: classify the user text plus planned prompts, then rewrite.
pub struct SafetyFilter {
    provider: Arc<dyn Provider>,
    model: String,
}

impl SafetyFilter {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    pub async fn classify(&self, user_text: &str, calls: &[ToolCall]) -> SafetyDecision {
        let prompt = prompts::safety_classifier(user_text, &planned_prompts(calls));
        call_structured(self.provider.as_ref(), &self.model, &prompt).await
    }

    pub async fn filter(&self, user_text: &str, draft: TurnDraft) -> TurnDraft {
        let decision = self.classify(user_text, &draft.tool_calls).await;
        if decision.flagged() {
            info!(
                sexual = decision.is_sexual(),
                violent = decision.is_violent(),
                block = decision.should_block,
                sanitize = decision.should_sanitize,
                reason = %decision.reason,
                "Safety decision"
            );
        }
        apply(&decision, draft)
    }
}
