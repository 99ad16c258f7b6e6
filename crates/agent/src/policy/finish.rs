//! Reply finishing: fallback text, model-declared actions and the
//! next-step hook.

use serde::Deserialize;
use storyloom_config::TriggerPhrases;
use storyloom_core::reply::{QuickReply, SourceRef};
use storyloom_core::text::contains_any;
use storyloom_core::tool::{CanvasOp, ToolCall};

use super::{TurnDraft, is_image_type};

const ACTIONS_FENCE: &str = "```tapcanvas_actions";
const MAX_MODEL_ACTIONS: usize = 6;
const MAX_HOOK_ACTIONS: usize = 4;
const NEXT_STEP_HOOK: &str = "\n\n分镜生成后，点下面选项继续。";

/// Short confirmation for a turn that only produced tool calls.
pub fn summarize_calls(calls: &[ToolCall]) -> String {
    let count = |op: CanvasOp| calls.iter().filter(|c| c.is(op)).count();
    let labels: Vec<&str> = calls
        .iter()
        .filter(|c| c.is(CanvasOp::CreateNode))
        .filter_map(ToolCall::label)
        .collect();

    let mut parts = Vec::new();
    let creates = count(CanvasOp::CreateNode);
    if creates > 0 {
        if labels.is_empty() {
            parts.push(format!("已在画布创建 {creates} 个节点"));
        } else {
            let tail = if labels.len() > 3 { "…" } else { "" };
            parts.push(format!("已在画布创建节点：{}{tail}", labels[..labels.len().min(3)].join("、")));
        }
    }
    for (op, verb, unit) in [
        (CanvasOp::UpdateNode, "已更新", "个节点"),
        (CanvasOp::ConnectNodes, "已连接", "条连线"),
        (CanvasOp::RunNode, "已触发运行", "个节点"),
    ] {
        let n = count(op);
        if n > 0 {
            parts.push(format!("{verb} {n} {unit}"));
        }
    }

    if parts.is_empty() {
        "已更新画布。".into()
    } else {
        format!("{}。", parts.join("；"))
    }
}

#[derive(Deserialize)]
struct ActionBlock {
    actions: Vec<serde_json::Value>,
}

/// Strip a ` ```tapcanvas_actions ` block from `text`.
///
/// Returns the cleaned text and the declared actions. `None` means no
/// well-formed block with at least one usable action.
pub fn extract_actions(text: &str) -> (String, Option<Vec<QuickReply>>) {
    let Some(start) = text.find(ACTIONS_FENCE) else {
        return (text.to_string(), None);
    };
    let Some(newline) = text[start + ACTIONS_FENCE.len()..].find('\n') else {
        return (text.to_string(), None);
    };
    let payload_start = start + ACTIONS_FENCE.len() + newline + 1;
    let Some(end) = text[payload_start..].find("```") else {
        return (text.to_string(), None);
    };
    let payload_end = payload_start + end;

    let cleaned = format!("{}{}", &text[..start], &text[payload_end + 3..]).trim().to_string();
    let Ok(block) = serde_json::from_str::<ActionBlock>(text[payload_start..payload_end].trim()) else {
        return (cleaned, None);
    };

    let actions: Vec<QuickReply> = block
        .actions
        .iter()
        .filter_map(|item| {
            let label = item.get("label")?.as_str()?.trim();
            let input = item.get("input")?.as_str()?;
            (!label.is_empty() && !input.trim().is_empty()).then(|| QuickReply::new(label, input))
        })
        .take(MAX_MODEL_ACTIONS)
        .collect();
    (cleaned, (!actions.is_empty()).then_some(actions))
}

fn hook_actions(calls: &[ToolCall]) -> Vec<QuickReply> {
    let mut images = Vec::new();
    let mut videos = Vec::new();
    for call in calls.iter().filter(|c| c.is(CanvasOp::CreateNode)) {
        let Some(label) = call.label() else { continue };
        if is_image_type(call.node_type()) {
            images.push(label);
        }
        if call.node_type() == Some("composeVideo") {
            videos.push(label);
        }
    }
    let ran: Vec<&str> = calls
        .iter()
        .filter(|c| c.is(CanvasOp::RunNode))
        .filter_map(ToolCall::node_id)
        .collect();

    let mut actions = Vec::new();
    if let Some(video) = videos.iter().find(|v| !ran.contains(*v)) {
        actions.push(QuickReply::new("继续生成15s视频", format!("请运行节点：{video}。")));
    }
    if let Some(image) = images.last() {
        actions.push(QuickReply::new(
            "微调九宫格分镜",
            format!("请基于刚生成的九宫格分镜图（{image}）做微调：镜头更紧凑、关键转折更清晰、字幕更短更有黑色幽默；然后再生成15s视频。"),
        ));
    }
    actions.push(QuickReply::new(
        "换一个方向/风格",
        "我想换一个方向/风格：\n- 新风格：\n- 重点改动：\n请基于当前项目重新生成九宫格分镜并继续生成15s视频。",
    ));
    actions.truncate(MAX_HOOK_ACTIONS);
    actions
}

/// Final touches after the continuity policy.
pub fn finish_reply(draft: TurnDraft, triggers: &TriggerPhrases) -> TurnDraft {
    let TurnDraft {
        mut reply,
        tool_calls,
        mut quick_replies,
    } = draft;

    if reply.trim().is_empty() && !tool_calls.is_empty() {
        reply = summarize_calls(&tool_calls);
    }
    if !reply.trim().is_empty() {
        let (cleaned, actions) = extract_actions(&reply);
        reply = cleaned;
        if let Some(actions) = actions {
            quick_replies = actions;
        }
    }

    if !tool_calls.is_empty() {
        if quick_replies.is_empty() {
            quick_replies = hook_actions(&tool_calls);
        }
        if !contains_any(&reply, &triggers.next_step_markers) {
            reply = format!("{}{NEXT_STEP_HOOK}", reply.trim()).trim().to_string();
        }
    }

    TurnDraft {
        reply,
        tool_calls,
        quick_replies,
    }
}

/// Keep the sources the reply actually cites, expanding short links.
pub fn cite_sources(reply: &mut String, sources: &[SourceRef]) -> Vec<SourceRef> {
    let mut cited = Vec::new();
    for source in sources {
        if source.short_url.is_empty() || !reply.contains(&source.short_url) {
            continue;
        }
        if source.short_url != source.value {
            *reply = reply.replace(&source.short_url, &source.value);
        }
        cited.push(source.clone());
    }
    cited
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn call_summary_texts() {
        assert_eq!(summarize_calls(&[]), "已更新画布。");
        let calls = vec![
            image("a", "p"),
            image("b", "p"),
            image("c", "p"),
            image("d", "p"),
            ToolCall::connect("e", "a", "b", "out-image", "in-image"),
            run("a"),
            run("b"),
        ];
        assert_eq!(
            summarize_calls(&calls),
            "已在画布创建节点：a、b、c…；已连接 1 条连线；已触发运行 2 个节点。"
        );
    }

    #[test]
    fn action_block_is_extracted() {
        let text = "好的。\n```tapcanvas_actions\n{\"actions\":[{\"label\":\" 继续 \",\"input\":\"继续生成\"},{\"label\":\"\",\"input\":\"x\"},\"bad\"]}\n```\n还有问题吗？";
        let (cleaned, actions) = extract_actions(text);
        assert_eq!(cleaned, "好的。\n\n还有问题吗？");
        let actions = actions.unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].label, "继续");
    }

    #[test]
    fn malformed_block_is_removed_without_actions() {
        let (cleaned, actions) = extract_actions("看这里\n```tapcanvas_actions\nnot json\n```");
        assert_eq!(cleaned, "看这里");
        assert!(actions.is_none());

        let (cleaned, actions) = extract_actions("```tapcanvas_actions no newline");
        assert_eq!(cleaned, "```tapcanvas_actions no newline");
        assert!(actions.is_none());
    }

    #[test]
    fn model_actions_win_over_existing_replies() {
        let mut draft = TurnDraft::new("```tapcanvas_actions\n{\"actions\":[{\"label\":\"A\",\"input\":\"a\"}]}\n```", vec![]);
        draft.quick_replies = vec![QuickReply::new("old", "old")];
        let out = finish_reply(draft, &TriggerPhrases::default());
        assert_eq!(out.quick_replies, vec![QuickReply::new("A", "a")]);
        assert_eq!(out.reply, "");
    }

    #[test]
    fn canvas_turn_gets_hook_and_summary() {
        let draft = TurnDraft::new(
            "",
            vec![
                image("分镜", "九宫格"),
                video("视频", json!({})),
                ToolCall::connect("c", "分镜", "视频", "out-image", "in-image"),
                run("分镜"),
            ],
        );
        let out = finish_reply(draft, &TriggerPhrases::default());
        assert_eq!(
            out.reply,
            "已在画布创建节点：分镜、视频；已连接 1 条连线；已触发运行 1 个节点。\n\n分镜生成后，点下面选项继续。"
        );
        let labels: Vec<_> = out.quick_replies.iter().map(|q| q.label.as_str()).collect();
        assert_eq!(labels, vec!["继续生成15s视频", "微调九宫格分镜", "换一个方向/风格"]);
        assert_eq!(out.quick_replies[0].input, "请运行节点：视频。");
    }

    #[test]
    fn hook_is_not_repeated() {
        let draft = TurnDraft::new("下一步点一个按钮", vec![run("x")]);
        let out = finish_reply(draft, &TriggerPhrases::default());
        assert_eq!(out.reply, "下一步点一个按钮");
    }

    #[test]
    fn chat_turn_is_untouched() {
        let draft = TurnDraft::new("  你好 ", vec![]);
        let out = finish_reply(draft, &TriggerPhrases::default());
        assert_eq!(out.reply, "  你好 ");
        assert!(out.quick_replies.is_empty());
    }

    #[test]
    fn only_cited_sources_are_kept() {
        let sources = vec![SourceRef::new("A", "https://kb/a"), SourceRef::new("B", "https://kb/b")];
        let mut reply = "见 https://kb/b".to_string();
        let cited = cite_sources(&mut reply, &sources);
        assert_eq!(cited.len(), 1);
        assert_eq!(cited[0].label, "B");
    }
}
