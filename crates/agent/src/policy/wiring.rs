//! Reference edges and the automatic storyboard-to-video step.

use serde_json::{Map, Value};
use storyloom_core::error::RuleError;
use storyloom_core::text::{char_len, clip, contains_any};
use storyloom_core::tool::{CanvasOp, ToolCall};

use super::{PolicyContext, PolicyRule, TurnDraft, finished_image, is_image_type};

/// Most reference images wired into one storyboard.
const MAX_STORYBOARD_REFS: usize = 3;
const STORYBOARD_HINT_CHARS: usize = 1200;

pub(crate) const CONTINUITY_NOTE: &str = "\n\n连续性要求（很重要）：\n- 九宫格面板之间要有“衔接帧”感觉：面板N的结尾姿态/构图/机位/光线，应与面板N+1的开场保持一致（像同一动作的承接），避免突兀跳切。\n- 如果上游参考里包含上一张九宫格分镜图：请让本次面板1自然承接上一张的面板9（构图/主体位置/光线延续），再继续推进新内容。\n- 场景不要自由切换；主体数量不要在分镜中途增删。\n";

const AUTO_VIDEO_PROMPT: &str = "根据上游参考图片（九宫格分镜图）生成一个15秒的二维动画视频：\n- 画面风格/角色外观严格跟随参考图；不要改变角色造型与配色。\n- 按参考图的镜头节奏推进（从1到9），镜头之间自然衔接；保持同一场景光线连续。\n- 不要出现任何可读文字/水印/Logo。\n- 输出16:9，动作清晰，镜头稳定，节奏温暖治愈。";

/// Existing canvas images a new storyboard should consume: the previous
/// storyboard grid first, then character, prop and mascot sheets.
pub fn pick_reference_labels(ctx: &PolicyContext<'_>, storyboard_label: &str) -> Vec<String> {
    let triggers = ctx.triggers;
    let finished: Vec<(usize, &str, String)> = ctx
        .canvas
        .nodes
        .iter()
        .enumerate()
        .filter_map(|(idx, node)| {
            let (label, node) = finished_image(node)?;
            (label != storyboard_label).then(|| {
                let hint = format!("{label}\n{}", node.prompt_preview.as_deref().unwrap_or(""));
                (idx, label, hint)
            })
        })
        .collect();

    let mut picked: Vec<String> = Vec::new();
    if let Some((_, label, _)) = finished.iter().rev().find(|(_, _, hint)| ctx.is_storyboard_text(hint)) {
        picked.push(label.to_string());
    }

    let mut scored: Vec<(u32, usize, &str)> = finished
        .iter()
        .filter(|(_, label, _)| !contains_any(label, &triggers.anchor_exclude))
        .filter(|(_, label, _)| !picked.iter().any(|p| p == label))
        .map(|(idx, label, _)| {
            let mut score = 0;
            if contains_any(label, &triggers.anchor_character) {
                score += 3;
            }
            if contains_any(label, &triggers.anchor_prop) {
                score += 2;
            }
            if contains_any(&label.to_lowercase(), &triggers.anchor_mascot) {
                score += 2;
            }
            (score, *idx, *label)
        })
        .collect();
    scored.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));

    for (_, _, label) in scored {
        if picked.len() >= MAX_STORYBOARD_REFS {
            break;
        }
        if !picked.iter().any(|p| p == label) {
            picked.push(label.to_string());
        }
    }
    picked
}

/// Wire reference images into the storyboard and ask for bridge frames
/// between panels.
pub struct StoryboardReferences;

impl PolicyRule for StoryboardReferences {
    fn name(&self) -> &'static str {
        "storyboard_references"
    }

    fn apply(&self, draft: &TurnDraft, ctx: &PolicyContext<'_>) -> Result<TurnDraft, RuleError> {
        let Some(storyboard) = ctx.storyboard_label(draft) else {
            return Ok(draft.clone());
        };
        let mut next = draft.clone();

        if let Some(call) = next.tool_calls.iter_mut().find(|c| {
            c.is(CanvasOp::CreateNode) && c.node_type() == Some("image") && c.label() == Some(storyboard.as_str())
        }) {
            let prompt = call.prompt();
            let lowered = prompt.to_lowercase();
            if call.config().is_some()
                && !prompt.trim().is_empty()
                && !prompt.contains("衔接帧")
                && !lowered.contains("bridge frame")
            {
                let updated = format!("{}{CONTINUITY_NOTE}", prompt.trim_end());
                call.edit_config(|cfg| cfg.insert("prompt".into(), Value::String(updated)));
            }
        }

        let refs = pick_reference_labels(ctx, &storyboard);
        if refs.is_empty() {
            return Ok(next);
        }

        let pairs = next.connected_pairs();
        let create_idx = next
            .tool_calls
            .iter()
            .position(|c| c.is(CanvasOp::CreateNode) && c.label() == Some(storyboard.as_str()));
        let run_idx = next
            .tool_calls
            .iter()
            .position(|c| c.is(CanvasOp::RunNode) && c.node_id() == Some(storyboard.as_str()));
        let mut insert_at = run_idx.unwrap_or(next.tool_calls.len());
        if let Some(create_idx) = create_idx
            && insert_at <= create_idx
        {
            insert_at = create_idx + 1;
        }

        let edges: Vec<ToolCall> = refs
            .iter()
            .filter(|src| !pairs.contains(&(src.to_string(), storyboard.clone())))
            .map(|src| {
                ToolCall::connect(
                    format!("auto_ref_{src}_to_{storyboard}"),
                    src,
                    &storyboard,
                    "out-image-wide",
                    "in-image-wide",
                )
            })
            .collect();
        next.tool_calls.splice(insert_at..insert_at, edges);
        Ok(next)
    }
}

/// Derive the video label from the storyboard label.
fn video_label_for(storyboard: &str) -> String {
    let replaced = storyboard.replace("九宫格分镜", "15s视频").replace("分镜", "15s视频");
    if replaced == storyboard {
        format!("{storyboard}-15s视频")
    } else {
        replaced
    }
}

fn storyboard_hint(storyboard_prompt: &str) -> String {
    let base = storyboard_prompt.strip_suffix(CONTINUITY_NOTE).unwrap_or(storyboard_prompt);
    let lines: Vec<&str> = base.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let joined = lines.join("\n");
    if char_len(&joined) > STORYBOARD_HINT_CHARS {
        format!("{}…", clip(&joined, STORYBOARD_HINT_CHARS).trim_end())
    } else {
        joined
    }
}

/// A storyboard without a video gets a 15-second `composeVideo` fed by it.
pub struct AutoComposeVideo;

impl PolicyRule for AutoComposeVideo {
    fn name(&self) -> &'static str {
        "auto_compose_video"
    }

    fn apply(&self, draft: &TurnDraft, ctx: &PolicyContext<'_>) -> Result<TurnDraft, RuleError> {
        let Some((_, create)) = ctx.storyboard_create(draft) else {
            return Ok(draft.clone());
        };
        let Some(storyboard) = create.label().map(str::to_string) else {
            return Ok(draft.clone());
        };
        if draft.has_create_of_type("composeVideo") {
            return Ok(draft.clone());
        }

        let video = video_label_for(&storyboard);
        if draft.creates().any(|(_, c)| c.label() == Some(video.as_str())) {
            return Err(RuleError::Failed {
                rule: "auto_compose_video",
                reason: format!("label {video} is already taken"),
            });
        }

        let mut prompt = AUTO_VIDEO_PROMPT.to_string();
        let hint = storyboard_hint(create.prompt());
        if !hint.is_empty() {
            prompt.push_str("\n\n分镜补充（来自九宫格分镜的镜头描述，用于动作/镜头节奏对齐；以参考图为准）：\n");
            prompt.push_str(&hint);
        }

        let mut config = Map::new();
        config.insert("kind".into(), Value::String("composeVideo".into()));
        config.insert("durationSeconds".into(), Value::from(15));
        config.insert("aspectRatio".into(), Value::String("16:9".into()));
        config.insert("prompt".into(), Value::String(prompt));

        let mut next = draft.clone();
        next.tool_calls.push(ToolCall::create_node(
            format!("auto_create_video_{video}"),
            "composeVideo",
            &video,
            config,
        ));
        next.tool_calls.push(ToolCall::connect(
            format!("auto_connect_{storyboard}_to_{video}"),
            &storyboard,
            &video,
            "out-image",
            "in-image",
        ));
        Ok(next)
    }
}

/// "Based on / same style as" requests wire the newest finished image
/// into every new image node.
pub struct GeneralReferences;

impl PolicyRule for GeneralReferences {
    fn name(&self) -> &'static str {
        "general_references"
    }

    fn apply(&self, draft: &TurnDraft, ctx: &PolicyContext<'_>) -> Result<TurnDraft, RuleError> {
        if !ctx.reference_intent() {
            return Ok(draft.clone());
        }
        let Some(upstream) = ctx
            .canvas
            .nodes
            .iter()
            .rev()
            .filter_map(finished_image)
            .map(|(label, _)| label)
            .find(|label| !contains_any(label, &ctx.triggers.reference_exclude))
        else {
            return Ok(draft.clone());
        };

        let pairs = draft.connected_pairs();
        let mut wired: Vec<String> = draft
            .tool_calls
            .iter()
            .filter(|c| c.is(CanvasOp::ConnectNodes))
            .filter_map(|c| c.target().map(str::to_string))
            .collect();

        let targets: Vec<String> = draft
            .creates()
            .map(|(_, c)| c)
            .filter(|c| is_image_type(c.node_type()))
            .filter(|c| !ctx.is_storyboard_text(&format!("{}\n{}", c.label().unwrap_or(""), c.prompt())))
            .filter_map(|c| c.label().map(str::to_string))
            .collect();

        let mut next = draft.clone();
        for target in targets {
            if target == upstream
                || wired.contains(&target)
                || pairs.contains(&(upstream.to_string(), target.clone()))
            {
                continue;
            }
            let Some(create_idx) = next
                .tool_calls
                .iter()
                .position(|c| c.is(CanvasOp::CreateNode) && c.label() == Some(target.as_str()))
            else {
                continue;
            };
            let insert_at = next.tool_calls[create_idx + 1..]
                .iter()
                .position(|c| c.is(CanvasOp::RunNode) && c.node_id() == Some(target.as_str()))
                .map(|offset| create_idx + 1 + offset)
                .unwrap_or(create_idx + 1);
            next.tool_calls.insert(
                insert_at,
                ToolCall::connect(format!("auto_ref_{upstream}_to_{target}"), upstream, &target, "out-image", "in-image"),
            );
            wired.push(target);
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use serde_json::json;
    use storyloom_config::PolicyConfig;
    use storyloom_core::state::ConversationState;

    fn canvas_state(user: &str) -> ConversationState {
        with_canvas(
            state(user),
            json!({"nodes": [
                {"label": "狐狸角色", "kind": "image", "status": "success", "imageUrl": "https://img/fox.png"},
                {"label": "旧草图", "kind": "image", "status": "error", "imageUrl": "https://img/x.png"},
                {"label": "第一集九宫格分镜", "kind": "image", "status": "success", "imageUrl": "https://img/sb1.png"},
                {"label": "背景", "kind": "textToImage", "status": "success", "imageUrl": "https://img/bg.png"},
                {"label": "魔法道具", "kind": "image", "status": "success", "imageUrl": "https://img/prop.png"},
                {"label": "无图", "kind": "image", "status": "success"}
            ]}),
        )
    }

    fn apply(rule: &dyn PolicyRule, s: &ConversationState, draft: TurnDraft) -> TurnDraft {
        let config = PolicyConfig::default();
        rule.apply(&draft, &PolicyContext::new(s, &config)).unwrap()
    }

    #[test]
    fn reference_picking_prefers_previous_storyboard_then_characters() {
        let s = canvas_state("继续做第二集分镜");
        let config = PolicyConfig::default();
        let ctx = PolicyContext::new(&s, &config);
        assert_eq!(
            pick_reference_labels(&ctx, "第二集九宫格分镜"),
            vec!["第一集九宫格分镜", "狐狸角色", "魔法道具"]
        );
    }

    #[test]
    fn character_and_prop_anchors_match_case_sensitively() {
        let s = with_canvas(
            state("继续做分镜"),
            json!({"nodes": [
                {"label": "Character Sheet", "kind": "image", "status": "success", "imageUrl": "https://img/a.png"},
                {"label": "character turnaround", "kind": "image", "status": "success", "imageUrl": "https://img/b.png"},
                {"label": "Fox Plush", "kind": "image", "status": "success", "imageUrl": "https://img/c.png"},
                {"label": "背景", "kind": "image", "status": "success", "imageUrl": "https://img/d.png"}
            ]}),
        );
        let config = PolicyConfig::default();
        let ctx = PolicyContext::new(&s, &config);
        assert_eq!(
            pick_reference_labels(&ctx, "新分镜"),
            vec!["character turnaround", "Fox Plush", "背景"]
        );
    }

    #[test]
    fn storyboard_gets_edges_before_its_run_and_continuity_note() {
        let s = canvas_state("继续做第二集分镜");
        let draft = TurnDraft::new(
            "",
            vec![image("第二集九宫格分镜", "3x3 panels of the fox"), run("第二集九宫格分镜")],
        );
        let out = apply(&StoryboardReferences, &s, draft);
        assert_eq!(
            ids(&out),
            vec![
                "create_第二集九宫格分镜",
                "auto_ref_第一集九宫格分镜_to_第二集九宫格分镜",
                "auto_ref_狐狸角色_to_第二集九宫格分镜",
                "auto_ref_魔法道具_to_第二集九宫格分镜",
                "run_第二集九宫格分镜",
            ]
        );
        assert_eq!(out.tool_calls[1].str_arg("sourceHandle"), Some("out-image-wide"));
        assert!(out.tool_calls[0].prompt().ends_with(CONTINUITY_NOTE));

        let again = apply(&StoryboardReferences, &s, out.clone());
        assert_eq!(again, out);
    }

    #[test]
    fn auto_video_follows_storyboard() {
        let s = state("继续做九宫格分镜");
        let draft = TurnDraft::new(
            "",
            vec![image("第二集九宫格分镜", &format!("面板1：出门\n\n面板2：奔跑{CONTINUITY_NOTE}"))],
        );
        let out = apply(&AutoComposeVideo, &s, draft);
        assert_eq!(
            ids(&out),
            vec![
                "create_第二集九宫格分镜",
                "auto_create_video_第二集15s视频",
                "auto_connect_第二集九宫格分镜_to_第二集15s视频",
            ]
        );
        let video = &out.tool_calls[1];
        assert_eq!(video.node_type(), Some("composeVideo"));
        assert_eq!(video.config().unwrap()["durationSeconds"], json!(15));
        assert!(video.prompt().ends_with("以参考图为准）：\n面板1：出门\n面板2：奔跑"));
        assert_eq!(out.tool_calls[2].source(), Some("第二集九宫格分镜"));
    }

    #[test]
    fn auto_video_label_without_storyboard_word() {
        assert_eq!(video_label_for("第二集分镜"), "第二集15s视频");
        assert_eq!(video_label_for("Episode 2 storyboard"), "Episode 2 storyboard-15s视频");
    }

    #[test]
    fn storyboard_hint_is_clipped() {
        let long = "镜".repeat(1500);
        let hint = storyboard_hint(&long);
        assert_eq!(hint.chars().count(), STORYBOARD_HINT_CHARS + 1);
        assert!(hint.ends_with('…'));
    }

    #[test]
    fn auto_video_skipped_when_model_made_one() {
        let s = state("做分镜");
        let draft = TurnDraft::new("", vec![image("分镜", "九宫格"), video("成片", json!({"prompt": "p"}))]);
        let out = apply(&AutoComposeVideo, &s, draft.clone());
        assert_eq!(out, draft);
    }

    #[test]
    fn general_reference_wires_latest_plain_image() {
        let s = canvas_state("基于背景做一张变体");
        let draft = TurnDraft::new("", vec![image("背景变体", "same scene at night"), run("背景变体")]);
        let out = apply(&GeneralReferences, &s, draft);
        assert_eq!(ids(&out), vec!["create_背景变体", "auto_ref_魔法道具_to_背景变体", "run_背景变体"]);
        assert_eq!(out.tool_calls[1].source(), Some("魔法道具"));
    }

    #[test]
    fn general_reference_accepts_grid_labelled_upstream() {
        let s = with_canvas(
            state("基于这个风格做海报"),
            json!({"nodes": [
                {"label": "狐狸角色", "kind": "image", "status": "success", "imageUrl": "https://img/fox.png"},
                {"label": "3x3参考网格", "kind": "image", "status": "success", "imageUrl": "https://img/grid.png"}
            ]}),
        );
        let draft = TurnDraft::new("", vec![image("海报", "poster")]);
        let out = apply(&GeneralReferences, &s, draft);
        assert_eq!(ids(&out), vec!["create_海报", "auto_ref_3x3参考网格_to_海报"]);
    }

    #[test]
    fn general_reference_skips_storyboards_and_wired_targets() {
        let s = canvas_state("参考之前的风格");
        let draft = TurnDraft::new(
            "",
            vec![
                image("新分镜", "九宫格"),
                image("海报", "poster"),
                ToolCall::connect("c1", "狐狸角色", "海报", "out-image", "in-image"),
            ],
        );
        let out = apply(&GeneralReferences, &s, draft.clone());
        assert_eq!(out, draft);
    }
}
