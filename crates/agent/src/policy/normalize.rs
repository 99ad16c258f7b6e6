//! Canonical node types and video constraints.

use serde_json::{Map, Number, Value};
use storyloom_core::error::RuleError;

use super::{PolicyContext, PolicyRule, TurnDraft};

const MIN_VIDEO_SECONDS: f64 = 10.0;
const MAX_VIDEO_SECONDS: f64 = 15.0;
const SEGMENT_NOTE: &str = "\n\n约束：本次为第1段（<=15秒）。如需更长成片，请分段生成第2段/第3段。";

/// `textToImage` is a deprecated alias of `image`, both as the node type
/// and as `config.kind`.
pub struct ImageTypeNormalization;

impl PolicyRule for ImageTypeNormalization {
    fn name(&self) -> &'static str {
        "image_type_normalization"
    }

    fn apply(&self, draft: &TurnDraft, _ctx: &PolicyContext<'_>) -> Result<TurnDraft, RuleError> {
        let mut next = draft.clone();
        for call in next.tool_calls.iter_mut() {
            if call.node_type() == Some("textToImage") {
                call.arguments.insert("type".into(), Value::String("image".into()));
            }
            if call.config_str("kind") == Some("textToImage") {
                call.edit_config(|cfg| cfg.insert("kind".into(), Value::String("image".into())));
            }
        }
        Ok(next)
    }
}

/// Clamp `composeVideo` durations to 10..=15 seconds and build a prompt
/// from structured shot lists when the model left `prompt` empty.
pub struct ComposeVideoDuration;

impl PolicyRule for ComposeVideoDuration {
    fn name(&self) -> &'static str {
        "compose_video_duration"
    }

    fn apply(&self, draft: &TurnDraft, _ctx: &PolicyContext<'_>) -> Result<TurnDraft, RuleError> {
        let mut next = draft.clone();
        for call in next.tool_calls.iter_mut() {
            if call.node_type() != Some("composeVideo") {
                continue;
            }
            match call.arguments.get("config") {
                None | Some(Value::Null) => continue,
                Some(Value::Object(_)) => {}
                Some(_) => {
                    return Err(RuleError::MalformedCall {
                        call_id: call.id.clone(),
                        reason: "composeVideo config is not an object".into(),
                    });
                }
            }
            call.edit_config(normalize_video_config);
        }
        Ok(next)
    }
}

fn normalize_video_config(cfg: &mut Map<String, Value>) {
    let raw = match cfg.get("durationSeconds") {
        Some(v) if !v.is_null() => Some(v),
        _ => cfg.get("duration"),
    };
    if let Some(seconds) = raw.and_then(Value::as_f64) {
        if seconds < MIN_VIDEO_SECONDS {
            cfg.insert("durationSeconds".into(), Value::from(MIN_VIDEO_SECONDS as i64));
        } else if seconds > MAX_VIDEO_SECONDS {
            cfg.insert("durationSeconds".into(), Value::from(MAX_VIDEO_SECONDS as i64));
            if let Some(Value::String(prompt)) = cfg.get_mut("prompt")
                && !prompt.contains("分段")
            {
                *prompt = format!("{}{SEGMENT_NOTE}", prompt.trim_end());
            }
        } else {
            cfg.insert("durationSeconds".into(), Value::from(seconds.round() as i64));
        }
    }

    let has_prompt = cfg
        .get("prompt")
        .and_then(Value::as_str)
        .is_some_and(|p| !p.trim().is_empty());
    let structured = ["shots", "characters"]
        .iter()
        .any(|k| cfg.get(*k).is_some_and(Value::is_array));
    if !has_prompt && structured {
        let prompt = prompt_from_shot_list(cfg);
        if !prompt.is_empty() {
            cfg.insert("prompt".into(), Value::String(prompt));
        }
    }
}

fn text_of(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn first_text(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().filter_map(|k| map.get(*k)).find_map(text_of)
}

fn first_number<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Number> {
    keys.iter().filter_map(|k| map.get(*k)).find_map(|v| match v {
        Value::Number(n) => Some(n),
        _ => None,
    })
}

/// Flatten `{shots, characters, ...}` into a readable shot-list prompt.
pub fn prompt_from_shot_list(cfg: &Map<String, Value>) -> String {
    let mut lines = vec!["10–15秒分镜视频提示词（分镜清单 + 镜头语言）".to_string()];

    let mut meta = Vec::new();
    if let Some(duration) = first_number(cfg, &["durationSeconds", "duration", "duration_sec"]) {
        meta.push(format!("时长: {duration}s"));
    }
    if let Some(fps) = cfg.get("fps").and_then(Value::as_f64) {
        meta.push(format!("FPS: {}", fps as i64));
    }
    if let Some(aspect) = first_text(cfg, &["aspectRatio", "aspect", "ratio"]) {
        meta.push(format!("画幅: {aspect}"));
    }
    if !meta.is_empty() {
        lines.push(meta.join(" / "));
    }
    if let Some(style) = first_text(cfg, &["style", "visualStyle", "look"]) {
        lines.push(format!("风格基准: {style}"));
    }
    if let Some(audio) = first_text(cfg, &["musicSfx", "music", "sfx"]) {
        lines.push(format!("音乐/音效: {audio}"));
    }

    let characters: Vec<&Map<String, Value>> = cfg
        .get("characters")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_object).collect())
        .unwrap_or_default();
    if !characters.is_empty() {
        lines.push(String::new());
        lines.push("角色（保持与画布设定一致）：".into());
        for ch in characters {
            let name = first_text(ch, &["name"]);
            let reference = first_text(ch, &["ref", "label", "nodeId"]);
            let notes = first_text(ch, &["notes"]);
            let mut line = match (name, reference) {
                (Some(name), Some(r)) => format!("- {name}（参考: {r}）"),
                (Some(name), None) => format!("- {name}"),
                (None, Some(r)) => format!("- {r}"),
                (None, None) => continue,
            };
            if let Some(notes) = notes {
                line.push('：');
                line.push_str(&notes);
            }
            lines.push(line);
        }
    }

    let shots: Vec<&Map<String, Value>> = cfg
        .get("shots")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_object).collect())
        .unwrap_or_default();
    if !shots.is_empty() {
        lines.push(String::new());
        lines.push("分镜（逐镜头）：".into());
        for (idx, shot) in shots.into_iter().enumerate() {
            let sid = first_text(shot, &["id"]).unwrap_or_else(|| format!("S{}", idx + 1));
            let mut head = sid;
            if let Some(time) = first_text(shot, &["time"]) {
                head.push_str(&format!("（{time}）"));
            }
            let mut parts = vec![head];
            for (label, key) in [
                ("景别", "shotSize"),
                ("机位/镜头", "camera"),
                ("运动", "movement"),
                ("内容", "action"),
                ("构图", "composition"),
            ] {
                if let Some(value) = first_text(shot, &[key]) {
                    parts.push(format!("{label}: {value}"));
                }
            }
            lines.push(format!("- {}", parts.join("；")));
        }
    }

    lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use serde_json::json;
    use storyloom_config::PolicyConfig;
    use storyloom_core::tool::ToolCall;

    fn run_rule(rule: &dyn PolicyRule, calls: Vec<ToolCall>) -> Result<TurnDraft, RuleError> {
        let s = state("x");
        let config = PolicyConfig::default();
        rule.apply(&TurnDraft::new("", calls), &PolicyContext::new(&s, &config))
    }

    fn video_config(draft: &TurnDraft) -> &Map<String, Value> {
        draft.tool_calls[0].config().unwrap()
    }

    #[test]
    fn text_to_image_becomes_image() {
        let call = ToolCall::create_node("c", "textToImage", "狐狸", config(json!({"kind": "textToImage"})));
        let out = run_rule(&ImageTypeNormalization, vec![call]).unwrap();
        assert_eq!(out.tool_calls[0].node_type(), Some("image"));
        assert_eq!(out.tool_calls[0].config_str("kind"), Some("image"));
    }

    #[test]
    fn duration_is_clamped() {
        let out = run_rule(&ComposeVideoDuration, vec![video("v", json!({"durationSeconds": 4, "prompt": "p"}))]).unwrap();
        assert_eq!(video_config(&out)["durationSeconds"], json!(10));

        let out = run_rule(&ComposeVideoDuration, vec![video("v", json!({"duration": 12.6}))]).unwrap();
        assert_eq!(video_config(&out)["durationSeconds"], json!(13));

        let out = run_rule(&ComposeVideoDuration, vec![video("v", json!({"durationSeconds": "30"}))]).unwrap();
        assert_eq!(video_config(&out)["durationSeconds"], json!("30"));
    }

    #[test]
    fn long_video_gets_segment_note_once() {
        let out = run_rule(
            &ComposeVideoDuration,
            vec![video("v", json!({"durationSeconds": 45, "prompt": "狐狸奔跑  "}))],
        )
        .unwrap();
        let cfg = video_config(&out).clone();
        assert_eq!(cfg["durationSeconds"], json!(15));
        assert_eq!(cfg["prompt"], json!(format!("狐狸奔跑{SEGMENT_NOTE}")));

        let again = run_rule(&ComposeVideoDuration, out.tool_calls).unwrap();
        assert_eq!(video_config(&again)["prompt"], cfg["prompt"]);
    }

    #[test]
    fn non_object_config_is_malformed() {
        let mut call = video("v", json!({}));
        call.arguments.insert("config".into(), json!("oops"));
        let err = run_rule(&ComposeVideoDuration, vec![call]).unwrap_err();
        assert!(matches!(err, RuleError::MalformedCall { .. }));
    }

    #[test]
    fn shot_list_becomes_prompt() {
        let out = run_rule(
            &ComposeVideoDuration,
            vec![video(
                "v",
                json!({
                    "durationSeconds": 12,
                    "fps": 24.0,
                    "aspectRatio": "16:9",
                    "style": "日漫2D",
                    "characters": [{"name": "小狐狸", "ref": "狐狸角色", "notes": "橙色围巾"}, {"label": "兔子角色"}],
                    "shots": [
                        {"time": "0-3s", "shotSize": "远景", "action": "狐狸出门"},
                        {"id": "S9", "camera": "低机位"}
                    ]
                }),
            )],
        )
        .unwrap();
        let prompt = video_config(&out)["prompt"].as_str().unwrap().to_string();
        assert_eq!(
            prompt,
            "10–15秒分镜视频提示词（分镜清单 + 镜头语言）\n\
             时长: 12s / FPS: 24 / 画幅: 16:9\n\
             风格基准: 日漫2D\n\
             \n\
             角色（保持与画布设定一致）：\n\
             - 小狐狸（参考: 狐狸角色）：橙色围巾\n\
             - 兔子角色\n\
             \n\
             分镜（逐镜头）：\n\
             - S1（0-3s）；景别: 远景；内容: 狐狸出门\n\
             - S9；机位/镜头: 低机位"
        );
    }

    #[test]
    fn existing_prompt_is_not_replaced() {
        let out = run_rule(
            &ComposeVideoDuration,
            vec![video("v", json!({"prompt": "keep", "shots": [{"action": "x"}]}))],
        )
        .unwrap();
        assert_eq!(video_config(&out)["prompt"], json!("keep"));
    }
}
