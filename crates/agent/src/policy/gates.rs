//! Gates that stop or narrow canvas work before any wiring happens.

use std::collections::HashSet;

use storyloom_core::error::RuleError;
use storyloom_core::reply::QuickReply;
use storyloom_core::text::{contains_any, contains_any_ci};
use storyloom_core::tool::CanvasOp;

use super::{PolicyContext, PolicyRule, TurnDraft};

const STORY_BRANCH_TEXT: &str = "给你 3 个续写方向，点一个我就按这个继续写；也可以选“自定义方向”把你想要的走向填进去。";

fn story_branch_replies() -> Vec<QuickReply> {
    vec![
        QuickReply::new(
            "方向A：暖心日常",
            "我选择方向A（暖心日常）：请基于当前项目已有剧情与角色关系（沿用同一世界观/场景/氛围）续写下一段 15 秒的小故事。先给我紧凑剧情梗概（3-5句），再生成九宫格分镜（image）并连接到15s视频（composeVideo）。",
        ),
        QuickReply::new(
            "方向B：轻冒险任务",
            "我选择方向B（轻冒险任务）：请基于当前项目已有剧情续写，加入一个小目标/小危机但保持治愈基调。先给剧情梗概（3-5句），再生成九宫格分镜（image）并连接到15s视频（composeVideo）。",
        ),
        QuickReply::new(
            "方向C：小悬疑反转",
            "我选择方向C（小悬疑反转）：请基于当前项目已有剧情续写，前半段制造小谜团，结尾温暖反转（不要跳出既有设定）。先给剧情梗概（3-5句），再生成九宫格分镜（image）并连接到15s视频（composeVideo）。",
        ),
        QuickReply::new(
            "自定义方向…",
            "我想自定义续写方向（基于当前项目已有剧情，不要另起炉灶）：\n- 主题/情绪：\n- 场景：\n- 关键事件：\n- 结尾落点：\n请基于我的填写先给梗概，再做九宫格分镜与15s视频。",
        ),
    ]
}

/// An open "what next?" question gets three branch buttons instead of
/// canvas work, unless the model already offered its own actions.
pub struct StoryBranchSuggestion;

impl PolicyRule for StoryBranchSuggestion {
    fn name(&self) -> &'static str {
        "story_branch_suggestion"
    }

    fn apply(&self, draft: &TurnDraft, ctx: &PolicyContext<'_>) -> Result<TurnDraft, RuleError> {
        if !ctx.story_suggestion_request() || draft.reply.contains("tapcanvas_actions") {
            return Ok(draft.clone());
        }
        Ok(TurnDraft {
            reply: STORY_BRANCH_TEXT.into(),
            tool_calls: Vec::new(),
            quick_replies: story_branch_replies(),
        })
    }
}

const LOCK_PROMPT_TEXT: &str = "为保证叙事连贯，我需要先锁定“主场景 + 主体数量/清单”。点一个选项确认后，我再在画布里生成九宫格分镜并继续成片。";
const LOCK_HINT_SUFFIX: &str = "\n\n为保证叙事连贯（画风一致、场景不乱跳、主体不增删），请先确认锁定规则；或直接回复「继续」，我将按默认锁定（日漫2D/单主场景/主体不新增）生成九宫格分镜。";
const SCENE_AND_SUBJECT_LOCK: &str = "场景沿用当前项目主场景（光线连续，不自由换景）；主体不新增（数量不变）。请把剧情压缩成 3x3 九宫格分镜图，并把参考图全部连到分镜节点上。";

fn style_choice(label: &str, style: &str) -> QuickReply {
    QuickReply::new(label, format!("确认锁定风格：{style}。{SCENE_AND_SUBJECT_LOCK}"))
}

fn style_lock_replies() -> Vec<QuickReply> {
    vec![
        style_choice("继续（默认锁定：日漫2D）", "日漫2D（干净线稿+赛璐璐）"),
        style_choice("锁定风格：美漫2D（粗线条）", "美漫2D（粗线条+高对比）"),
        style_choice("锁定风格：写实真人", "写实真人（电影质感）"),
        QuickReply::new(
            "自定义风格…",
            "确认锁定风格：\n- 风格类型（2D日漫/2D美漫/写实/其他）：\n- 线条/材质：\n- 色彩与光影：\n- 镜头语言：\n同时：场景沿用当前项目主场景（光线连续，不自由换景）；主体不新增（数量不变）。填写后请生成 3x3 九宫格分镜图并连线参考图。",
        ),
    ]
}

fn scene_lock_replies(style: &str) -> Vec<QuickReply> {
    vec![
        QuickReply::new(
            "继续（按已锁定风格生成分镜）",
            format!(
                "确认锁定风格：{style}。确认锁定：场景沿用当前项目主场景（光线连续，不自由换景）；主体不新增（主角数量不变）。请把剧情压缩成 3x3 九宫格分镜图，并把参考图全部连到分镜节点上。"
            ),
        ),
        QuickReply::new(
            "新增主体…（先出设定图）",
            "我要新增主体（角色/产品/关键道具）：\n- 主体1：\n- 主体2：\n要求：先分别生成每个主体的设定图（image），等我确认后再生成九宫格分镜并连线消费这些设定图。",
        ),
        QuickReply::new(
            "改场景…（先锁定场景图）",
            "我想锁定新的主场景：\n- 场景描述：\n要求：先生成一张“场景设定图”（image）给我确认；确认后九宫格分镜必须只在该场景内推进（光线连续），再生成15s视频。",
        ),
        QuickReply::new(
            "自定义锁定规则…",
            "我想自定义锁定规则：\n- 主场景（只能一个）：\n- 允许的过渡场景（可选）：\n- 主体清单（角色/产品/道具）与数量：\n- 禁止事项：\n请按我的规则先补齐必要的设定图，再生成九宫格分镜并继续。",
        ),
    ]
}

/// Storyboard/video production waits until the user has confirmed a
/// style, a main scene and the subject list.
pub struct LockConfirmationGate;

impl PolicyRule for LockConfirmationGate {
    fn name(&self) -> &'static str {
        "lock_confirmation_gate"
    }

    fn apply(&self, draft: &TurnDraft, ctx: &PolicyContext<'_>) -> Result<TurnDraft, RuleError> {
        if !ctx.storyboard_intent() || ctx.lock_confirmed() || ctx.story_suggestion_request() {
            return Ok(draft.clone());
        }

        let mut next = draft.clone();
        next.tool_calls.clear();
        if next.quick_replies.is_empty() {
            next.quick_replies = match ctx.style_lock() {
                Some(style) => scene_lock_replies(&style),
                None => style_lock_replies(),
            };
        }
        let reply = next.reply.trim();
        next.reply = if reply.is_empty() {
            LOCK_PROMPT_TEXT.into()
        } else {
            format!("{reply}{LOCK_HINT_SUFFIX}")
        };
        Ok(next)
    }
}

const SUPERVISOR_TEXT: &str = "我先不动画布。你想先聊清楚需求，还是直接点一个选项让我开始执行？";

fn supervisor_replies() -> Vec<QuickReply> {
    vec![
        QuickReply::new(
            "继续创作（先选方向）",
            "基于我当前项目画布，先给 3 个可选方向（按钮）让我选；我选完你再在画布创建分镜/视频节点。",
        ),
        QuickReply::new(
            "直接生成（我给具体需求）",
            "我想在画布生成一个内容：\n- 类型（图片/分镜/视频）：\n- 主题：\n- 风格：\n- 时长/比例（如需要）：\n请按我的填写创建节点并执行。",
        ),
        QuickReply::new(
            "只聊不操作画布",
            "先不操作画布。请先用一句话问我：我想做什么类型的内容、有什么参考、以及希望的风格/时长。",
        ),
    ]
}

/// Without canvas permission no call survives, whatever the model proposed.
pub struct SupervisorOverride;

impl PolicyRule for SupervisorOverride {
    fn name(&self) -> &'static str {
        "supervisor_override"
    }

    fn apply(&self, draft: &TurnDraft, ctx: &PolicyContext<'_>) -> Result<TurnDraft, RuleError> {
        if ctx.allow_canvas_tools {
            return Ok(draft.clone());
        }
        let mut next = draft.clone();
        next.tool_calls.clear();
        if next.quick_replies.is_empty() {
            next.quick_replies = supervisor_replies();
        }
        if next.reply.trim().is_empty() {
            next.reply = SUPERVISOR_TEXT.into();
        }
        Ok(next)
    }
}

const NEW_CHARACTER_TEXT: &str = "我先为续写新增了一个角色设定图。你确认角色外观后，我再继续生成续写分镜。";

fn new_character_replies() -> Vec<QuickReply> {
    vec![
        QuickReply::new(
            "角色OK，继续分镜",
            "新角色我确认OK。请把新角色纳入同一项目设定，基于已有剧情续写下一段，并生成九宫格分镜（image）再连接到15s视频（composeVideo）。",
        ),
        QuickReply::new(
            "重做这个角色",
            "这个新角色不满意。请保持同一角色定位与风格，重做 3 个版本给我选（同一个 image 节点出 3 张即可）。",
        ),
        QuickReply::new(
            "不要新角色",
            "不要新增角色了。请只用现有角色基于已有剧情续写，并生成九宫格分镜与15s视频。",
        ),
    ]
}

/// A continuation that introduces a new character alongside its storyboard
/// keeps only the character sheet and asks for approval first.
pub struct NewCharacterConfirmation;

impl PolicyRule for NewCharacterConfirmation {
    fn name(&self) -> &'static str {
        "new_character_confirmation"
    }

    fn apply(&self, draft: &TurnDraft, ctx: &PolicyContext<'_>) -> Result<TurnDraft, RuleError> {
        if draft.tool_calls.is_empty() || !ctx.continuation_step() {
            return Ok(draft.clone());
        }

        let triggers = ctx.triggers;
        let existing: HashSet<&str> = ctx
            .canvas
            .nodes
            .iter()
            .filter_map(|n| n.label.as_deref().map(str::trim))
            .filter(|l| !l.is_empty())
            .collect();

        let image_creates: Vec<_> = draft
            .creates()
            .map(|(_, c)| c)
            .filter(|c| c.node_type() == Some("image"))
            .collect();

        let new_characters: HashSet<&str> = image_creates
            .iter()
            .filter_map(|c| c.label())
            .filter(|l| contains_any_ci(l, &triggers.character_label))
            .filter(|l| !existing.contains(l))
            .filter(|l| !contains_any(l, &triggers.storyboard_markers))
            .collect();

        let has_storyboard = image_creates
            .iter()
            .any(|c| ctx.is_storyboard_text(&format!("{}\n{}", c.label().unwrap_or(""), c.prompt())));

        if new_characters.is_empty() || !has_storyboard {
            return Ok(draft.clone());
        }

        let tool_calls = draft
            .tool_calls
            .iter()
            .filter(|c| match c.op {
                CanvasOp::CreateNode => {
                    c.node_type() == Some("image") && c.label().is_some_and(|l| new_characters.contains(l))
                }
                CanvasOp::RunNode => c.node_id().is_some_and(|id| new_characters.contains(id)),
                _ => false,
            })
            .cloned()
            .collect();

        Ok(TurnDraft {
            reply: NEW_CHARACTER_TEXT.into(),
            tool_calls,
            quick_replies: new_character_replies(),
        })
    }
}
