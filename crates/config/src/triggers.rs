//! Literal phrase sets that drive the continuity policy.
//!
//! Matching is plain substring containment against the user's latest
//! message or a node label/prompt. Every set can be overridden from
//! `[policy.triggers]`; omitted sets keep the defaults below.

use serde::{Deserialize, Serialize};

fn phrases(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerPhrases {
    /// Utterances at most this long (in characters, whitespace collapsed)
    /// without a creation hint never unlock the canvas.
    pub short_utterance_max_chars: usize,
    pub creation_hints: Vec<String>,

    // Story-branch suggestions
    pub story_continuation: Vec<String>,
    pub story_recommendation: Vec<String>,
    pub story_production: Vec<String>,

    // Lock-confirmation gate
    pub storyboard_intent: Vec<String>,
    pub lock_confirmation: Vec<String>,
    pub implicit_confirmation: Vec<String>,
    pub style_lock_prefixes: Vec<String>,

    // New-character confirmation
    pub continuation_step: Vec<String>,
    pub character_label: Vec<String>,

    /// Marks a label or prompt as a storyboard grid
    pub storyboard_markers: Vec<String>,

    // Reference auto-wiring
    pub reference_intent: Vec<String>,
    /// Labels never used as the upstream of a "based on" request
    pub reference_exclude: Vec<String>,
    pub anchor_exclude: Vec<String>,
    pub anchor_character: Vec<String>,
    pub anchor_prop: Vec<String>,
    pub anchor_mascot: Vec<String>,

    /// Markers showing the reply already tells the user what to do next
    pub next_step_markers: Vec<String>,
}

impl Default for TriggerPhrases {
    fn default() -> Self {
        Self {
            short_utterance_max_chars: 8,
            creation_hints: phrases(&[
                "生成", "创建", "画", "做", "帮", "续写", "分镜", "故事板", "九宫格", "视频", "图片", "改",
                "调整", "修改", "连接", "运行",
            ]),
            story_continuation: phrases(&["续写", "后续剧情", "接下来", "续作"]),
            story_recommendation: phrases(&["推荐", "方向", "灵感", "怎么写"]),
            story_production: phrases(&["九宫格", "分镜", "故事板", "storyboard", "15s"]),
            storyboard_intent: phrases(&[
                "九宫格", "分镜", "故事板", "storyboard", "短片", "动画", "成片", "15s", "15秒",
            ]),
            lock_confirmation: phrases(&[
                "确认锁定", "锁定场景", "锁定主体", "锁定风格", "确认风格", "风格锁定", "我确认", "确认：",
            ]),
            implicit_confirmation: phrases(&[
                "继续", "按你给的", "就按这个", "照这个来", "不用确认", "直接生成", "别问了",
            ]),
            style_lock_prefixes: phrases(&["确认锁定风格：", "风格锁定：", "锁定风格："]),
            continuation_step: phrases(&["我选择方向", "自定义续写", "续写"]),
            character_label: phrases(&["角色", "character"]),
            storyboard_markers: phrases(&["九宫格", "3x3", "分镜", "storyboard"]),
            reference_intent: phrases(&[
                "基于", "同款", "同风格", "沿用", "续写", "延展", "变体", "参考", "保持一致",
            ]),
            reference_exclude: phrases(&["分镜", "九宫格", "storyboard"]),
            anchor_exclude: phrases(&["分镜", "九宫格", "storyboard", "视频", "15s视频"]),
            anchor_character: phrases(&["角色", "设定", "立绘", "主视觉", "character", "design"]),
            anchor_prop: phrases(&["产品", "道具", "物件", "prop", "product"]),
            anchor_mascot: phrases(&["fox", "bunny", "rabbit", "狐狸", "兔子"]),
            next_step_markers: phrases(&["下一步", "你下一步", "点一个"]),
        }
    }
}
