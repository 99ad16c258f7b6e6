//! Persona registry and tool-permission tiers.
//!
//! Roles are static: looked up by id, never created at runtime. Resolution
//! of an arbitrary string always yields a registered role.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::tool::CanvasOp;

/// Role used whenever the router's choice cannot be resolved.
pub const DEFAULT_ROLE_ID: &str = "storyboard_artist";

/// Supervisory persona layered on top of every answer.
pub const SUPERVISOR_ROLE_ID: &str = "art_director";

/// A named response style and permission profile.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct RoleProfile {
    pub id: &'static str,
    pub name: &'static str,
    pub summary: &'static str,
    pub style: &'static str,
    pub allowed_ops: &'static [CanvasOp],
}

impl RoleProfile {
    pub fn allows(&self, op: CanvasOp) -> bool {
        self.allowed_ops.contains(&op)
    }

    /// Whether this role may touch the canvas at all.
    pub fn can_edit_canvas(&self) -> bool {
        !self.allowed_ops.is_empty()
    }
}

const CANVAS_OPERATOR: &[CanvasOp] = &CanvasOp::ALL;
const WRITING_ONLY: &[CanvasOp] = &[];

static ROLES: [RoleProfile; 8] = [
    RoleProfile {
        id: "storyboard_artist",
        name: "分镜师",
        summary: "把剧情拆成镜头与分镜格，负责九宫格分镜、镜头语言与画面节奏。",
        style: "简洁、镜头化，先给分镜清单再给操作。",
        allowed_ops: CANVAS_OPERATOR,
    },
    RoleProfile {
        id: "character_designer",
        name: "角色设计师",
        summary: "设计角色外观、服装、表情与三视图，保持角色一致性。",
        style: "具体描述外观要素，强调可复用的角色设定。",
        allowed_ops: CANVAS_OPERATOR,
    },
    RoleProfile {
        id: "scene_designer",
        name: "场景设计师",
        summary: "设计场景、光影、色调与空间布局，为镜头提供环境基准。",
        style: "注重氛围与构图，说明光线和色彩方案。",
        allowed_ops: CANVAS_OPERATOR,
    },
    RoleProfile {
        id: "art_director",
        name: "艺术总监",
        summary: "把控整体风格、叙事连贯与质量标准，审查方案是否可执行。",
        style: "审慎、给出明确取舍与修改意见。",
        allowed_ops: WRITING_ONLY,
    },
    RoleProfile {
        id: "screenwriter",
        name: "编剧",
        summary: "构思故事、续写剧情、打磨对白与结构。",
        style: "叙事性强，给出可选方向和情节要点。",
        allowed_ops: WRITING_ONLY,
    },
    RoleProfile {
        id: "product_designer",
        name: "产品设计师",
        summary: "解答产品使用、功能说明与工作流问题。",
        style: "条理清晰，步骤化说明。",
        allowed_ops: WRITING_ONLY,
    },
    RoleProfile {
        id: "music_director",
        name: "音乐总监",
        summary: "为短片规划配乐、音效与节奏点。",
        style: "描述情绪曲线与音乐风格，给出参考。",
        allowed_ops: WRITING_ONLY,
    },
    RoleProfile {
        id: "magician",
        name: "魔术师",
        summary: "把不适合直接呈现的请求改写成含蓄、可发布的创作方案。",
        style: "温和、富有想象力，提供替代表达。",
        allowed_ops: WRITING_ONLY,
    },
];

static ROLE_INDEX: LazyLock<HashMap<&'static str, &'static RoleProfile>> =
    LazyLock::new(|| ROLES.iter().map(|r| (r.id, r)).collect());

/// All registered roles, in registry order.
pub fn all() -> &'static [RoleProfile] {
    &ROLES
}

/// Normalize a raw role id: trimmed, lowercased, `-` and spaces folded to
/// `_`. Unknown ids map to [`DEFAULT_ROLE_ID`].
pub fn normalize_role_id(raw: &str) -> &'static str {
    let key = raw.trim().to_lowercase().replace(['-', ' '], "_");
    ROLE_INDEX
        .get(key.as_str())
        .map(|r| r.id)
        .unwrap_or(DEFAULT_ROLE_ID)
}

/// Resolve any string to a registered role.
pub fn resolve(raw: &str) -> &'static RoleProfile {
    let id = normalize_role_id(raw);
    ROLE_INDEX.get(id).copied().unwrap_or(&ROLES[0])
}

pub fn get(id: &str) -> Option<&'static RoleProfile> {
    ROLE_INDEX.get(id).copied()
}

pub fn default_role() -> &'static RoleProfile {
    resolve(DEFAULT_ROLE_ID)
}

pub fn supervisor() -> &'static RoleProfile {
    resolve(SUPERVISOR_ROLE_ID)
}

/// Bullet list of the registry for router prompts.
pub fn roles_prompt_block() -> String {
    ROLES
        .iter()
        .map(|r| {
            let tools = if r.can_edit_canvas() {
                r.allowed_ops
                    .iter()
                    .map(|op| op.as_str())
                    .collect::<Vec<_>>()
                    .join("/")
            } else {
                "无".to_string()
            };
            format!("- {}（{}）：{} 风格：{} 画布工具：{}", r.id, r.name, r.summary, r.style, tools)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Tool-permission tier granted for a turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolTier {
    #[default]
    None,
    Canvas,
    #[serde(alias = "web")]
    Rag,
}

impl ToolTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Canvas => "canvas",
            Self::Rag => "rag",
        }
    }

    /// Lenient parse of a model-provided tier label.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "none" | "" => Some(Self::None),
            "canvas" => Some(Self::Canvas),
            "rag" | "web" => Some(Self::Rag),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_string_resolves_to_registered_role() {
        for raw in ["", "nobody", "Storyboard-Artist", " screenwriter ", "🎬", "art director"] {
            let role = resolve(raw);
            assert!(all().iter().any(|r| r.id == role.id), "{raw} -> {}", role.id);
        }
        assert_eq!(resolve("Storyboard-Artist").id, "storyboard_artist");
        assert_eq!(resolve("art director").id, "art_director");
        assert_eq!(resolve("nobody").id, DEFAULT_ROLE_ID);
    }

    #[test]
    fn writing_roles_have_no_canvas_ops() {
        for id in ["art_director", "screenwriter", "product_designer", "music_director", "magician"] {
            assert!(!resolve(id).can_edit_canvas(), "{id}");
        }
        for id in ["storyboard_artist", "character_designer", "scene_designer"] {
            assert_eq!(resolve(id).allowed_ops.len(), 4, "{id}");
        }
    }

    #[test]
    fn tier_parsing_accepts_web_alias() {
        assert_eq!(ToolTier::parse("WEB"), Some(ToolTier::Rag));
        assert_eq!(ToolTier::parse("canvas"), Some(ToolTier::Canvas));
        assert_eq!(ToolTier::parse("shell"), None);
        let tier: ToolTier = serde_json::from_str("\"web\"").unwrap();
        assert_eq!(tier, ToolTier::Rag);
        assert_eq!(serde_json::to_string(&ToolTier::Rag).unwrap(), "\"rag\"");
    }

    #[test]
    fn prompt_block_lists_every_role() {
        let block = roles_prompt_block();
        for r in all() {
            assert!(block.contains(r.id));
        }
    }
}
