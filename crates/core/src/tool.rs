//! Canvas tool calls: the mutations the agent proposes to the front-end.
//!
//! The backend never executes these; the canvas applies them. The closed
//! set of operations is [`CanvasOp`], their JSON Schemas live in a static
//! table, and [`ToolCall`] carries one proposed operation with typed
//! accessors over its JSON argument object.

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::role::RoleProfile;
use crate::stream::AssembledCall;

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: Value,
}

/// The closed set of canvas operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CanvasOp {
    CreateNode,
    UpdateNode,
    ConnectNodes,
    RunNode,
}

impl CanvasOp {
    pub const ALL: [CanvasOp; 4] = [
        CanvasOp::CreateNode,
        CanvasOp::UpdateNode,
        CanvasOp::ConnectNodes,
        CanvasOp::RunNode,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateNode => "createNode",
            Self::UpdateNode => "updateNode",
            Self::ConnectNodes => "connectNodes",
            Self::RunNode => "runNode",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == name)
    }
}

impl std::fmt::Display for CanvasOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A proposed canvas operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,

    #[serde(rename = "name")]
    pub op: CanvasOp,

    #[serde(default)]
    pub arguments: Map<String, Value>,
}

fn non_empty_str(v: Option<&Value>) -> Option<&str> {
    v.and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}

impl ToolCall {
    /// Validate a reconstructed stream call. Unknown operations and
    /// non-object arguments are rejected.
    pub fn from_assembled(call: AssembledCall) -> Option<Self> {
        let Some(op) = CanvasOp::parse(&call.name) else {
            tracing::warn!(name = %call.name, "Dropping tool call with unknown operation");
            return None;
        };
        match call.arguments {
            Value::Object(arguments) => Some(Self {
                id: call.id,
                op,
                arguments,
            }),
            other => {
                tracing::warn!(call_id = %call.id, op = %op, arguments = %other, "Dropping tool call with non-object arguments");
                None
            }
        }
    }

    /// A synthesized `createNode` call.
    pub fn create_node(id: impl Into<String>, node_type: &str, label: &str, config: Map<String, Value>) -> Self {
        let mut arguments = Map::new();
        arguments.insert("type".into(), Value::String(node_type.into()));
        arguments.insert("label".into(), Value::String(label.into()));
        arguments.insert("config".into(), Value::Object(config));
        Self {
            id: id.into(),
            op: CanvasOp::CreateNode,
            arguments,
        }
    }

    /// A synthesized `connectNodes` call.
    pub fn connect(id: impl Into<String>, source: &str, target: &str, source_handle: &str, target_handle: &str) -> Self {
        let mut arguments = Map::new();
        arguments.insert("sourceNodeId".into(), Value::String(source.into()));
        arguments.insert("targetNodeId".into(), Value::String(target.into()));
        arguments.insert("sourceHandle".into(), Value::String(source_handle.into()));
        arguments.insert("targetHandle".into(), Value::String(target_handle.into()));
        Self {
            id: id.into(),
            op: CanvasOp::ConnectNodes,
            arguments,
        }
    }

    /// A synthesized `runNode` call.
    pub fn run(id: impl Into<String>, node_id: &str) -> Self {
        let mut arguments = Map::new();
        arguments.insert("nodeId".into(), Value::String(node_id.into()));
        Self {
            id: id.into(),
            op: CanvasOp::RunNode,
            arguments,
        }
    }

    pub fn is(&self, op: CanvasOp) -> bool {
        self.op == op
    }

    pub fn str_arg(&self, key: &str) -> Option<&str> {
        non_empty_str(self.arguments.get(key))
    }

    /// Node label (trimmed, non-empty).
    pub fn label(&self) -> Option<&str> {
        self.str_arg("label")
    }

    /// Logical node type of a `createNode` call.
    pub fn node_type(&self) -> Option<&str> {
        self.str_arg("type")
    }

    /// Target node of `runNode` / `updateNode`.
    pub fn node_id(&self) -> Option<&str> {
        self.str_arg("nodeId")
    }

    pub fn source(&self) -> Option<&str> {
        self.str_arg("sourceNodeId").or_else(|| self.str_arg("sourceId"))
    }

    pub fn target(&self) -> Option<&str> {
        self.str_arg("targetNodeId").or_else(|| self.str_arg("targetId"))
    }

    pub fn config(&self) -> Option<&Map<String, Value>> {
        self.arguments.get("config").and_then(Value::as_object)
    }

    /// Edit the config object in place, creating it (or replacing a
    /// non-object value) first.
    pub fn edit_config<R>(&mut self, edit: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
        let mut config = match self.arguments.remove("config") {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        let out = edit(&mut config);
        self.arguments.insert("config".into(), Value::Object(config));
        out
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config().and_then(|c| non_empty_str(c.get(key)))
    }

    /// `config.prompt`, possibly empty.
    pub fn prompt(&self) -> &str {
        self.config()
            .and_then(|c| c.get("prompt"))
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}

// ── Schemas ─────────────────────────────────────────────────────────────

static CANVAS_TOOL_DEFINITIONS: LazyLock<Vec<(CanvasOp, ToolDefinition)>> = LazyLock::new(|| {
    let config_schema = json!({
        "type": "object",
        "description": "节点 data 配置（会写入 node.data）。常用字段：kind、prompt、negativePrompt、systemPrompt、keywords、imageModel/videoModel 等。",
        "properties": {
            "kind": {
                "type": "string",
                "description": "任务类型（通常由 type 推导），例如 image/textToImage/composeVideo/video。"
            },
            "prompt": { "type": "string", "description": "主提示词" },
            "negativePrompt": { "type": "string", "description": "负面提示词" },
            "systemPrompt": { "type": "string", "description": "系统提示词/风格基准" },
            "keywords": {
                "type": ["string", "array"],
                "items": { "type": "string" },
                "description": "关键词（可用逗号分隔字符串或数组）"
            },
            "imageModel": { "type": "string", "description": "图像模型（可选）" },
            "videoModel": { "type": "string", "description": "视频模型（可选）" }
        },
        "additionalProperties": true
    });
    let node_ref = "节点 ID（也可直接传节点 label；前端会按 label 解析）";

    vec![
        (
            CanvasOp::CreateNode,
            ToolDefinition {
                name: "createNode".into(),
                description: "创建画布节点（仅支持 image/textToImage/composeVideo/video）。config 会写入 node.data。".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "type": {
                            "type": "string",
                            "enum": ["image", "textToImage", "composeVideo", "video"],
                            "description": "逻辑节点类型（前端会映射成 taskNode.kind）"
                        },
                        "label": { "type": "string", "description": "可选：节点标签" },
                        "config": config_schema,
                        "remixFromNodeId": {
                            "type": "string",
                            "description": "可选：基于已有视频节点做 Remix（传入源节点 ID）"
                        },
                        "position": {
                            "type": "object",
                            "properties": { "x": { "type": "number" }, "y": { "type": "number" } },
                            "required": ["x", "y"],
                            "additionalProperties": false,
                            "description": "可选：节点位置"
                        }
                    },
                    "required": ["type"],
                    "additionalProperties": false
                }),
            },
        ),
        (
            CanvasOp::UpdateNode,
            ToolDefinition {
                name: "updateNode".into(),
                description: "更新已存在节点的配置或标签，通常用于写入/修改 prompt。".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "nodeId": { "type": "string", "description": node_ref },
                        "label": { "type": "string", "description": "可选：新标签" },
                        "config": config_schema
                    },
                    "required": ["nodeId"],
                    "additionalProperties": false
                }),
            },
        ),
        (
            CanvasOp::ConnectNodes,
            ToolDefinition {
                name: "connectNodes".into(),
                description: "连接两个节点，source -> target。".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "sourceNodeId": { "type": "string", "description": node_ref },
                        "targetNodeId": { "type": "string", "description": node_ref },
                        "sourceHandle": { "type": "string", "description": "可选：源手柄" },
                        "targetHandle": { "type": "string", "description": "可选：目标手柄" }
                    },
                    "required": ["sourceNodeId", "targetNodeId"],
                    "additionalProperties": false
                }),
            },
        ),
        (
            CanvasOp::RunNode,
            ToolDefinition {
                name: "runNode".into(),
                description: "执行一个节点（例如 composeVideo/image），前端自行处理执行细节。".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "nodeId": { "type": "string", "description": node_ref }
                    },
                    "required": ["nodeId"],
                    "additionalProperties": false
                }),
            },
        ),
    ]
});

/// Every canvas tool definition, in declaration order.
pub fn canvas_tool_definitions() -> impl Iterator<Item = &'static ToolDefinition> {
    CANVAS_TOOL_DEFINITIONS.iter().map(|(_, def)| def)
}

/// Tool definitions offered to the model for `role` this turn.
///
/// Empty when the router denied canvas permission or the role's
/// allow-list is empty.
pub fn definitions_for_role(role: &RoleProfile, allow_canvas_tools: bool) -> Vec<ToolDefinition> {
    if !allow_canvas_tools {
        return Vec::new();
    }
    CANVAS_TOOL_DEFINITIONS
        .iter()
        .filter(|(op, _)| role.allows(*op))
        .map(|(_, def)| def.clone())
        .collect()
}

/// Drop calls outside the role's allow-list (all of them without permission).
pub fn filter_calls_for_role(calls: Vec<ToolCall>, role: &RoleProfile, allow_canvas_tools: bool) -> Vec<ToolCall> {
    if !allow_canvas_tools {
        return Vec::new();
    }
    calls.into_iter().filter(|c| role.allows(c.op)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::{self, RoleProfile};

    fn storyboard() -> &'static RoleProfile {
        role::resolve("storyboard_artist")
    }

    #[test]
    fn op_names_roundtrip() {
        for op in CanvasOp::ALL {
            assert_eq!(CanvasOp::parse(op.as_str()), Some(op));
            assert_eq!(serde_json::to_value(op).unwrap(), Value::String(op.as_str().into()));
        }
        assert_eq!(CanvasOp::parse("deleteNode"), None);
    }

    #[test]
    fn from_assembled_rejects_unknown_and_non_object() {
        let ok = ToolCall::from_assembled(AssembledCall {
            id: "1".into(),
            name: "runNode".into(),
            arguments: json!({"nodeId": "a"}),
        });
        assert_eq!(ok.unwrap().node_id(), Some("a"));

        assert!(ToolCall::from_assembled(AssembledCall {
            id: "2".into(),
            name: "deleteNode".into(),
            arguments: json!({}),
        })
        .is_none());

        assert!(ToolCall::from_assembled(AssembledCall {
            id: "3".into(),
            name: "runNode".into(),
            arguments: Value::String("{broken".into()),
        })
        .is_none());
    }

    #[test]
    fn definitions_are_subset_of_allow_list() {
        for profile in role::all() {
            for allow in [true, false] {
                let defs = definitions_for_role(profile, allow);
                if !allow {
                    assert!(defs.is_empty());
                }
                for def in defs {
                    let op = CanvasOp::parse(&def.name).unwrap();
                    assert!(profile.allows(op), "{} offered {}", profile.id, def.name);
                }
            }
        }
        assert_eq!(definitions_for_role(storyboard(), true).len(), 4);
        assert!(definitions_for_role(role::resolve("screenwriter"), true).is_empty());
    }

    #[test]
    fn filter_drops_everything_without_permission() {
        let calls = vec![ToolCall::run("r", "a")];
        assert!(filter_calls_for_role(calls.clone(), storyboard(), false).is_empty());
        assert_eq!(filter_calls_for_role(calls.clone(), storyboard(), true).len(), 1);
        assert!(filter_calls_for_role(calls, role::resolve("magician"), true).is_empty());
    }

    #[test]
    fn edit_config_replaces_non_object() {
        let mut call = ToolCall::run("r", "a");
        call.arguments.insert("config".into(), json!("oops"));
        call.edit_config(|c| c.insert("prompt".into(), json!("p")));
        assert_eq!(call.prompt(), "p");
    }

    #[test]
    fn connect_accessors_accept_legacy_keys() {
        let mut call = ToolCall::connect("c", "a", "b", "out-image", "in-image");
        assert_eq!(call.source(), Some("a"));
        call.arguments.remove("targetNodeId");
        call.arguments.insert("targetId".into(), json!("legacy"));
        assert_eq!(call.target(), Some("legacy"));
    }
}
