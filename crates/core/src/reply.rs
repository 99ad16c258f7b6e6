//! Turn request / outcome records at the service boundary.

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;
use crate::role::ToolTier;
use crate::tool::ToolCall;

/// A suggested follow-up shown as a button under the assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickReply {
    pub label: String,
    pub input: String,
}

impl QuickReply {
    pub fn new(label: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            input: input.into(),
        }
    }
}

/// A knowledge-base source cited by the reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub label: String,
    pub value: String,
    pub short_url: String,
}

impl SourceRef {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            label: label.into(),
            value: url.clone(),
            short_url: url,
        }
    }
}

/// Structured description of a provider failure surfaced to the front-end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmErrorInfo {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
}

impl From<&ProviderError> for LlmErrorInfo {
    fn from(err: &ProviderError) -> Self {
        match err {
            ProviderError::ApiError {
                status_code,
                message,
                code,
                param,
            } => Self {
                kind: "api_error".into(),
                status: Some(*status_code),
                message: message.clone(),
                code: code.clone(),
                param: param.clone(),
            },
            ProviderError::RateLimited { .. } => Self {
                kind: "rate_limited".into(),
                status: Some(429),
                message: err.to_string(),
                code: None,
                param: None,
            },
            ProviderError::AuthenticationFailed(msg) => Self {
                kind: "authentication_failed".into(),
                status: Some(401),
                message: msg.clone(),
                code: None,
                param: None,
            },
            other => Self {
                kind: match other {
                    ProviderError::NotConfigured(_) => "not_configured",
                    ProviderError::Timeout(_) => "timeout",
                    ProviderError::Network(_) => "network",
                    ProviderError::StreamInterrupted(_) => "stream_interrupted",
                    _ => "invalid_response",
                }
                .into(),
                status: None,
                message: other.to_string(),
                code: None,
                param: None,
            },
        }
    }
}

/// Metadata attached to the assistant message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplyMetadata {
    pub active_role: String,
    pub active_role_name: String,
    pub active_role_reason: String,
    #[serde(default)]
    pub active_intent: String,
    #[serde(default)]
    pub active_tool_tier: ToolTier,
    #[serde(default)]
    pub allow_canvas_tools: bool,
    #[serde(default)]
    pub allow_canvas_tools_reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quick_replies: Vec<QuickReply>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_error: Option<LlmErrorInfo>,
}

/// The outgoing assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantReply {
    pub content: String,
    pub metadata: ReplyMetadata,
}

impl AssistantReply {
    /// Convert into a transcript message with the metadata flattened in.
    pub fn into_message(self) -> Message {
        let mut msg = Message::assistant(self.content);
        if let Ok(serde_json::Value::Object(map)) = serde_json::to_value(&self.metadata) {
            msg.metadata = map;
        }
        msg
    }
}

/// One turn, as posted by the front-end.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnRequest {
    /// Full transcript, the newest user message last
    pub messages: Vec<Message>,

    /// Rolling summary persisted from earlier turns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_summary: Option<String>,

    /// Raw canvas snapshot; parsed leniently
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canvas_context: Option<serde_json::Value>,

    /// Turns already taken on this thread
    #[serde(default)]
    pub agent_loop_count: u32,
}

impl TurnRequest {
    pub fn from_user_text(text: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(text)],
            ..Self::default()
        }
    }
}

/// Result of one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub reply: AssistantReply,

    /// Updated rolling summary; `None` keeps the previous one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_summary: Option<String>,

    pub agent_loop_count: u32,

    /// Knowledge-base sources cited in the reply
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceRef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_deserializes_with_defaults() {
        let req: TurnRequest = serde_json::from_str(r#"{"messages":[{"role":"user","content":"画一只狐狸"}]}"#).unwrap();
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.agent_loop_count, 0);
        assert!(req.canvas_context.is_none());
    }

    #[test]
    fn reply_message_carries_metadata() {
        let reply = AssistantReply {
            content: "好的".into(),
            metadata: ReplyMetadata {
                active_role: "screenwriter".into(),
                active_tool_tier: ToolTier::Rag,
                quick_replies: vec![QuickReply::new("继续", "继续")],
                ..ReplyMetadata::default()
            },
        };
        let msg = reply.into_message();
        assert_eq!(msg.metadata["active_role"], "screenwriter");
        assert_eq!(msg.metadata["active_tool_tier"], "rag");
        assert_eq!(msg.metadata["quick_replies"][0]["label"], "继续");
        assert!(!msg.metadata.contains_key("tool_calls"));
    }

    #[test]
    fn llm_error_from_api_error() {
        let info = LlmErrorInfo::from(&ProviderError::ApiError {
            status_code: 400,
            message: "bad".into(),
            code: Some("x".into()),
            param: None,
        });
        assert_eq!(info.status, Some(400));
        assert_eq!(info.kind, "api_error");
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["type"], "api_error");
        assert!(json.get("param").is_none());
    }
}
