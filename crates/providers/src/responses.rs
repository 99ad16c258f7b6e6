//! OpenAI Responses API provider.
//!
//! Streams `POST /responses` and maps the typed SSE events onto
//! [`StreamChunk`]s:
//!
//! - `response.output_text.delta` becomes text
//! - `response.output_item.added` / `.done` announce function calls (both
//!   the `call_id` and the item `id` are forwarded so argument fragments,
//!   which are keyed by item id, can be aliased back)
//! - `response.function_call_arguments.delta` / `.done` carry arguments
//! - `response.completed` ends the stream with usage
//! - `response.failed` and `error` become [`ProviderError::ApiError`]

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use storyloom_core::error::ProviderError;
use storyloom_core::message::{Message, Role};
use storyloom_core::provider::*;
use storyloom_core::stream::ToolCallDelta;
use storyloom_core::tool::ToolDefinition;
use tracing::{debug, trace};

use crate::http::{SseLines, build_client, check_status, map_send_error};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Provider for the OpenAI Responses API.
pub struct OpenAiResponsesProvider {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    debug_responses: bool,
}

impl OpenAiResponsesProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: OPENAI_BASE_URL.into(),
            api_key: api_key.into(),
            client: build_client(120),
            debug_responses: false,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.client = build_client(timeout_secs);
        self
    }

    /// Log every raw SSE event at debug level.
    pub fn with_debug_responses(mut self, enabled: bool) -> Self {
        self.debug_responses = enabled;
        self
    }

    fn to_input(messages: &[Message]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .map(|m| {
                let part_type = if m.role == Role::Assistant {
                    "output_text"
                } else {
                    "input_text"
                };
                serde_json::json!({
                    "role": m.role.as_str(),
                    "content": [{ "type": part_type, "text": m.content }],
                })
            })
            .collect()
    }

    /// Responses API tools use the flat function shape.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                    "strict": false,
                })
            })
            .collect()
    }

    fn build_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "input": Self::to_input(&request.messages),
            "stream": true,
        });

        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_output_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
            body["tool_choice"] = serde_json::json!("auto");
        }

        if let Some(ResponseFormat::JsonSchema { name, schema, strict }) = &request.response_format {
            body["text"] = serde_json::json!({
                "format": {
                    "type": "json_schema",
                    "name": name,
                    "schema": schema,
                    "strict": strict,
                }
            });
        }

        body
    }
}

/// One Responses API stream event. Only the fields we consume are modeled.
#[derive(Debug, Deserialize)]
struct ResponsesEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    item: Option<OutputItem>,
    #[serde(default)]
    item_id: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
    #[serde(default)]
    response: Option<ResponseEnvelope>,
    // top-level `error` events
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    param: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    call_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    #[serde(default)]
    usage: Option<ResponsesUsage>,
    #[serde(default)]
    error: Option<ResponseError>,
}

#[derive(Debug, Deserialize)]
struct ResponsesUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ResponseError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Translate one event. `Ok(None)` means the event carries nothing we use.
fn chunk_from_event(event: ResponsesEvent) -> Result<Option<StreamChunk>, ProviderError> {
    let chunk = match event.kind.as_str() {
        "response.output_text.delta" => event.delta.filter(|d| !d.is_empty()).map(StreamChunk::text),
        "response.output_item.added" | "response.output_item.done" => event
            .item
            .filter(|item| item.kind == "function_call")
            .and_then(|item| {
                let call_id = item.call_id.or_else(|| item.id.clone())?;
                Some(StreamChunk::tool_delta(ToolCallDelta::Started {
                    call_id,
                    item_id: item.id,
                    name: item.name,
                    arguments: item.arguments,
                }))
            }),
        "response.function_call_arguments.delta" => match (event.item_id, event.delta) {
            (Some(key), Some(delta)) => Some(StreamChunk::tool_delta(ToolCallDelta::ArgumentsDelta { key, delta })),
            _ => None,
        },
        "response.function_call_arguments.done" => match (event.item_id, event.arguments) {
            (Some(key), Some(arguments)) => {
                Some(StreamChunk::tool_delta(ToolCallDelta::ArgumentsDone { key, arguments }))
            }
            _ => None,
        },
        "response.completed" | "response.incomplete" => {
            let usage = event.response.and_then(|r| r.usage).map(|u| Usage {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens,
                total_tokens: u.total_tokens,
            });
            Some(StreamChunk::done(usage))
        }
        "response.failed" => {
            let err = event.response.and_then(|r| r.error);
            return Err(ProviderError::ApiError {
                status_code: 500,
                message: err
                    .as_ref()
                    .and_then(|e| e.message.clone())
                    .unwrap_or_else(|| "response failed".into()),
                code: err.and_then(|e| e.code),
                param: None,
            });
        }
        "error" => {
            return Err(ProviderError::ApiError {
                status_code: 500,
                message: event.message.unwrap_or_else(|| "stream error".into()),
                code: event.code,
                param: event.param,
            });
        }
        _ => None,
    };
    Ok(chunk)
}

#[async_trait]
impl storyloom_core::Provider for OpenAiResponsesProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn stream(&self, request: ProviderRequest) -> std::result::Result<ChunkReceiver, ProviderError> {
        if self.api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured(
                "OPENAI_API_KEY is not set".into(),
            ));
        }

        let url = format!("{}/responses", self.base_url);
        let body = Self::build_body(&request);

        debug!(model = %request.model, tools = request.tools.len(), structured = request.response_format.is_some(), "Sending Responses API request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(map_send_error)?;
        let response = check_status("openai", response).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let debug_responses = self.debug_responses;

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut lines = SseLines::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for data in lines.push(&bytes) {
                    if data == "[DONE]" {
                        let _ = tx.send(Ok(StreamChunk::done(None))).await;
                        return;
                    }
                    if debug_responses {
                        debug!(event = %data, "Responses API event");
                    }

                    let event = match serde_json::from_str::<ResponsesEvent>(&data) {
                        Ok(event) => event,
                        Err(e) => {
                            trace!(data = %data, error = %e, "Ignoring unparseable SSE event");
                            continue;
                        }
                    };

                    match chunk_from_event(event) {
                        Ok(Some(chunk)) => {
                            let done = chunk.done;
                            if tx.send(Ok(chunk)).await.is_err() {
                                return; // receiver dropped
                            }
                            if done {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }

            let _ = tx.send(Ok(StreamChunk::done(None))).await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyloom_core::Provider;
    use storyloom_core::stream::ToolCallAssembler;

    fn event(data: &str) -> Result<Option<StreamChunk>, ProviderError> {
        chunk_from_event(serde_json::from_str(data).unwrap())
    }

    #[test]
    fn body_uses_flat_tools_and_text_format() {
        let req = ProviderRequest::prompt("gpt-4.1", "画一只狐狸")
            .with_tools(storyloom_core::tool::canvas_tool_definitions().cloned().collect())
            .with_response_format(ResponseFormat::JsonSchema {
                name: "RoleDecision".into(),
                schema: serde_json::json!({"type": "object"}),
                strict: true,
            });
        let body = OpenAiResponsesProvider::build_body(&req);
        assert_eq!(body["input"][0]["content"][0]["type"], "input_text");
        assert_eq!(body["tools"][0]["name"], "createNode");
        assert_eq!(body["tools"][0]["strict"], false);
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["text"]["format"]["type"], "json_schema");
        assert_eq!(body["text"]["format"]["strict"], true);
    }

    #[test]
    fn text_delta_event() {
        let chunk = event(r#"{"type":"response.output_text.delta","item_id":"msg_1","delta":"你好"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(chunk.content.as_deref(), Some("你好"));
    }

    #[test]
    fn function_call_events_assemble_through_aliases() {
        let events = [
            r#"{"type":"response.output_item.added","item":{"type":"function_call","id":"fc_1","call_id":"call_1","name":"createNode","arguments":""}}"#,
            r#"{"type":"response.function_call_arguments.delta","item_id":"fc_1","delta":"{\"type\":\"ima"}"#,
            r#"{"type":"response.function_call_arguments.delta","item_id":"fc_1","delta":"ge\"}"}"#,
            r#"{"type":"response.function_call_arguments.done","item_id":"fc_1","arguments":"{\"type\":\"image\",\"label\":\"狐狸\"}"}"#,
            r#"{"type":"response.output_item.done","item":{"type":"function_call","id":"fc_1","call_id":"call_1","name":"createNode","arguments":"{\"type\":\"image\",\"label\":\"狐狸\"}"}}"#,
        ];
        let mut asm = ToolCallAssembler::new();
        for e in events {
            for d in event(e).unwrap().unwrap().tool_call_deltas {
                asm.apply(d);
            }
        }
        let calls = asm.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].arguments["label"], "狐狸");
    }

    #[test]
    fn message_items_are_ignored() {
        assert!(event(r#"{"type":"response.output_item.added","item":{"type":"message","id":"msg_1"}}"#)
            .unwrap()
            .is_none());
        assert!(event(r#"{"type":"response.created","response":{}}"#).unwrap().is_none());
    }

    #[test]
    fn completed_event_carries_usage() {
        let chunk = event(r#"{"type":"response.completed","response":{"usage":{"input_tokens":10,"output_tokens":5,"total_tokens":15}}}"#)
            .unwrap()
            .unwrap();
        assert!(chunk.done);
        assert_eq!(chunk.usage.unwrap().prompt_tokens, 10);
    }

    #[test]
    fn error_events_become_api_errors() {
        let err = event(r#"{"type":"error","code":"invalid_json_schema","message":"bad schema","param":"text.format"}"#)
            .unwrap_err();
        assert_eq!(err.summary(), "500: bad schema; code=invalid_json_schema; param=text.format");

        let err = event(r#"{"type":"response.failed","response":{"error":{"code":"server_error","message":"boom"}}}"#)
            .unwrap_err();
        assert!(err.summary().contains("boom"));
    }

    #[tokio::test]
    async fn missing_key_is_not_configured() {
        let provider = OpenAiResponsesProvider::new("");
        let err = provider
            .stream(ProviderRequest::prompt("gpt-4.1", "hi"))
            .await
            .unwrap_err();
        assert!(err.is_not_configured());
    }
}
