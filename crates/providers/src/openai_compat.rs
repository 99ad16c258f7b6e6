//! OpenAI-compatible chat-completions provider.
//!
//! Works with: OpenRouter, Ollama, vLLM, Gemini's OpenAI endpoint, and any
//! backend exposing a streaming `/chat/completions`.
//!
//! Supports:
//! - Streaming SSE with text and tool-call deltas
//! - Function calling (tool-call deltas keyed by position index)
//! - `response_format` JSON-schema constraints

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use storyloom_core::error::ProviderError;
use storyloom_core::message::Message;
use storyloom_core::provider::*;
use storyloom_core::stream::ToolCallDelta;
use storyloom_core::tool::ToolDefinition;
use tracing::{debug, trace};

use crate::http::{SseLines, build_client, check_status, map_send_error};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: build_client(120),
        }
    }

    /// Replace the HTTP client timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.client = build_client(timeout_secs);
        self
    }

    /// Create an OpenRouter provider (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new("ollama", base_url.unwrap_or("http://localhost:11434/v1"), "")
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().into(),
                content: m.content.clone(),
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn build_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
            body["tool_choice"] = serde_json::json!("auto");
        }

        if let Some(ResponseFormat::JsonSchema { name, schema, strict }) = &request.response_format {
            body["response_format"] = serde_json::json!({
                "type": "json_schema",
                "json_schema": { "name": name, "schema": schema, "strict": strict },
            });
        }

        body
    }
}

/// Translate one parsed SSE chunk into stream chunks.
///
/// Tool-call fragments are keyed `index:{n}`; the first fragment of each
/// index announces the call with its real id so the assembler can alias
/// the two.
fn chunks_from_stream_response(resp: &StreamResponse) -> Vec<StreamChunk> {
    let mut out = Vec::new();

    if let Some(choice) = resp.choices.first() {
        let delta = &choice.delta;

        for tc in delta.tool_calls.iter().flatten() {
            let key = format!("index:{}", tc.index);
            let name = tc.function.as_ref().and_then(|f| f.name.clone());
            if tc.id.is_some() || name.is_some() {
                out.push(StreamChunk::tool_delta(ToolCallDelta::Started {
                    call_id: tc.id.clone().unwrap_or_default(),
                    item_id: Some(key.clone()),
                    name,
                    arguments: None,
                }));
            }
            if let Some(args) = tc.function.as_ref().and_then(|f| f.arguments.as_ref())
                && !args.is_empty()
            {
                out.push(StreamChunk::tool_delta(ToolCallDelta::ArgumentsDelta {
                    key,
                    delta: args.clone(),
                }));
            }
        }

        if let Some(content) = delta.content.as_ref().filter(|c| !c.is_empty()) {
            out.push(StreamChunk::text(content.clone()));
        }
    }

    if let Some(usage) = &resp.usage {
        out.push(StreamChunk::done(Some(Usage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        })));
    }

    out
}

#[async_trait]
impl storyloom_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(&self, request: ProviderRequest) -> std::result::Result<ChunkReceiver, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::build_body(&request);

        debug!(provider = %self.name, model = %request.model, tools = request.tools.len(), "Sending streaming request");

        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body);
        if !self.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = builder.send().await.map_err(map_send_error)?;
        let response = check_status(&self.name, response).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Spawn task to read the SSE byte stream and parse chunks
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
                    // "[DONE]" signals end of stream
                    if data == "[DONE]" {
                        let _ = tx.send(Ok(StreamChunk::done(None))).await;
                        return;
                    }

                    match serde_json::from_str::<StreamResponse>(&data) {
                        Ok(stream_resp) => {
                            for chunk in chunks_from_stream_response(&stream_resp) {
                                let done = chunk.done;
                                if tx.send(Ok(chunk)).await.is_err() {
                                    return; // receiver dropped
                                }
                                if done {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            trace!(
                                provider = %provider_name,
                                data = %data,
                                error = %e,
                                "Ignoring unparseable SSE chunk"
                            );
                        }
                    }
                }
            }

            // Stream ended without [DONE]
            let _ = tx.send(Ok(StreamChunk::done(None))).await;
        });

        Ok(rx)
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta, arriving incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyloom_core::Provider;
    use storyloom_core::stream::ToolCallAssembler;

    fn parse(data: &str) -> Vec<StreamChunk> {
        let resp: StreamResponse = serde_json::from_str(data).unwrap();
        chunks_from_stream_response(&resp)
    }

    #[test]
    fn openrouter_constructor() {
        let provider = OpenAiCompatProvider::openrouter("sk-test");
        assert_eq!(provider.name(), "openrouter");
        assert!(provider.base_url.contains("openrouter.ai"));
    }

    #[test]
    fn ollama_constructor() {
        let provider = OpenAiCompatProvider::ollama(None);
        assert_eq!(provider.name(), "ollama");
        assert!(provider.base_url.contains("localhost:11434"));
        assert!(provider.api_key.is_empty());
    }

    #[test]
    fn body_includes_schema_and_tools() {
        let req = ProviderRequest::prompt("m", "hi")
            .with_tools(storyloom_core::tool::canvas_tool_definitions().cloned().collect())
            .with_response_format(ResponseFormat::JsonSchema {
                name: "SafetyDecision".into(),
                schema: serde_json::json!({"type": "object"}),
                strict: true,
            });
        let body = OpenAiCompatProvider::build_body(&req);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["tools"].as_array().unwrap().len(), 4);
        assert_eq!(body["tools"][0]["function"]["name"], "createNode");
        assert_eq!(body["response_format"]["json_schema"]["name"], "SafetyDecision");
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn parse_stream_content_delta() {
        let chunks = parse(r#"{"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content.as_deref(), Some("Hello"));
    }

    #[test]
    fn parse_usage_chunk_finishes() {
        let chunks = parse(r#"{"choices":[],"usage":{"prompt_tokens":3,"completion_tokens":4,"total_tokens":7}}"#);
        assert!(chunks[0].done);
        assert_eq!(chunks[0].usage.unwrap().total_tokens, 7);
    }

    #[test]
    fn index_keyed_fragments_assemble() {
        let mut asm = ToolCallAssembler::new();
        let frames = [
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_abc","function":{"name":"createNode","arguments":""}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"type\":"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"image\"}"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_def","function":{"name":"runNode","arguments":"{}"}}]}}]}"#,
        ];
        for frame in frames {
            for chunk in parse(frame) {
                for d in chunk.tool_call_deltas {
                    asm.apply(d);
                }
            }
        }
        let calls = asm.finish();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_abc");
        assert_eq!(calls[0].arguments["type"], "image");
        assert_eq!(calls[1].name, "runNode");
    }
}
