//! Shared test helpers for pipeline tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use storyloom_core::error::ProviderError;
use storyloom_core::provider::{ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
use storyloom_core::stream::{AssembledCall, ToolCallDelta};

/// A mock provider that replays a script of responses.
///
/// Each call to `stream` takes the next entry and replays it as chunks, so
/// the real drain and tool-call assembly run. Once the script is exhausted
/// every call fails with `InvalidResponse`.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Plain text responses, in order.
    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok(text_response(t))).collect())
    }

    /// Every request seen so far.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted_mock"
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::InvalidResponse("script exhausted".into())));
        let response = next?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        if !response.content.is_empty() {
            tx.send(Ok(StreamChunk::text(response.content))).await.unwrap();
        }
        for call in response.tool_calls {
            let started = ToolCallDelta::Started {
                call_id: call.id.clone(),
                item_id: Some(format!("item_{}", call.id)),
                name: Some(call.name),
                arguments: None,
            };
            tx.send(Ok(StreamChunk::tool_delta(started))).await.unwrap();
            let done = ToolCallDelta::ArgumentsDone {
                key: format!("item_{}", call.id),
                arguments: call.arguments.to_string(),
            };
            tx.send(Ok(StreamChunk::tool_delta(done))).await.unwrap();
        }
        tx.send(Ok(StreamChunk::done(response.usage))).await.unwrap();
        Ok(rx)
    }
}

/// A text-only response.
pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        content: text.to_string(),
        tool_calls: Vec::new(),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
    }
}

/// A response with tool calls and optional text.
pub fn tool_response(text: &str, calls: Vec<AssembledCall>) -> ProviderResponse {
    ProviderResponse {
        tool_calls: calls,
        ..text_response(text)
    }
}

/// Helper to create an assembled call.
pub fn make_call(id: &str, name: &str, arguments: serde_json::Value) -> AssembledCall {
    AssembledCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}
