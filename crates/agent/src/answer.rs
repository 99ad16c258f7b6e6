//! Answer generation: the one model call that may propose canvas actions.

use std::sync::Arc;

use storyloom_core::error::ProviderError;
use storyloom_core::provider::{Provider, ProviderRequest};
use storyloom_core::reply::LlmErrorInfo;
use storyloom_core::state::ConversationState;
use storyloom_core::tool::{self, ToolCall};
use tracing::{debug, info};

use crate::policy::TurnDraft;
use crate::prompts;
use crate::transcript;

pub const NOT_CONFIGURED_TEXT: &str = "无法生成最终答案：后端未配置模型密钥（请检查 OPENAI_API_KEY / GEMINI_API_KEY）。";
pub const RUNTIME_FAILURE_TEXT: &str = "无法生成最终答案：运行时异常。";

/// User-facing text and error metadata for a failed answer call.
pub fn failure_reply(err: &ProviderError) -> (String, LlmErrorInfo) {
    let text = match err {
        ProviderError::NotConfigured(_) => NOT_CONFIGURED_TEXT.to_string(),
        ProviderError::InvalidResponse(_) => RUNTIME_FAILURE_TEXT.to_string(),
        other => format!("无法生成最终答案：OpenAI 接口异常（{}）。", other.summary()),
    };
    (text, LlmErrorInfo::from(err))
}

/// Stage 3: prompts the model with the persona, retrieval results and
/// canvas context, offering only the tools the role may use.
pub struct AnswerGenerator {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    conversation_tail: usize,
}

impl AnswerGenerator {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: None,
            max_tokens: None,
            conversation_tail: 16,
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_conversation_tail(mut self, tail: usize) -> Self {
        self.conversation_tail = tail;
        self
    }

    /// Render the full answer prompt for `state`.
    pub fn build_prompt(&self, state: &ConversationState) -> String {
        let directive = prompts::role_directive(state.active_role, &state.active_role_reason);
        prompts::answer(
            &transcript::research_topic_with_summary(state, self.conversation_tail),
            &directive,
            &state.snippets,
            &state.canvas.render_for_prompt(),
        )
    }

    pub async fn generate(&self, state: &ConversationState) -> Result<TurnDraft, ProviderError> {
        let role = state.active_role;
        let tools = tool::definitions_for_role(role, state.allow_canvas_tools);
        let prompt = self.build_prompt(state);
        debug!(prompt = %prompt, "Answer prompt");

        let request = ProviderRequest::prompt(&self.model, prompt)
            .with_tools(tools)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);
        let response = self.provider.complete(request).await?;

        let proposed = response.tool_calls.len();
        let calls: Vec<ToolCall> = response
            .tool_calls
            .into_iter()
            .filter_map(ToolCall::from_assembled)
            .collect();
        let calls = tool::filter_calls_for_role(calls, role, state.allow_canvas_tools);

        info!(
            role = role.id,
            chars = response.content.chars().count(),
            proposed,
            kept = calls.len(),
            "Answer generated"
        );

        Ok(TurnDraft {
            reply: response.content,
            tool_calls: calls,
            quick_replies: Vec::new(),
        })
    }
}
