//! One conversational turn, end to end.
//!
//! Stages run strictly in order over a single [`ConversationState`]:
//! role selection, retrieval, answer, safety, continuity policy, reply
//! finishing and memory summarization. No stage aborts the turn.

use std::sync::Arc;

use storyloom_config::{AppConfig, PolicyConfig};
use storyloom_core::message::Message;
use storyloom_core::provider::Provider;
use storyloom_core::reply::{AssistantReply, ReplyMetadata, TurnOutcome, TurnRequest};
use storyloom_core::state::ConversationState;
use tracing::{info, warn};

use crate::answer::{AnswerGenerator, failure_reply};
use crate::policy::{ContinuityPolicy, PolicyContext, TurnDraft, finish};
use crate::retriever::{self, KnowledgeRetriever};
use crate::role_selector::RoleSelector;
use crate::safety::SafetyFilter;
use crate::summarizer::MemorySummarizer;
use crate::transcript;

pub struct TurnPipeline {
    selector: RoleSelector,
    retriever: Option<Arc<dyn KnowledgeRetriever>>,
    query_tail: usize,
    answerer: AnswerGenerator,
    safety: SafetyFilter,
    policy: ContinuityPolicy,
    policy_config: PolicyConfig,
    summarizer: MemorySummarizer,
}

impl TurnPipeline {
    /// Wire every stage from configuration. All model calls share
    /// `provider`.
    pub fn from_config(config: &AppConfig, provider: Arc<dyn Provider>) -> Self {
        let llm = &config.llm;
        let tail = config.policy.conversation_tail;
        Self {
            selector: RoleSelector::new(provider.clone(), &llm.role_selector_model, config.policy.triggers.clone())
                .with_conversation_tail(tail),
            retriever: retriever::from_config(&config.retrieval),
            query_tail: config.retrieval.query_tail,
            answerer: AnswerGenerator::new(provider.clone(), &llm.answer_model)
                .with_temperature(llm.temperature)
                .with_max_tokens(llm.max_tokens)
                .with_conversation_tail(tail),
            safety: SafetyFilter::new(provider.clone(), llm.safety_model()),
            policy: ContinuityPolicy::standard(),
            policy_config: config.policy.clone(),
            summarizer: MemorySummarizer::new(provider, llm.summary_model(), config.memory.clone()),
        }
    }

    /// Replace the configured retriever.
    pub fn with_retriever(mut self, retriever: Option<Arc<dyn KnowledgeRetriever>>) -> Self {
        self.retriever = retriever;
        self
    }

    pub fn has_retriever(&self) -> bool {
        self.retriever.is_some()
    }

    pub async fn run(&self, request: TurnRequest) -> TurnOutcome {
        let mut state = ConversationState::from_request(request);
        info!(
            messages = state.messages.len(),
            loop_count = state.agent_loop_count,
            "Turn started"
        );

        self.selector.select(&state).await.apply_to(&mut state);
        self.retrieve(&mut state).await;

        let mut llm_error = None;
        let draft = match self.answerer.generate(&state).await {
            Ok(draft) => {
                let draft = self.safety.filter(state.last_user_text(), draft).await;
                let ctx = PolicyContext::new(&state, &self.policy_config);
                let draft = self.policy.apply(draft, &ctx);
                finish::finish_reply(draft, &self.policy_config.triggers)
            }
            Err(e) => {
                warn!(error = %e, "Answer generation failed");
                let (text, info) = failure_reply(&e);
                llm_error = Some(info);
                TurnDraft::new(text, Vec::new())
            }
        };

        let TurnDraft {
            mut reply,
            tool_calls,
            quick_replies,
        } = draft;
        let sources = finish::cite_sources(&mut reply, &state.sources);

        let assistant = AssistantReply {
            content: reply,
            metadata: ReplyMetadata {
                active_role: state.active_role.id.to_string(),
                active_role_name: state.active_role.name.to_string(),
                active_role_reason: state.active_role_reason.clone(),
                active_intent: state.active_intent.clone(),
                active_tool_tier: state.tool_tier,
                allow_canvas_tools: state.allow_canvas_tools,
                allow_canvas_tools_reason: state.allow_canvas_tools_reason.clone(),
                tool_calls,
                quick_replies,
                llm_error,
            },
        };

        let mut transcript: Vec<Message> = state.messages.clone();
        transcript.push(assistant.clone().into_message());
        let conversation_summary = self
            .summarizer
            .summarize(&transcript, state.summary(), &state.canvas)
            .await;

        info!(
            role = state.active_role.id,
            tool_calls = assistant.metadata.tool_calls.len(),
            quick_replies = assistant.metadata.quick_replies.len(),
            summarized = conversation_summary.is_some(),
            "Turn finished"
        );

        TurnOutcome {
            reply: assistant,
            conversation_summary,
            agent_loop_count: state.agent_loop_count,
            sources,
        }
    }

    async fn retrieve(&self, state: &mut ConversationState) {
        let Some(retriever) = &self.retriever else {
            return;
        };
        let query = transcript::research_topic_with_summary(state, self.query_tail);
        let query = query.trim();
        if query.is_empty() {
            return;
        }
        match retriever.retrieve(query).await {
            Ok(found) if !found.is_empty() => {
                info!(
                    retriever = retriever.name(),
                    snippets = found.snippets.len(),
                    sources = found.sources.len(),
                    "Retrieved knowledge"
                );
                state.snippets = found.snippets;
                state.sources = found.sources;
            }
            Ok(_) => {}
            Err(e) => warn!(retriever = retriever.name(), error = %e, "Retrieval failed, answering without it"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retriever::Retrieval;
    use crate::test_helpers::{ScriptedProvider, make_call, text_response, tool_response};
    use async_trait::async_trait;
    use serde_json::json;
    use storyloom_core::error::{ProviderError, RetrievalError};
    use storyloom_core::reply::SourceRef;
    use storyloom_core::role::ToolTier;
    use storyloom_core::tool::CanvasOp;

    const SAFE: &str = r#"{"sexual":false,"nudity":false,"gore":false,"violence":false,"should_block":false,"should_sanitize":false,"reason":"ok"}"#;

    fn router(role: &str, allow: bool) -> String {
        json!({
            "role_id": role,
            "role_name": "",
            "reason": "test",
            "allow_canvas_tools": allow,
            "allow_canvas_tools_reason": "test",
            "tool_tier": if allow { "canvas" } else { "none" },
            "intent": "test",
        })
        .to_string()
    }

    fn pipeline(provider: Arc<ScriptedProvider>) -> TurnPipeline {
        TurnPipeline::from_config(&AppConfig::default(), provider)
    }

    struct FixedRetriever(Result<Retrieval, ()>);

    #[async_trait]
    impl KnowledgeRetriever for FixedRetriever {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn retrieve(&self, _query: &str) -> Result<Retrieval, RetrievalError> {
            self.0.clone().map_err(|_| RetrievalError::RequestFailed("down".into()))
        }
    }

    #[tokio::test]
    async fn denied_permission_yields_no_calls() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(text_response(&router("storyboard_artist", false))),
            Ok(tool_response(
                "",
                vec![make_call("c1", "createNode", json!({"type": "image", "label": "狐狸", "config": {"prompt": "fox"}}))],
            )),
            Ok(text_response(SAFE)),
        ]));
        let outcome = pipeline(provider.clone()).run(TurnRequest::from_user_text("画一只狐狸在森林里")).await;

        let meta = &outcome.reply.metadata;
        assert!(meta.tool_calls.is_empty());
        assert!(!meta.allow_canvas_tools);
        assert_eq!(meta.active_tool_tier, ToolTier::None);
        assert_eq!(meta.quick_replies.len(), 3);
        assert!(!outcome.reply.content.is_empty());
        assert!(provider.requests()[1].tools.is_empty());
        assert_eq!(outcome.agent_loop_count, 1);
    }

    #[tokio::test]
    async fn storyboard_turn_gets_video_edge_and_runs() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(text_response(&router("storyboard_artist", true))),
            Ok(tool_response(
                "分镜已安排。",
                vec![
                    make_call(
                        "c1",
                        "createNode",
                        json!({"type": "textToImage", "label": "第一集九宫格分镜", "config": {"kind": "textToImage", "prompt": "3x3 panels"}}),
                    ),
                    make_call("r1", "runNode", json!({"nodeId": "第一集九宫格分镜"})),
                ],
            )),
            Ok(text_response(SAFE)),
        ]));
        let request = TurnRequest {
            agent_loop_count: 3,
            ..TurnRequest::from_user_text("继续，直接生成九宫格分镜")
        };
        let outcome = pipeline(provider).run(request).await;

        let calls = &outcome.reply.metadata.tool_calls;
        let ids: Vec<_> = calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "c1",
                "r1",
                "auto_create_video_第一集15s视频",
                "auto_connect_第一集九宫格分镜_to_第一集15s视频",
            ]
        );
        assert_eq!(calls[0].node_type(), Some("image"));
        assert!(calls[2].is(CanvasOp::CreateNode));
        assert_eq!(outcome.agent_loop_count, 4);
        assert!(outcome.reply.content.ends_with("分镜生成后，点下面选项继续。"));
        assert_eq!(outcome.reply.metadata.quick_replies[0].label, "继续生成15s视频");
    }

    #[tokio::test]
    async fn unconfigured_provider_still_replies() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::NotConfigured("no key".into())),
            Err(ProviderError::NotConfigured("no key".into())),
            Err(ProviderError::NotConfigured("no key".into())),
        ]));
        let outcome = pipeline(provider.clone()).run(TurnRequest::from_user_text("你好")).await;
        assert_eq!(outcome.reply.content, crate::answer::NOT_CONFIGURED_TEXT);
        assert_eq!(outcome.reply.metadata.llm_error.as_ref().unwrap().kind, "not_configured");
        // router attempt + retry, then the answer; safety never runs
        assert_eq!(provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn retrieval_feeds_prompt_and_cited_sources() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(text_response(&router("screenwriter", false))),
            Ok(text_response("狐狸是橙色的，见 https://kb/fox")),
            Ok(text_response(SAFE)),
        ]));
        let retrieval = Retrieval {
            snippets: vec!["[1] 角色设定 | https://kb/fox\n橙色".into()],
            sources: vec![SourceRef::new("角色设定", "https://kb/fox"), SourceRef::new("其他", "https://kb/other")],
        };
        let pipeline = pipeline(provider.clone()).with_retriever(Some(Arc::new(FixedRetriever(Ok(retrieval)))));
        let outcome = pipeline.run(TurnRequest::from_user_text("知识库里狐狸是什么颜色？")).await;

        assert_eq!(outcome.sources.len(), 1);
        assert_eq!(outcome.sources[0].value, "https://kb/fox");
        let answer_prompt = &provider.requests()[1].messages[0].content;
        assert!(answer_prompt.contains("[1] 角色设定 | https://kb/fox\n橙色"));
    }

    #[tokio::test]
    async fn retrieval_failure_is_not_fatal() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(text_response(&router("screenwriter", false))),
            Ok(text_response("好的")),
            Ok(text_response(SAFE)),
        ]));
        let pipeline = pipeline(provider).with_retriever(Some(Arc::new(FixedRetriever(Err(())))));
        let outcome = pipeline.run(TurnRequest::from_user_text("讲讲这个故事的主角吧")).await;
        assert_eq!(outcome.reply.content, "好的");
        assert!(outcome.sources.is_empty());
    }

    #[tokio::test]
    async fn long_thread_is_summarized() {
        let mut messages = Vec::new();
        for i in 0..40 {
            messages.push(if i % 2 == 0 { Message::user(format!("第{i}句")) } else { Message::assistant("嗯") });
        }
        messages.push(Message::user("我们聊聊主角的性格吧"));
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(text_response(&router("screenwriter", false))),
            Ok(text_response("主角很勇敢。")),
            Ok(text_response(SAFE)),
            Ok(text_response("  用户在写狐狸冒险故事。 ")),
        ]));
        let request = TurnRequest {
            messages,
            ..TurnRequest::default()
        };
        let outcome = pipeline(provider).run(request).await;
        assert_eq!(outcome.conversation_summary.as_deref(), Some("用户在写狐狸冒险故事。"));
    }
}
