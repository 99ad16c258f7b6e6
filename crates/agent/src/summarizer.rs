//! Rolling conversation summary for long threads.

use std::sync::Arc;

use storyloom_config::MemoryConfig;
use storyloom_core::canvas::CanvasContext;
use storyloom_core::message::Message;
use storyloom_core::provider::{Provider, ProviderRequest};
use storyloom_core::text::clip;
use tracing::{debug, info, warn};

use crate::prompts;
use crate::transcript::format_messages;

/// Stage 7: compress older turns into a durable summary.
///
/// Best effort. Any failure leaves the previous summary in place.
pub struct MemorySummarizer {
    provider: Arc<dyn Provider>,
    model: String,
    config: MemoryConfig,
}

impl MemorySummarizer {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, config: MemoryConfig) -> Self {
        Self {
            provider,
            model: model.into(),
            config,
        }
    }

    /// Long threads only: either the rendered history outgrew the trigger
    /// size, or a thread with no summary yet reached the message minimum.
    pub fn should_summarize(&self, messages: &[Message], previous: Option<&str>) -> bool {
        if messages.len() <= self.config.tail_keep {
            return false;
        }
        let rendered_chars = format_messages(messages).chars().count();
        if rendered_chars >= self.config.trigger_chars {
            return true;
        }
        let has_summary = previous.is_some_and(|s| !s.trim().is_empty());
        !has_summary && messages.len() >= self.config.min_messages_without_summary
    }

    /// A new summary, or `None` to keep the previous one.
    pub async fn summarize(
        &self,
        messages: &[Message],
        previous: Option<&str>,
        canvas: &CanvasContext,
    ) -> Option<String> {
        if !self.should_summarize(messages, previous) {
            return None;
        }

        let split = messages.len() - self.config.tail_keep;
        let prompt = prompts::memory_summary(
            &canvas.render_for_prompt(),
            previous.unwrap_or(""),
            &format_messages(&messages[..split]),
            &format_messages(&messages[split..]),
        );

        let response = match self.provider.complete(ProviderRequest::prompt(&self.model, prompt)).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Summary call failed, keeping previous summary");
                return None;
            }
        };

        let summary = response.content.trim();
        if summary.is_empty() {
            debug!("Summary call returned nothing");
            return None;
        }
        let summary = clip(summary, self.config.max_summary_chars).trim_end().to_string();
        info!(messages = messages.len(), chars = summary.chars().count(), "Conversation summarized");
        Some(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedProvider, text_response};
    use storyloom_core::error::ProviderError;

    fn thread(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| if i % 2 == 0 { Message::user(format!("u{i}")) } else { Message::assistant(format!("a{i}")) })
            .collect()
    }

    fn summarizer(provider: Arc<ScriptedProvider>) -> MemorySummarizer {
        MemorySummarizer::new(provider, "summary-model", MemoryConfig::default())
    }

    #[test]
    fn trigger_conditions() {
        let s = summarizer(Arc::new(ScriptedProvider::new(vec![])));
        assert!(!s.should_summarize(&thread(16), None));
        assert!(!s.should_summarize(&thread(39), None));
        assert!(s.should_summarize(&thread(40), None));
        assert!(!s.should_summarize(&thread(40), Some("已有摘要")));
        assert!(s.should_summarize(&thread(40), Some("   ")));

        let big = vec![Message::user("x".repeat(70_000)), Message::assistant("y".repeat(70_000))]
            .into_iter()
            .chain(thread(16))
            .collect::<Vec<_>>();
        assert!(s.should_summarize(&big, Some("已有摘要")));
    }

    #[tokio::test]
    async fn short_thread_makes_no_call() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let out = summarizer(provider.clone()).summarize(&thread(10), None, &CanvasContext::default()).await;
        assert!(out.is_none());
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn summary_is_trimmed_and_clipped() {
        let long = format!("  {}  ", "摘".repeat(3000));
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(text_response(&long))]));
        let out = summarizer(provider.clone())
            .summarize(&thread(40), None, &CanvasContext::default())
            .await
            .unwrap();
        assert_eq!(out.chars().count(), 2200);

        let request = &provider.requests()[0];
        assert_eq!(request.model, "summary-model");
        let prompt = request.messages[0].content.as_str();
        assert!(prompt.contains("OLDER_MESSAGES_TO_COMPRESS:\nUser: u0"));
        assert!(prompt.contains("RECENT_TURNS (do not fully duplicate; keep as-is for recency):\nUser: u24"));
    }

    #[tokio::test]
    async fn failures_keep_previous_summary() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::Network("down".into())),
            Ok(text_response("   ")),
        ]));
        let s = summarizer(provider);
        assert!(s.summarize(&thread(40), None, &CanvasContext::default()).await.is_none());
        assert!(s.summarize(&thread(40), None, &CanvasContext::default()).await.is_none());
    }
}
