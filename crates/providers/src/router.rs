//! Provider construction from configuration.
//!
//! Every stage of a turn shares one backend; only the model differs per
//! stage, and that is chosen by the agent from `LlmConfig`.

use std::sync::Arc;

use storyloom_config::LlmConfig;
use storyloom_core::provider::Provider;

use crate::openai_compat::OpenAiCompatProvider;
use crate::responses::{OPENAI_BASE_URL, OpenAiResponsesProvider};

/// Build the configured provider.
///
/// A missing API key is not an error here: the provider reports
/// `NotConfigured` when first called, so the pipeline can still answer
/// with a fixed "not configured" reply.
pub fn build_from_config(config: &LlmConfig) -> Arc<dyn Provider> {
    let api_key = config.api_key.clone().unwrap_or_default();

    match config.provider.as_str() {
        "openai_compat" => {
            let base_url = config
                .base_url
                .clone()
                .unwrap_or_else(|| default_base_url("openai_compat"));
            Arc::new(
                OpenAiCompatProvider::new("openai_compat", base_url, api_key)
                    .with_timeout(config.timeout_secs),
            )
        }
        _ => {
            let mut provider = OpenAiResponsesProvider::new(api_key)
                .with_timeout(config.timeout_secs)
                .with_debug_responses(config.debug_responses);
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url);
            }
            Arc::new(provider)
        }
    }
}

/// Get the default base URL for a provider kind.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openai" => OPENAI_BASE_URL.into(),
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        _ => "http://localhost:11434/v1".into(),
    }
}
