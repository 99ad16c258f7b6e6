//! Schema-constrained model calls.
//!
//! A structured call tries the strict JSON-schema format first. A provider
//! failure triggers one retry without the schema; whatever text comes back
//! is parsed, and when parsing fails the type reconstructs a minimal valid
//! value from the raw text. The caller always gets a value.

use serde::de::DeserializeOwned;
use storyloom_core::error::ProviderError;
use storyloom_core::provider::{Provider, ProviderRequest, ResponseFormat};
use tracing::{debug, warn};

/// A type the model can be asked to emit as JSON.
pub trait StructuredOutput: DeserializeOwned + Sized {
    /// Schema name sent to the provider.
    const NAME: &'static str;

    /// Strict JSON Schema: every property required, no extra properties.
    fn schema() -> serde_json::Value;

    /// Best-effort value when the output cannot be parsed. `error` is the
    /// first provider failure, if any.
    fn fallback(raw: &str, error: Option<&ProviderError>) -> Self;
}

/// Parse model text as `T`, tolerating code fences and prose around the
/// JSON object.
pub fn parse_lenient<T: DeserializeOwned>(text: &str) -> Option<T> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

pub async fn call_structured<T: StructuredOutput>(provider: &dyn Provider, model: &str, prompt: &str) -> T {
    let request = ProviderRequest::prompt(model, prompt).with_response_format(ResponseFormat::JsonSchema {
        name: T::NAME.into(),
        schema: T::schema(),
        strict: true,
    });

    let mut first_error = None;
    let text = match provider.complete(request).await {
        Ok(response) => response.content,
        Err(e) => {
            warn!(schema = T::NAME, error = %e, "Structured call failed, retrying without schema");
            let retry = provider.complete(ProviderRequest::prompt(model, prompt)).await;
            first_error = Some(e);
            match retry {
                Ok(response) => response.content,
                Err(e2) => {
                    warn!(schema = T::NAME, error = %e2, "Unstructured retry failed");
                    String::new()
                }
            }
        }
    };

    debug!(schema = T::NAME, raw = %text, "Structured output");

    match parse_lenient(&text) {
        Some(value) => value,
        None => {
            warn!(schema = T::NAME, "Unparseable structured output, using fallback");
            T::fallback(&text, first_error.as_ref())
        }
    }
}
