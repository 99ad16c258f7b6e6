//! Knowledge-base retrieval.
//!
//! Retrieval is best-effort grounding: the pipeline treats any failure as
//! "no results" and answers without it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use storyloom_config::RetrievalConfig;
use storyloom_core::error::RetrievalError;
use storyloom_core::reply::SourceRef;
use storyloom_core::text::clip;
use tracing::{debug, warn};

/// Most source items read from one response.
const MAX_SOURCES: usize = 8;
/// Raw-JSON fallback snippet length, in characters.
const RAW_SNIPPET_CHARS: usize = 4000;

/// Snippets for the answer prompt plus citable sources.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Retrieval {
    pub snippets: Vec<String>,
    pub sources: Vec<SourceRef>,
}

impl Retrieval {
    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }
}

/// A backend that answers a free-text query with grounding snippets.
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    fn name(&self) -> &str;

    async fn retrieve(&self, query: &str) -> Result<Retrieval, RetrievalError>;
}

/// Build the configured retriever, if any.
pub fn from_config(config: &RetrievalConfig) -> Option<Arc<dyn KnowledgeRetriever>> {
    if !config.is_autorag() {
        return None;
    }
    match AutoRagRetriever::from_config(config) {
        Ok(retriever) => Some(Arc::new(retriever)),
        Err(e) => {
            warn!(error = %e, "AutoRAG selected but not usable, retrieval disabled");
            None
        }
    }
}

/// Client for an AutoRAG proxy endpoint: `POST {ragId, query}`.
pub struct AutoRagRetriever {
    endpoint: String,
    rag_id: String,
    secret: Option<String>,
    client: reqwest::Client,
}

impl AutoRagRetriever {
    pub fn new(endpoint: impl Into<String>, rag_id: impl Into<String>, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self {
            endpoint: endpoint.into(),
            rag_id: rag_id.into(),
            secret: None,
            client,
        }
    }

    pub fn with_secret(mut self, secret: Option<String>) -> Self {
        self.secret = secret.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn from_config(config: &RetrievalConfig) -> Result<Self, RetrievalError> {
        let endpoint = config
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| RetrievalError::NotConfigured("retrieval.endpoint is empty".into()))?;
        let rag_id = config
            .rag_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| RetrievalError::NotConfigured("retrieval.rag_id is empty".into()))?;
        Ok(Self::new(endpoint, rag_id, config.timeout_secs).with_secret(config.secret.clone()))
    }
}

#[async_trait]
impl KnowledgeRetriever for AutoRagRetriever {
    fn name(&self) -> &str {
        "autorag"
    }

    async fn retrieve(&self, query: &str) -> Result<Retrieval, RetrievalError> {
        if query.trim().is_empty() {
            return Ok(Retrieval::default());
        }

        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "ragId": self.rag_id, "query": query }));
        if let Some(secret) = &self.secret {
            request = request.header("x-internal-secret", secret);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RetrievalError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RetrievalError::RequestFailed(e.to_string()))?;
        if !status.is_success() {
            return Err(RetrievalError::BadStatus {
                status: status.as_u16(),
                body: clip(&body, 2000).to_string(),
            });
        }

        let decoded: Value = serde_json::from_str(&body)
            .map_err(|e| RetrievalError::InvalidResponse(format!("{e}: {}", clip(&body, 200))))?;

        let retrieval = normalize_response(&decoded);
        debug!(
            rag_id = %self.rag_id,
            query = %clip(query, 160),
            snippets = retrieval.snippets.len(),
            sources = retrieval.sources.len(),
            "AutoRAG ok"
        );
        Ok(retrieval)
    }
}

/// Unwrap the proxy envelope (`{"result": ...}`) and normalize.
pub fn normalize_response(decoded: &Value) -> Retrieval {
    let result = match decoded {
        Value::Object(map) => map.get("result").unwrap_or(&Value::Null),
        other => other,
    };
    match result {
        Value::Object(_) => normalize_result(result),
        other => normalize_result(&serde_json::json!({ "result": other })),
    }
}

fn first_str<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| item.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// Zero, empty and null scores count as missing.
fn score_of(item: &Value) -> Option<f64> {
    let raw = ["score", "similarity"].iter().filter_map(|k| item.get(*k)).find(|v| match v {
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Bool(b) => *b,
        _ => false,
    })?;
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Flatten an arbitrary result document into snippets and sources.
///
/// With no recognizable field the whole document (clipped) becomes the
/// single snippet.
pub fn normalize_result(result: &Value) -> Retrieval {
    let mut out = Retrieval::default();

    if let Some(answer) = first_str(result, &["answer", "output", "response"]) {
        out.snippets.push(answer.to_string());
    }

    let items = ["sources", "results", "documents"]
        .iter()
        .filter_map(|k| result.get(*k).and_then(Value::as_array))
        .find(|a| !a.is_empty());

    for (idx, item) in items.into_iter().flatten().take(MAX_SOURCES).enumerate() {
        if !item.is_object() {
            continue;
        }
        let idx = idx + 1;
        let title = first_str(item, &["title", "label", "name"])
            .map(str::to_string)
            .unwrap_or_else(|| format!("KB#{idx}"));
        let url = first_str(item, &["url", "source_url", "source"]);
        let body = first_str(item, &["text", "content", "snippet"]);

        let mut header = vec![title.clone()];
        if let Some(url) = url {
            header.push(url.to_string());
        }
        if let Some(score) = score_of(item) {
            header.push(format!("score={score:.3}"));
        }
        if let Some(body) = body {
            out.snippets.push(format!("[{idx}] {}\n{body}", header.join(" | ")));
        }
        if let Some(url) = url {
            out.sources.push(SourceRef::new(title, url));
        }
    }

    if out.snippets.is_empty() {
        out.snippets.push(clip(&result.to_string(), RAW_SNIPPET_CHARS).to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn answer_and_sources_are_flattened() {
        let r = normalize_result(&json!({
            "response": "  狐狸是橙色的。 ",
            "data": [],
            "results": [
                {"title": "角色设定", "url": "https://kb/1", "text": "小狐狸，橙色毛发", "score": 0.91234},
                {"content": "没有标题"},
                "not an object",
                {"name": "无正文", "source": "https://kb/3"}
            ]
        }));
        assert_eq!(r.snippets[0], "狐狸是橙色的。");
        assert_eq!(r.snippets[1], "[1] 角色设定 | https://kb/1 | score=0.912\n小狐狸，橙色毛发");
        assert_eq!(r.snippets[2], "[2] KB#2\n没有标题");
        assert_eq!(r.snippets.len(), 3);
        assert_eq!(r.sources.len(), 2);
        assert_eq!(r.sources[1].label, "无正文");
        assert_eq!(r.sources[1].value, "https://kb/3");
    }

    #[test]
    fn zero_score_is_left_out() {
        let r = normalize_result(&json!({
            "results": [
                {"title": "零分", "text": "a", "score": 0},
                {"title": "回退", "text": "b", "score": 0.0, "similarity": 0.5},
                {"title": "字符串", "text": "c", "similarity": "0.25"}
            ]
        }));
        assert_eq!(r.snippets[0], "[1] 零分\na");
        assert_eq!(r.snippets[1], "[2] 回退 | score=0.500\nb");
        assert_eq!(r.snippets[2], "[3] 字符串 | score=0.250\nc");
    }

    #[test]
    fn at_most_eight_items_are_read() {
        let items: Vec<_> = (0..12).map(|i| json!({"text": format!("t{i}")})).collect();
        let r = normalize_result(&json!({ "documents": items }));
        assert_eq!(r.snippets.len(), MAX_SOURCES);
    }

    #[test]
    fn unrecognized_response_becomes_raw_snippet() {
        let r = normalize_result(&json!({"weird": {"nested": "value"}}));
        assert_eq!(r.snippets.len(), 1);
        assert!(r.snippets[0].contains("\"weird\""));
        assert!(r.sources.is_empty());

        let long = "x".repeat(10_000);
        let r = normalize_result(&json!({ "blob": long }));
        assert_eq!(r.snippets[0].chars().count(), RAW_SNIPPET_CHARS);
    }

    #[test]
    fn envelope_is_unwrapped() {
        let r = normalize_response(&json!({"result": {"answer": "ok"}}));
        assert_eq!(r.snippets, vec!["ok".to_string()]);

        let r = normalize_response(&json!({"result": "plain string"}));
        assert_eq!(r.snippets, vec![r#"{"result":"plain string"}"#.to_string()]);
    }

    #[test]
    fn from_config_requires_endpoint_and_id() {
        let mut config = RetrievalConfig {
            provider: "autorag".into(),
            ..RetrievalConfig::default()
        };
        assert!(from_config(&config).is_none());

        config.endpoint = Some("https://worker.example/autorag".into());
        config.rag_id = Some("kb".into());
        let retriever = from_config(&config).unwrap();
        assert_eq!(retriever.name(), "autorag");
    }

    #[tokio::test]
    async fn empty_query_skips_the_request() {
        let r = AutoRagRetriever::new("http://127.0.0.1:9", "kb", 1);
        assert!(r.retrieve("   ").await.unwrap().is_empty());
    }
}
