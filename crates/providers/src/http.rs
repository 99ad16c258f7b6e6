//! HTTP plumbing shared by the OpenAI-style providers: client construction,
//! status-to-error mapping, and SSE line framing.

use std::time::Duration;

use storyloom_core::error::ProviderError;
use serde::Deserialize;
use tracing::warn;

pub(crate) fn build_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

pub(crate) fn map_send_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    param: Option<String>,
}

fn value_to_code(v: serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Turn a non-success status and its body into a [`ProviderError`].
///
/// OpenAI-style `{"error": {"message", "code", "param"}}` bodies are
/// unpacked; anything else is passed through as the message.
pub(crate) fn error_from_status(status: u16, body: &str) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited { retry_after_secs: 5 },
        401 | 403 => ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ),
        _ => match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(env) => ProviderError::ApiError {
                status_code: status,
                message: env.error.message.unwrap_or_else(|| body.to_string()),
                code: env.error.code.and_then(value_to_code),
                param: env.error.param,
            },
            Err(_) => ProviderError::ApiError {
                status_code: status,
                message: body.to_string(),
                code: None,
                param: None,
            },
        },
    }
}

/// Pass a successful response through; read the body of a failed one into
/// an error.
pub(crate) async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();
    if (200..300).contains(&status) {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!(provider, status, body = %body, "Provider returned error");
    Err(error_from_status(status, &body))
}

/// Incremental SSE framing over raw bytes.
///
/// Bytes are buffered until a full line is available, so multi-byte UTF-8
/// sequences split across network chunks decode correctly.
#[derive(Debug, Default)]
pub(crate) struct SseLines {
    buffer: Vec<u8>,
}

impl SseLines {
    /// Feed bytes; returns the payloads of every complete `data:` line.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            if let Some(data) = line.strip_prefix("data:") {
                out.push(data.trim().to_string());
            }
        }
        out
    }
}
