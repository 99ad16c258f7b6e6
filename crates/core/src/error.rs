//! Error types for the Storyloom domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Storyloom operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Retrieval errors ---
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    // --- Policy errors ---
    #[error("Policy rule error: {0}")]
    Rule(#[from] RuleError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
        code: Option<String>,
        param: Option<String>,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// A one-line summary suitable for showing to the end user.
    ///
    /// API errors render as `status: message; code=..; param=..` with the
    /// optional parts omitted when absent.
    pub fn summary(&self) -> String {
        match self {
            Self::ApiError {
                status_code,
                message,
                code,
                param,
            } => {
                let mut out = format!("{status_code}: {message}");
                if let Some(code) = code.as_deref().filter(|c| !c.is_empty()) {
                    out.push_str(&format!("; code={code}"));
                }
                if let Some(param) = param.as_deref().filter(|p| !p.is_empty()) {
                    out.push_str(&format!("; param={param}"));
                }
                out
            }
            Self::RateLimited { .. } => "429: rate limited".into(),
            Self::AuthenticationFailed(msg) => format!("401: {msg}"),
            other => other.to_string(),
        }
    }

    /// True when the failure means no credentials are available at all.
    pub fn is_not_configured(&self) -> bool {
        matches!(self, Self::NotConfigured(_))
    }
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Retrieval backend not configured: {0}")]
    NotConfigured(String),

    #[error("Retrieval request failed: {0}")]
    RequestFailed(String),

    #[error("Retrieval backend returned status {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("Invalid retrieval response: {0}")]
    InvalidResponse(String),
}

/// Failure inside one continuity rule. The rule chain logs it and keeps the
/// previous snapshot.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Rule {rule} failed: {reason}")]
    Failed { rule: &'static str, reason: String },

    #[error("Malformed tool call {call_id}: {reason}")]
    MalformedCall { call_id: String, reason: String },
}
