//! Configuration loading, validation, and management for Storyloom.
//!
//! Loads configuration from `~/.storyloom/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod triggers;

pub use triggers::TriggerPhrases;

/// The root configuration structure.
///
/// Maps directly to `~/.storyloom/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// LLM backend and per-stage models
    #[serde(default)]
    pub llm: LlmConfig,

    /// Knowledge-base retrieval
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Continuity policy knobs and trigger phrases
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Rolling conversation summary
    #[serde(default)]
    pub memory: MemoryConfig,

    /// HTTP gateway
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

// --- LLM ---

#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// `openai` (Responses API) or `openai_compat` (chat completions)
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Override the API base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default = "default_role_selector_model")]
    pub role_selector_model: String,

    #[serde(default = "default_answer_model")]
    pub answer_model: String,

    /// Defaults to `role_selector_model`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_classifier_model: Option<String>,

    /// Defaults to `answer_model`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Log raw prompts and model output at debug level
    #[serde(default)]
    pub debug_responses: bool,
}

fn default_llm_provider() -> String {
    "openai".into()
}
fn default_role_selector_model() -> String {
    "gpt-4.1-mini".into()
}
fn default_answer_model() -> String {
    "gpt-4.1".into()
}
fn default_llm_timeout() -> u64 {
    120
}

impl LlmConfig {
    pub fn safety_model(&self) -> &str {
        self.safety_classifier_model
            .as_deref()
            .unwrap_or(&self.role_selector_model)
    }

    pub fn summary_model(&self) -> &str {
        self.summary_model.as_deref().unwrap_or(&self.answer_model)
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            api_key: None,
            base_url: None,
            role_selector_model: default_role_selector_model(),
            answer_model: default_answer_model(),
            safety_classifier_model: None,
            summary_model: None,
            temperature: None,
            max_tokens: None,
            timeout_secs: default_llm_timeout(),
            debug_responses: false,
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("role_selector_model", &self.role_selector_model)
            .field("answer_model", &self.answer_model)
            .field("safety_classifier_model", &self.safety_classifier_model)
            .field("summary_model", &self.summary_model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .field("debug_responses", &self.debug_responses)
            .finish()
    }
}

// --- Retrieval ---

#[derive(Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// `none` or `autorag`
    #[serde(default = "default_retrieval_provider")]
    pub provider: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rag_id: Option<String>,

    /// Sent as `x-internal-secret`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    #[serde(default = "default_retrieval_timeout")]
    pub timeout_secs: u64,

    /// Recent turns folded into the retrieval query
    #[serde(default = "default_query_tail")]
    pub query_tail: usize,
}

fn default_retrieval_provider() -> String {
    "none".into()
}
fn default_retrieval_timeout() -> u64 {
    20
}
fn default_query_tail() -> usize {
    8
}

impl RetrievalConfig {
    pub fn is_autorag(&self) -> bool {
        self.provider.eq_ignore_ascii_case("autorag")
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            provider: default_retrieval_provider(),
            endpoint: None,
            rag_id: None,
            secret: None,
            timeout_secs: default_retrieval_timeout(),
            query_tail: default_query_tail(),
        }
    }
}

impl std::fmt::Debug for RetrievalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalConfig")
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("rag_id", &self.rag_id)
            .field("secret", &redact(&self.secret))
            .field("timeout_secs", &self.timeout_secs)
            .field("query_tail", &self.query_tail)
            .finish()
    }
}

// --- Policy ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// After this many turns on a thread the lock gate opens on its own.
    /// `0` disables the cap.
    #[serde(default = "default_hard_max_turn_loops")]
    pub hard_max_turn_loops: u32,

    /// Recent turns shown to the router and the answer prompt
    #[serde(default = "default_conversation_tail")]
    pub conversation_tail: usize,

    #[serde(default)]
    pub triggers: TriggerPhrases,
}

fn default_hard_max_turn_loops() -> u32 {
    10
}
fn default_conversation_tail() -> usize {
    16
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            hard_max_turn_loops: default_hard_max_turn_loops(),
            conversation_tail: default_conversation_tail(),
            triggers: TriggerPhrases::default(),
        }
    }
}

// --- Memory ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Most recent messages kept verbatim outside the summary
    #[serde(default = "default_tail_keep")]
    pub tail_keep: usize,

    /// Summarize once the rendered transcript reaches this many characters
    #[serde(default = "default_trigger_chars")]
    pub trigger_chars: usize,

    /// With no summary yet, summarize once the transcript has this many messages
    #[serde(default = "default_min_messages")]
    pub min_messages_without_summary: usize,

    /// Hard cap on the stored summary
    #[serde(default = "default_max_summary_chars")]
    pub max_summary_chars: usize,
}

fn default_tail_keep() -> usize {
    16
}
fn default_trigger_chars() -> usize {
    120_000
}
fn default_min_messages() -> usize {
    40
}
fn default_max_summary_chars() -> usize {
    2200
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            tail_keep: default_tail_keep(),
            trigger_chars: default_trigger_chars(),
            min_messages_without_summary: default_min_messages(),
            max_summary_chars: default_max_summary_chars(),
        }
    }
}

// --- Gateway ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,

    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Browser origins allowed by CORS
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}
fn default_gateway_port() -> u16 {
    8787
}
fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:5173".into(), "http://127.0.0.1:5173".into()]
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

// --- Loading ---

impl AppConfig {
    /// Load configuration from the default path with env var overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("STORYLOOM_API_KEY").or_else(|| get("OPENAI_API_KEY")) {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = get("OPENAI_BASE_URL") {
            self.llm.base_url = Some(url);
        }
        if let Some(provider) = get("STORYLOOM_PROVIDER") {
            self.llm.provider = provider;
        }
        if let Some(model) = get("STORYLOOM_ROLE_SELECTOR_MODEL") {
            self.llm.role_selector_model = model;
        }
        if let Some(model) = get("STORYLOOM_ANSWER_MODEL") {
            self.llm.answer_model = model;
        }
        if let Some(model) = get("STORYLOOM_SAFETY_MODEL") {
            self.llm.safety_classifier_model = Some(model);
        }
        if get("DEBUG_OPENAI_RESPONSES").as_deref() == Some("1") {
            self.llm.debug_responses = true;
        }

        if let Some(provider) = get("STORYLOOM_SEARCH_PROVIDER") {
            self.retrieval.provider = provider;
        }
        if let Some(endpoint) = get("AUTORAG_ENDPOINT") {
            self.retrieval.endpoint = Some(endpoint);
        }
        if let Some(rag_id) = get("AUTORAG_ID") {
            self.retrieval.rag_id = Some(rag_id);
        }
        if let Some(secret) = get("INTERNAL_API_SECRET") {
            self.retrieval.secret = Some(secret);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".storyloom")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match self.llm.provider.as_str() {
            "openai" | "openai_compat" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "llm.provider must be 'openai' or 'openai_compat', got '{other}'"
                )));
            }
        }

        if let Some(t) = self.llm.temperature
            && !(0.0..=2.0).contains(&t)
        {
            return Err(ConfigError::ValidationError(
                "llm.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if !matches!(self.retrieval.provider.to_lowercase().as_str(), "none" | "autorag") {
            return Err(ConfigError::ValidationError(format!(
                "retrieval.provider must be 'none' or 'autorag', got '{}'",
                self.retrieval.provider
            )));
        }

        if self.memory.tail_keep == 0 {
            return Err(ConfigError::ValidationError(
                "memory.tail_keep must be > 0".into(),
            ));
        }

        if self.policy.conversation_tail == 0 {
            return Err(ConfigError::ValidationError(
                "policy.conversation_tail must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.llm.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    /// A copy with every secret replaced, safe to print.
    pub fn redacted(&self) -> Self {
        let mask = |s: &Option<String>| s.as_ref().map(|_| "[REDACTED]".to_string());
        let mut config = self.clone();
        config.llm.api_key = mask(&self.llm.api_key);
        config.retrieval.secret = mask(&self.retrieval.secret);
        config
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
