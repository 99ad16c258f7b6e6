//! `storyloom turn`: Run one turn and print the outcome as JSON.

use std::path::{Path, PathBuf};

use storyloom_agent::TurnPipeline;
use storyloom_config::AppConfig;
use storyloom_core::{Message, TurnRequest};
use tracing::info;

pub async fn run(message: Option<String>, request: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let base = match request.as_deref() {
        Some(path) => Some(read_request(path)?),
        None => None,
    };
    let request = build_request(base, message)?;

    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if !config.has_api_key() {
        eprintln!("⚠️  No API key configured; the turn will return the not-configured reply.");
        eprintln!("   Set OPENAI_API_KEY or edit {}", AppConfig::config_dir().join("config.toml").display());
    }

    let provider = storyloom_providers::build_from_config(&config.llm);
    let pipeline = TurnPipeline::from_config(&config, provider);
    info!(messages = request.messages.len(), "Running turn");

    let outcome = pipeline.run(request).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn read_request(path: &Path) -> Result<TurnRequest, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read request file {}: {e}", path.display()))?;
    serde_json::from_str(&raw).map_err(|e| format!("Invalid TurnRequest JSON in {}: {e}", path.display()))
}

/// Merge the request file with `--message`; the message becomes the newest
/// user turn.
fn build_request(base: Option<TurnRequest>, message: Option<String>) -> Result<TurnRequest, String> {
    let mut request = base.unwrap_or_default();
    if let Some(text) = message.filter(|m| !m.trim().is_empty()) {
        request.messages.push(Message::user(text));
    }
    if storyloom_core::message::last_user_text(&request.messages).trim().is_empty() {
        return Err("Nothing to send: pass --message or a --request file ending in a user message".into());
    }
    Ok(request)
}
