//! `storyloom gateway`: Start the HTTP API server.

use storyloom_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("🧵 Storyloom Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Provider:  {} ({})", config.llm.provider, config.llm.answer_model);

    storyloom_gateway::start(config).await?;

    Ok(())
}
