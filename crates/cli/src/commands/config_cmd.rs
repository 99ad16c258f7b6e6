//! `storyloom config`: Configuration management commands.

use storyloom_config::AppConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let warnings = warnings(&config);
            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!("   Provider:  {}", config.llm.provider);
            println!("   Models:    router={} answer={}", config.llm.role_selector_model, config.llm.answer_model);
            println!("   Retrieval: {}", config.retrieval.provider);
            println!("   Gateway:   {}:{}", config.gateway.host, config.gateway.port);
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

/// Settings that load fine but will degrade turns at runtime.
fn warnings(config: &AppConfig) -> Vec<&'static str> {
    let mut warnings = Vec::new();
    if !config.has_api_key() {
        warnings.push("No API key set (set OPENAI_API_KEY or STORYLOOM_API_KEY); turns will return the not-configured reply");
    }
    if config.retrieval.is_autorag()
        && (config.retrieval.endpoint.is_none() || config.retrieval.rag_id.is_none())
    {
        warnings.push("retrieval.provider is autorag but endpoint or rag_id is missing; retrieval is disabled");
    }
    if config.policy.hard_max_turn_loops == 0 {
        warnings.push("policy.hard_max_turn_loops = 0 disables the turn cap");
    }
    warnings
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config.redacted())?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_valid() {
        let path = AppConfig::config_dir().join("config.toml");
        assert!(path.to_str().unwrap().contains("config.toml"));
    }

    #[test]
    fn default_config_warns_about_missing_key() {
        let config = AppConfig::default();
        let w = warnings(&config);
        assert_eq!(w.len(), 1);
        assert!(w[0].contains("API key"));
    }

    #[test]
    fn incomplete_retrieval_is_flagged() {
        let mut config = AppConfig::default();
        config.llm.api_key = Some("sk-test".into());
        config.retrieval.provider = "autorag".into();
        config.retrieval.endpoint = Some("https://rag".into());
        assert!(warnings(&config).iter().any(|w| w.contains("rag_id")));
    }
}
