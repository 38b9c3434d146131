//! `fundwise serve`: start the HTTP gateway.

use fundwise_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    if !config.has_api_key() {
        return Err("No API key configured. Set ANTHROPIC_API_KEY or FUNDWISE_API_KEY.".into());
    }

    println!("fundwise gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.model);
    println!("   Rounds:    {}", config.orchestrator.max_rounds);

    fundwise_gateway::start(config).await?;

    Ok(())
}
