//! `quarry serve`: start the HTTP/SSE gateway.

use quarry_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    if !config.has_api_key() {
        return Err("No API key configured. Set QUARRY_API_KEY or add api_key to the config file.".into());
    }

    println!("Quarry Gateway");
    println!("   Listening:     {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:         {}", config.model);
    println!("   Tool service:  {}", config.tool_service.url);

    quarry_gateway::start(config).await?;

    Ok(())
}
