//! `quarry config`: configuration management.

use quarry_config::AppConfig;

/// Print a complete default config file.
pub fn show_default() -> Result<(), Box<dyn std::error::Error>> {
    print!("{}", AppConfig::default_toml());
    Ok(())
}

pub fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

/// Load the config file and report what would be used.
pub fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   Config parsed successfully");
            if !config.has_api_key() {
                println!("   Warning: no API key set (QUARRY_API_KEY or OPENAI_API_KEY)");
            }
            let orch = &config.orchestrator;
            println!();
            println!("   Provider:      {}", config.provider_name);
            println!("   Model:         {}", config.model);
            println!("   Tool service:  {}", config.tool_service.url);
            println!("   Gateway:       {}:{}", config.gateway.host, config.gateway.port);
            println!(
                "   Iterations:    {} simple / {} analytical",
                orch.max_iterations_simple, orch.max_iterations_analytical
            );
        }
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}
