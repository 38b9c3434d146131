//! `fundwise config`: configuration management commands.

use fundwise_config::AppConfig;
use fundwise_core::KnownTool;
use std::path::Path;

/// Validate the active configuration and print it, key redacted.
pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    let mut config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   Config parsed successfully");

    let warnings = warnings(&config);
    if warnings.is_empty() {
        println!("   All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   warning: {w}");
        }
    }

    println!();
    println!("   Model:     {}", config.model);
    println!("   Gateway:   {}:{}", config.gateway.host, config.gateway.port);
    println!("   Rounds:    {}", config.orchestrator.max_rounds);
    println!("   Tools:     {}", configured_tools(&config).join(", "));
    println!();

    if config.api_key.is_some() {
        config.api_key = Some("***".into());
    }
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

/// Write a starter config file, refusing to overwrite an existing one.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let path = AppConfig::config_path();
    write_starter(&path)?;
    println!("Wrote starter config to {}", path.display());
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::config_path().display());
    Ok(())
}

fn write_starter(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        return Err(format!("{} already exists", path.display()).into());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, AppConfig::default_toml())?;
    Ok(())
}

/// Non-fatal problems worth pointing out.
fn warnings(config: &AppConfig) -> Vec<&'static str> {
    let mut warnings = Vec::new();
    if !config.has_api_key() {
        warnings.push("No API key set (set ANTHROPIC_API_KEY or FUNDWISE_API_KEY)");
    }
    if config.tools.is_empty() {
        warnings.push("No [tools] configured; the model will answer without tools");
    }
    if config.orchestrator.tool_timeout_secs >= config.orchestrator.session_timeout_secs {
        warnings.push("tool_timeout_secs is not below session_timeout_secs");
    }
    warnings
}

fn configured_tools(config: &AppConfig) -> Vec<&'static str> {
    let tools: Vec<&'static str> = KnownTool::ALL
        .iter()
        .filter(|tool| config.tool_endpoint(**tool).is_some())
        .map(|tool| tool.as_str())
        .collect();
    if tools.is_empty() { vec!["none"] } else { tools }
}
