//! `lorebook serve` — Start the HTTP API server.

use lorebook_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("📚 Lorebook Gateway");
    println!("   Listening:  {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:      {}", config.provider.model);
    println!("   Collection: {}", config.retrieval.collection);
    println!("   Transcript: {}", if config.transcript.enabled { "enabled" } else { "disabled" });

    lorebook_gateway::start(config).await?;

    Ok(())
}
