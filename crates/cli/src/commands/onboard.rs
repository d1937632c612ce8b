//! `lorebook onboard` — Initialize the config directory.

use lorebook_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
        return Ok(());
    }

    std::fs::create_dir_all(&config_dir)?;
    std::fs::write(&config_path, AppConfig::default_toml())?;

    println!("📚 Lorebook initialized");
    println!("   Config written to {}", config_path.display());
    println!();
    println!("Next steps:");
    println!("   1. Set LOREBOOK_API_KEY (or api_key in the config)");
    println!("   2. Point retrieval.index_url at your vector backend");
    println!("   3. Run `lorebook doctor` to verify the setup");

    Ok(())
}
