use mimic_browser::chrome;
use mimic_core::{Config, Paths};

pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!("mimic status");
    println!("============");
    println!();

    let config_path = paths.config_file();
    let config_exists = config_path.exists();
    println!(
        "Config:   {} {}",
        config_path.display(),
        if config_exists { "✓" } else { "✗ (not found)" }
    );

    match chrome::find_chrome_binary() {
        Some(path) => println!("Chrome:   {} ✓", path),
        None => println!("Chrome:   ✗ (not found; browser sessions will fail to start)"),
    }

    if !config_exists {
        println!();
        println!("Run `mimicd onboard` to initialize.");
        return Ok(());
    }

    let config = Config::load(&config_path)?;
    println!(
        "Reasoning: {} ({})",
        config.reasoning.model,
        if config.reasoning.api_key.is_empty() {
            "✗ no key"
        } else {
            "✓ key configured"
        }
    );
    println!("Gateway:  {}:{}", config.gateway.host, config.gateway.port);

    Ok(())
}
