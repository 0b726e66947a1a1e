use mimic_core::{Config, Paths};
use std::io::{self, Write};

pub async fn run(force: bool) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config_path = paths.config_file();

    if config_path.exists() && !force {
        println!("Config already exists at {}", config_path.display());
        println!("Use --force to overwrite.");
        return Ok(());
    }

    std::fs::create_dir_all(&paths.base)?;
    std::fs::create_dir_all(paths.browser_profiles_dir())?;

    let mut config = Config::default();

    print!("Anthropic API key (leave empty to configure later): ");
    io::stdout().flush()?;
    let mut key = String::new();
    io::stdin().read_line(&mut key)?;
    let key = key.trim();
    if !key.is_empty() {
        config.reasoning.api_key = key.to_string();
    }

    config.save(&config_path)?;

    println!();
    println!("Configuration written to {}", config_path.display());
    if config.reasoning.api_key.is_empty() {
        println!("Note: replay and workflow distillation need an API key.");
        println!("Edit {} to add one.", config_path.display());
    }
    println!("Run `mimicd serve` to start the gateway.");
    Ok(())
}
