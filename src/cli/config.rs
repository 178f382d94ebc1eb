//! Config command handlers.

use anyhow::{Context, Result};

use groupwarden::config::Config;

use super::ConfigAction;

pub(crate) async fn cmd_config(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config_path = Config::path();
            println!("Config file: {}", config_path.display());
            if !config_path.exists() {
                println!("(no file found, showing defaults with env overrides)");
            }

            let mut config = Config::load().context("Failed to load configuration")?;
            mask_secrets(&mut config);
            println!(
                "{}",
                serde_json::to_string_pretty(&config).context("Failed to render configuration")?
            );
        }
        ConfigAction::Init => {
            let config_path = Config::path();
            if config_path.exists() {
                println!("Config file already exists: {}", config_path.display());
                return Ok(());
            }
            Config::default()
                .save()
                .context("Failed to write config file")?;
            println!("Wrote default config to {}", config_path.display());
            println!("Set telegram.token and classifier.api_key, then run `groupwarden run`.");
        }
    }
    Ok(())
}

fn mask_secrets(config: &mut Config) {
    if !config.telegram.token.is_empty() {
        config.telegram.token = "***".to_string();
    }
    if !config.classifier.api_key.is_empty() {
        config.classifier.api_key = "***".to_string();
    }
}
