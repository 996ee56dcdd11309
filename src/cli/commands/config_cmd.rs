//! Configuration display.

use console::style;

use opqueue::config::{Config, Settings};

/// Print the effective configuration as TOML.
pub async fn cmd_config_show(settings: &Settings, config: &Config) -> anyhow::Result<()> {
    match &config.source_path {
        Some(path) => println!("# Loaded from {}", path.display()),
        None => println!("# No config file found, using defaults"),
    }
    println!("# Database: {}", settings.database_path().display());

    let effective = Config {
        data_dir: Some(settings.data_dir.display().to_string()),
        database: settings
            .database_path
            .as_ref()
            .map(|p| p.display().to_string()),
        queue: settings.queue.clone(),
        source_path: None,
    };
    println!("{}", toml::to_string_pretty(&effective)?);

    if config.source_path.is_none() {
        eprintln!(
            "{} Create opqueue.toml to customize these values",
            style("→").dim()
        );
    }
    Ok(())
}
