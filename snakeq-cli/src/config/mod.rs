use anyhow::{Context, Result};
use snakeq::SnakeConfig;
use std::path::{Path, PathBuf};

/// Load configuration: an explicit file, otherwise `<config dir>/snakeq/config.toml` when it
/// exists, otherwise defaults. Environment variables are applied on top.
pub fn load(explicit: Option<&Path>) -> Result<SnakeConfig> {
    let mut config = match explicit {
        Some(path) => SnakeConfig::from_file(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?,
        None => match config_file_path() {
            Ok(path) if path.exists() => SnakeConfig::from_file(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?,
            _ => SnakeConfig::default(),
        },
    };

    config.apply_env()?;
    Ok(config)
}

pub fn config_file_path() -> Result<PathBuf> {
    let mut path = dirs::config_dir()
        .or_else(dirs::home_dir)
        .ok_or_else(|| anyhow::anyhow!("Cannot find config directory"))?;

    path.push("snakeq");
    path.push("config.toml");
    Ok(path)
}
