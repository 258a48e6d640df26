// Configuration module for biosignal-recorder
//
// Provides:
// - YAML configuration file loading
// - Environment variable substitution
// - Configuration validation
// - Default values

pub mod types;
mod loader;

pub use types::*;
pub use loader::ConfigLoader;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    ConfigLoader::load(path).context("Failed to load configuration")
}

/// Load configuration with environment variable overrides
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config);
    ConfigLoader::validate(&config).context("Invalid configuration after environment overrides")?;
    Ok(config)
}

/// Allow environment variables to override config values
pub fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(data_dir) = std::env::var("BIOSIGNAL_DATA_DIR") {
        config.storage.filesystem.base_path = data_dir;
    }

    if let Ok(driver) = std::env::var("BIOSIGNAL_DEVICE_DRIVER") {
        config.device.driver = driver;
    }

    if let Ok(level) = std::env::var("BIOSIGNAL_LOG_LEVEL") {
        config.logging.level = level;
    }
}
