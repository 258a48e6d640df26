// Configuration loader with environment variable substitution

use super::types::*;
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::Path;
use std::time::Duration;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;

        Self::parse(&content)
    }

    /// Parse configuration text, substituting and validating
    pub fn parse(content: &str) -> Result<AppConfig> {
        let content = Self::substitute_env_vars(content)?;

        let config: AppConfig = serde_yaml::from_str(&content)
            .context("Failed to parse YAML configuration")?;

        Self::validate(&config)?;

        Ok(config)
    }

    /// Substitute ${VAR} and ${VAR:-default} patterns with environment variables
    ///
    /// Examples:
    /// - ${HOME} -> /home/user
    /// - ${DATA_DIR:-data} -> data (if DATA_DIR not set)
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]+))?\}")
            .context("Invalid environment substitution pattern")?;

        let substituted = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str());

            match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => match default_value {
                    Some(default) => default.to_string(),
                    // Keep original if no default and var not found
                    None => format!("${{{}}}", var_name),
                },
            }
        });

        Ok(substituted.to_string())
    }

    /// Validate configuration
    pub fn validate(config: &AppConfig) -> Result<()> {
        match config.device.driver.as_str() {
            "simulated" => {}
            unknown => bail!("Unknown device driver: '{}'. Supported: simulated", unknown),
        }

        if config.device.connect_timeout_seconds == 0 {
            bail!("device.connect_timeout_seconds must be > 0");
        }

        if config.device.connect_poll_interval_ms == 0 {
            bail!("device.connect_poll_interval_ms must be > 0");
        }

        if config.device.simulated.channels.is_empty() {
            bail!("device.simulated.channels cannot be empty");
        }

        if config.device.simulated.battery_level > 100 {
            bail!("device.simulated.battery_level must be 0-100");
        }

        if config.acquisition.poll_interval_ms == 0 {
            bail!("acquisition.poll_interval_ms must be > 0");
        }

        if config.acquisition.subscriber_timeout_ms == 0 {
            bail!("acquisition.subscriber_timeout_ms must be > 0");
        }

        if config.acquisition.status_interval_ms == 0 {
            bail!("acquisition.status_interval_ms must be > 0");
        }

        if config.acquisition.subscriber_queue_capacity == 0 {
            bail!("acquisition.subscriber_queue_capacity must be > 0");
        }

        if config.acquisition.live_queue_capacity == 0 {
            bail!("acquisition.live_queue_capacity must be > 0");
        }

        if config.recorder.max_chunk_samples == 0 {
            bail!("recorder.max_chunk_samples must be > 0");
        }

        let chunk_duration = config.recorder.max_chunk_duration_seconds;
        if !(chunk_duration > 0.0) || Duration::try_from_secs_f64(chunk_duration).is_err() {
            bail!(
                "recorder.max_chunk_duration_seconds must be a positive number of seconds that fits a duration, got {}",
                chunk_duration
            );
        }

        match config.storage.backend.as_str() {
            "filesystem" => {
                if config.storage.filesystem.base_path.is_empty() {
                    bail!("storage.filesystem.base_path cannot be empty");
                }
            }
            "memory" => {}
            unknown => bail!("Unknown backend: '{}'. Supported: filesystem, memory", unknown),
        }

        Ok(())
    }
}
