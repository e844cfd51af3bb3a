// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Configuration management.
//!
//! Hierarchical configuration with the following precedence:
//! 1. Environment variables (prefixed with `MERIDIAN_`)
//! 2. Config file (`~/.config/meridian/config.toml` or a custom path)
//! 3. Defaults

pub mod models;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde_valid::Validate;
use std::path::{Path, PathBuf};

pub use models::{
    Config, JobsConfig, ProvidersConfig, QueueConfig, RecoveryConfig, RetryConfig, RunnerConfig,
    SchedulerConfig,
};

/// Default configuration file name
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default configuration directory name
const CONFIG_DIR_NAME: &str = "meridian";

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "MERIDIAN";

/// Environment variable separator for nested configuration.
/// Example: `MERIDIAN_SCHEDULER__MAX_CONCURRENT_PER_REGION`
const ENV_SEPARATOR: &str = "__";

/// Configuration loader with builder pattern.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    /// Optional custom configuration file path
    custom_file: Option<PathBuf>,
    /// Whether to skip loading from default config file
    skip_default_file: bool,
    /// Whether to skip loading from environment variables
    skip_env: bool,
}

impl ConfigLoader {
    /// Create a new configuration loader with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Specify a custom configuration file path
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.custom_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Skip loading from the default configuration file
    pub fn skip_default_file(mut self) -> Self {
        self.skip_default_file = true;
        self
    }

    /// Skip loading from environment variables
    pub fn skip_env(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Load the configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be parsed, an environment
    /// override has the wrong shape, or validation fails.
    pub fn load(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::builder();

        let defaults = Config::default();
        let defaults_map = config_to_map(&defaults)?;
        builder = builder.add_source(config::Config::try_from(&defaults_map)?);

        if !self.skip_default_file {
            if let Some(config_path) = self.find_config_file() {
                tracing::debug!("Loading config from: {}", config_path.display());
                builder = builder.add_source(
                    File::from(config_path)
                        .required(false)
                        .format(config::FileFormat::Toml),
                );
            }
        }

        if let Some(ref custom_path) = self.custom_file {
            tracing::info!("Loading custom config from: {}", custom_path.display());
            builder = builder.add_source(
                File::from(custom_path.as_ref())
                    .required(true)
                    .format(config::FileFormat::Toml),
            );
        }

        if !self.skip_env {
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            );
        }

        let config_result = builder.build().context("Failed to build configuration")?;

        let config: Config = config_result
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Configuration validation failed: {}", e))?;

        Ok(config)
    }

    /// Find the default configuration file.
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Some(config_path);
            }
        }

        let local_config = PathBuf::from(CONFIG_FILE_NAME);
        if local_config.exists() {
            return Some(local_config);
        }

        None
    }

    /// Get the default configuration directory path.
    pub fn default_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME))
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
    }
}

/// Helper function to convert Config to a serde map for the config builder
fn config_to_map(config: &Config) -> Result<serde_json::Value, ConfigError> {
    serde_json::to_value(config).map_err(|e| ConfigError::Foreign(Box::new(e)))
}

/// Initialize a default configuration file at the standard location.
pub fn init_config_file() -> Result<PathBuf> {
    let config_dir =
        ConfigLoader::default_config_dir().context("Could not determine config directory")?;

    std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

    let config_path = config_dir.join(CONFIG_FILE_NAME);

    if config_path.exists() {
        anyhow::bail!("Config file already exists at: {}", config_path.display());
    }

    let default_config = Config::default();
    let toml_content =
        toml::to_string_pretty(&default_config).context("Failed to serialize default config")?;

    std::fs::write(&config_path, toml_content).context("Failed to write config file")?;

    Ok(config_path)
}
