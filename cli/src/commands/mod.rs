//! Subcommand implementations.

pub mod cancel;
pub mod config;
pub mod executions;
pub mod migrate;
pub mod questions;
pub mod serve;
pub mod status;

use std::path::PathBuf;

use meridian_core::{Config, ConfigLoader, Database};

use crate::error::CliError;

/// Load configuration, honoring an optional custom file path.
pub fn load_config(custom_file: Option<&PathBuf>) -> Result<Config, CliError> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = custom_file {
        loader = loader.with_file(path);
    }
    loader
        .load()
        .map_err(|e| CliError::configuration("failed to load configuration", e))
}

/// Connect to the database; failures here are startup failures (exit 2).
pub async fn connect(config: &Config) -> Result<Database, CliError> {
    Database::connect(config.database.clone())
        .await
        .map_err(|e| CliError::startup("database connection failed", e))
}
