//! Configuration management commands.

use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use meridian_core::config::{init_config_file, ConfigLoader};

use crate::commands::load_config;
use crate::error::CliError;

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show {
        /// Path to a configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Write a default configuration file at the standard location
    Init,

    /// Print the default configuration file path
    Path,
}

pub async fn execute(cmd: ConfigCommands) -> Result<(), CliError> {
    match cmd {
        ConfigCommands::Show { config } => {
            let config = load_config(config.as_ref())?;
            let toml = toml::to_string_pretty(&config)
                .map_err(|e| CliError::configuration("failed to render configuration", e))?;
            println!("{toml}");
            Ok(())
        }
        ConfigCommands::Init => {
            let path = init_config_file()
                .map_err(|e| CliError::configuration("failed to initialize config file", e))?;
            println!("{} {}", "Created".green().bold(), path.display());
            Ok(())
        }
        ConfigCommands::Path => {
            match ConfigLoader::default_config_path() {
                Some(path) => println!("{}", path.display()),
                None => println!("(no config directory on this platform)"),
            }
            Ok(())
        }
    }
}
