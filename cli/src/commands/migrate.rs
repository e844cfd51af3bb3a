//! The `migrate` command.

use clap::Args;
use std::path::PathBuf;

use crate::commands::{connect, load_config};
use crate::error::CliError;

#[derive(Args)]
pub struct MigrateArgs {
    /// Path to a configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

pub async fn execute(args: MigrateArgs) -> Result<(), CliError> {
    let config = load_config(args.config.as_ref())?;
    let database = connect(&config).await?;

    database
        .migrate()
        .await
        .map_err(|e| CliError::startup("migration failed", e))?;

    println!("Migrations applied.");
    Ok(())
}
