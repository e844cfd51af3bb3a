//! The `executions` command.

use anyhow::anyhow;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use meridian_core::{ExecutionStatus, Repository};

use crate::commands::{connect, load_config};
use crate::error::CliError;

#[derive(Args)]
pub struct ExecutionsArgs {
    /// The submitter-supplied job id
    pub jobspec_id: String,

    /// Path to a configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print full rows as JSON instead of the table
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: ExecutionsArgs) -> Result<(), CliError> {
    let config = load_config(args.config.as_ref())?;
    let database = connect(&config).await?;

    let job = database
        .job_by_jobspec_id(&args.jobspec_id)
        .await
        .map_err(|e| CliError::Other(e.into()))?
        .ok_or_else(|| CliError::Other(anyhow!("job not found: {}", args.jobspec_id)))?;

    let rows = database
        .list_executions(job.internal_id)
        .await
        .map_err(|e| CliError::Other(e.into()))?;

    if args.json {
        let json = serde_json::to_string_pretty(&rows).map_err(|e| CliError::Other(e.into()))?;
        println!("{json}");
        return Ok(());
    }

    println!(
        "{:<14} {:<20} {:<22} {:>7} {:<18} {:<16}",
        "REGION".bold(),
        "MODEL".bold(),
        "QUESTION".bold(),
        "ATTEMPT".bold(),
        "STATUS".bold(),
        "PROVIDER".bold()
    );

    for row in rows {
        let status = match row.status.parse::<ExecutionStatus>() {
            Ok(ExecutionStatus::Completed) => row.status.as_str().green(),
            Ok(ExecutionStatus::Failed) => row.status.as_str().red(),
            Ok(ExecutionStatus::Cancelled) => row.status.as_str().yellow(),
            Ok(ExecutionStatus::DuplicateSkipped) => row.status.as_str().dimmed(),
            _ => row.status.as_str().cyan(),
        };

        println!(
            "{:<14} {:<20} {:<22} {:>7} {:<18} {:<16}",
            row.region,
            row.model_id,
            row.question_id.as_deref().unwrap_or("-"),
            row.attempt,
            status,
            if row.provider_id.is_empty() {
                "-"
            } else {
                &row.provider_id
            },
        );
    }

    Ok(())
}
