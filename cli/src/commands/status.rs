//! The `status` command.

use anyhow::anyhow;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use meridian_core::{JobStatus, Repository};

use crate::commands::{connect, load_config};
use crate::error::CliError;

#[derive(Args)]
pub struct StatusArgs {
    /// The submitter-supplied job id
    pub jobspec_id: String,

    /// Path to a configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

pub async fn execute(args: StatusArgs) -> Result<(), CliError> {
    let config = load_config(args.config.as_ref())?;
    let database = connect(&config).await?;

    let job = database
        .job_by_jobspec_id(&args.jobspec_id)
        .await
        .map_err(|e| CliError::Other(e.into()))?
        .ok_or_else(|| CliError::Other(anyhow!("job not found: {}", args.jobspec_id)))?;

    let counts = database
        .count_executions(job.internal_id)
        .await
        .map_err(|e| CliError::Other(e.into()))?;

    let status_label = match job.status.parse::<JobStatus>() {
        Ok(JobStatus::Completed) => job.status.as_str().green().bold(),
        Ok(JobStatus::Failed) => job.status.as_str().red().bold(),
        Ok(JobStatus::Cancelled) => job.status.as_str().yellow().bold(),
        _ => job.status.as_str().cyan().bold(),
    };

    println!("{}  {}", "Job".bold(), job.jobspec_id);
    println!("  internal id:  {}", job.internal_id);
    println!("  status:       {status_label}");
    if let Some(owner) = &job.owner_id {
        println!("  owner:        {owner}");
    }
    if let Some(reason) = &job.reason {
        println!("  reason:       {reason}");
    }
    println!("  retries:      {}", job.retry_count);
    println!("  created:      {}", job.created_at);
    if let Some(started) = job.started_at {
        println!("  started:      {started}");
    }
    if let Some(completed) = job.completed_at {
        println!("  completed:    {completed}");
    }

    println!("{}", "Executions".bold());
    println!("  completed:         {}", counts.completed);
    println!("  failed:            {}", counts.failed);
    println!("  cancelled:         {}", counts.cancelled);
    println!("  duplicate_skipped: {}", counts.duplicate_skipped);
    println!("  open:              {}", counts.open());

    Ok(())
}
