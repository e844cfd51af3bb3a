//! The `cancel` command.
//!
//! Cancels through the repository: the conditional status transition and
//! the bulk execution sweep take effect immediately, and the serve
//! process's runner observes the terminal status and aborts in-flight
//! provider calls on its next barrier poll.

use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use meridian_core::{cancel_job, CancelError, ContextManager};

use crate::commands::{connect, load_config};
use crate::error::CliError;

#[derive(Args)]
pub struct CancelArgs {
    /// The submitter-supplied job id
    pub jobspec_id: String,

    /// Requester identity, checked against the job's owner
    #[arg(long)]
    pub requester: Option<String>,

    /// Path to a configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

pub async fn execute(args: CancelArgs) -> Result<(), CliError> {
    let config = load_config(args.config.as_ref())?;
    let database = connect(&config).await?;

    // This process has no live job contexts; cancellation propagates via
    // the status row.
    let contexts = ContextManager::new();

    match cancel_job(
        &database,
        &contexts,
        &args.jobspec_id,
        args.requester.as_deref(),
    )
    .await
    {
        Ok(outcome) => {
            println!(
                "{} job {} ({} executions swept)",
                "Cancelled".yellow().bold(),
                args.jobspec_id,
                outcome.cancelled_executions
            );
            Ok(())
        }
        Err(CancelError::AlreadyTerminal(status)) => {
            println!("Job {} is already {status}; nothing to do.", args.jobspec_id);
            Ok(())
        }
        Err(e) => Err(CliError::Other(e.into())),
    }
}
