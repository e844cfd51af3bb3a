//! The `serve` command: run the full orchestration service.

use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use meridian_core::{
    ContextManager, HealthChecker, JobRunner, MemoryClaimLock, MemoryQueue, OutboxPublisher,
    ProviderClient, ProviderRouter, RecoveryController, Repository, Scheduler,
};

use crate::commands::{connect, load_config};
use crate::error::CliError;

#[derive(Args)]
pub struct ServeArgs {
    /// Path to a configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Apply pending database migrations before starting
    #[arg(long)]
    pub migrate: bool,
}

pub async fn execute(args: ServeArgs) -> Result<(), CliError> {
    let config = load_config(args.config.as_ref())?;

    if config.providers.endpoints.is_empty() {
        return Err(CliError::Configuration {
            message: "no provider endpoints configured".to_string(),
            source: None,
        });
    }

    let database = connect(&config).await?;
    if args.migrate {
        database
            .migrate()
            .await
            .map_err(|e| CliError::startup("migration failed", e))?;
    }
    database
        .health_check()
        .await
        .map_err(|e| CliError::startup("database health check failed", e))?;

    let repo: Arc<dyn Repository> = Arc::new(database);
    let queue = Arc::new(MemoryQueue::new());
    let claims = Arc::new(MemoryClaimLock::new());
    let contexts = Arc::new(ContextManager::new());

    let router = Arc::new(ProviderRouter::new(
        &config.providers.endpoints,
        ProviderClient::new(),
        config.providers.staleness_window(),
    ));

    let scheduler = Scheduler::new(
        Arc::clone(&repo),
        Arc::clone(&router),
        config.scheduler.clone(),
        config.retry.clone(),
    );

    let runner = JobRunner::new(
        Arc::clone(&repo),
        Arc::clone(&scheduler),
        Arc::clone(&contexts),
        claims,
        Arc::clone(&queue) as _,
        config.runner.clone(),
        config.queue.clone(),
    );

    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    let health = HealthChecker::new(Arc::clone(&router), config.providers.health_check_interval());
    tasks.push(tokio::spawn(health.run(shutdown.clone())));

    let publisher = OutboxPublisher::new(
        Arc::clone(&repo),
        Arc::clone(&queue) as _,
        config.queue.clone(),
    );
    tasks.push(tokio::spawn(publisher.run(shutdown.clone())));

    let recovery = RecoveryController::new(Arc::clone(&repo), config.recovery.clone());
    tasks.push(tokio::spawn(recovery.run(shutdown.clone())));

    tasks.extend(scheduler.spawn_region_workers(&shutdown));
    tasks.push(tokio::spawn(runner.run(shutdown.clone())));

    info!(
        providers = config.providers.endpoints.len(),
        "meridian service started; press ctrl-c to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| CliError::Other(e.into()))?;

    info!("shutdown requested");
    shutdown.cancel();

    for task in tasks {
        let _ = task.await;
    }

    info!("meridian service stopped");
    Ok(())
}
