use clap::{Parser, Subcommand};
use std::process;

mod commands;
mod error;

use commands::{cancel, config, executions, migrate, questions, serve, status};
use error::CliError;

/// Meridian - distributed bias-probe inference orchestration
#[derive(Parser)]
#[command(name = "meridian")]
#[command(author = "Meridian Contributors")]
#[command(version)]
#[command(about = "Operator CLI for the Meridian orchestration service", long_about = None)]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestration service (publisher, runner, schedulers)
    Serve(serve::ServeArgs),

    /// Apply database migrations and exit
    Migrate(migrate::MigrateArgs),

    /// Show a job's status and execution counters
    Status(status::StatusArgs),

    /// List a job's executions
    Executions(executions::ExecutionsArgs),

    /// Cancel a non-terminal job
    Cancel(cancel::CancelArgs),

    /// List the bias-probe question catalog
    Questions(questions::QuestionsArgs),

    /// Configuration management commands
    #[command(subcommand)]
    Config(config::ConfigCommands),

    /// Generate shell completions
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let result: Result<(), CliError> = match cli.command {
        Commands::Serve(args) => serve::execute(args).await,
        Commands::Migrate(args) => migrate::execute(args).await,
        Commands::Status(args) => status::execute(args).await,
        Commands::Executions(args) => executions::execute(args).await,
        Commands::Cancel(args) => cancel::execute(args).await,
        Commands::Questions(args) => questions::execute(args).await,
        Commands::Config(cmd) => config::execute(cmd).await,
        Commands::Completions { shell } => {
            generate_completions(shell);
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        if cli.verbose {
            let mut source = std::error::Error::source(&e);
            if source.is_some() {
                eprintln!("\nCaused by:");
            }
            while let Some(cause) = source {
                eprintln!("  {}", cause);
                source = cause.source();
            }
        }
        process::exit(e.exit_code());
    }
}

fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, bin_name, &mut io::stdout());
}
