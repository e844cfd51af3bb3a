//! The `questions` command: list the bias-probe question catalog.

use clap::Args;
use colored::Colorize;

use crate::error::CliError;

#[derive(Args)]
pub struct QuestionsArgs {
    /// Show full prompt text instead of a summary table
    #[arg(long)]
    pub full: bool,
}

pub async fn execute(args: QuestionsArgs) -> Result<(), CliError> {
    for question in meridian_questions::all() {
        if args.full {
            println!(
                "{} [{}]\n  {}\n",
                question.id.bold(),
                question.category,
                question.prompt
            );
        } else {
            let mut prompt = question.prompt.to_string();
            if prompt.len() > 60 {
                prompt.truncate(57);
                prompt.push_str("...");
            }
            println!("{:<24} {:<12} {}", question.id.bold(), question.category, prompt);
        }
    }

    Ok(())
}
