//! StudyKit CLI — document analysis and adaptive quizzes.
//!
//! Sends a document through the summary, knowledge-graph and topic stages of
//! the reasoning service, then quizzes the user on a chosen topic.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
