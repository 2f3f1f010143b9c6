// main.rs
mod cli;
mod config;
mod error;
mod model;
mod server;
mod session;
mod store;
mod story;
mod views;

use clap::Parser;
use cli::{Args, Commands, StudentCommands};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "storyteller=info,tower_http=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Serve(serve) => cli::handle_serve(serve).await,
        Commands::Students { command } => match command {
            StudentCommands::List { data } => cli::handle_students_list(data).await,
            StudentCommands::Set {
                name,
                level,
                words,
                data,
            } => cli::handle_students_set(name, level, words, data).await,
        },
        Commands::Prompt {
            level,
            words,
            theme,
            word_count,
        } => cli::handle_prompt(level, words, theme, word_count),
    }
}
