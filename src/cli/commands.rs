use clap::Subcommand;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::config::{
    DEFAULT_API_URL, DEFAULT_DATA_FILE, DEFAULT_MODEL, DEFAULT_PORT, DEFAULT_TOKEN_ENV,
};

#[derive(Subcommand)]
pub enum Commands {
    /// Run the web app
    Serve(ServeArgs),
    /// Inspect or edit student records offline
    Students {
        #[command(subcommand)]
        command: StudentCommands,
    },
    /// Print the prompt that would be sent for a story
    Prompt {
        /// Reading level
        #[arg(long, default_value_t = crate::model::DEFAULT_PM_LEVEL)]
        level: u32,
        /// Focus words, comma separated
        #[arg(long, value_delimiter = ',', default_value = "happy,friend,school")]
        words: Vec<String>,
        /// Story theme
        #[arg(long)]
        theme: String,
        /// Target length in words
        #[arg(long, default_value = "100")]
        word_count: u32,
    },
}

#[derive(clap::Args)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "STORYTELLER_BIND", default_value_t = SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))]
    pub bind: SocketAddr,
    #[command(flatten)]
    pub data: DataArgs,
    /// Chat completions endpoint
    #[arg(long, env = "STORYTELLER_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,
    /// Model identifier sent with each request
    #[arg(long, env = "STORYTELLER_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,
    /// Environment variable holding the API token
    #[arg(long, default_value = DEFAULT_TOKEN_ENV)]
    pub token_env: String,
}

#[derive(clap::Args)]
pub struct DataArgs {
    /// Student data file
    #[arg(long, env = "STORYTELLER_DATA", default_value = DEFAULT_DATA_FILE)]
    pub data_file: PathBuf,
}

#[derive(Subcommand)]
pub enum StudentCommands {
    /// List students with their level, words and story count
    List {
        #[command(flatten)]
        data: DataArgs,
    },
    /// Change an existing student's reading level or focus words
    Set {
        /// Student name (exact match)
        name: String,
        /// New reading level
        #[arg(long)]
        level: Option<u32>,
        /// New focus words, comma separated
        #[arg(long, value_delimiter = ',')]
        words: Option<Vec<String>>,
        #[command(flatten)]
        data: DataArgs,
    },
}
