use anyhow::{bail, Context, Result};
use clap::Parser;

use crate::config::Config;
use crate::server;
use crate::store::JsonStore;
use crate::story::build_prompt;

pub use commands::{Commands, DataArgs, ServeArgs, StudentCommands};

mod commands;

#[derive(Parser)]
#[command(name = "storyteller", version, about = "Reading practice stories for students")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

impl ServeArgs {
    pub fn into_config(self) -> Config {
        Config {
            data_file: self.data.data_file,
            bind: self.bind,
            api_url: self.api_url,
            model: self.model,
            token_env: self.token_env,
        }
    }
}

pub async fn handle_serve(args: ServeArgs) -> Result<()> {
    let config = args.into_config();
    if config.api_token().is_none() {
        tracing::warn!(env = %config.token_env, "API token is not set; story requests will fail");
    }
    server::serve(config).await
}

pub async fn handle_students_list(data: DataArgs) -> Result<()> {
    let store = JsonStore::new(data.data_file);
    let students = store
        .load()
        .await
        .with_context(|| format!("Failed to load {}", store.path().display()))?
        .students;

    if students.is_empty() {
        println!("No students found.");
        return Ok(());
    }

    println!("Students ({}):", students.len());
    for student in students {
        println!(
            "  {} - level {}, words: {}, stories: {}",
            student.name,
            student.pm_level,
            student.focus_words.join(", "),
            student.stories.len()
        );
    }

    Ok(())
}

pub async fn handle_students_set(
    name: String,
    level: Option<u32>,
    words: Option<Vec<String>>,
    data: DataArgs,
) -> Result<()> {
    if level.is_none() && words.is_none() {
        bail!("Nothing to change: pass --level and/or --words");
    }
    let words = words.map(clean_words);
    if matches!(&words, Some(w) if w.is_empty()) {
        bail!("--words needs at least one word");
    }

    let store = JsonStore::new(data.data_file);
    let updated = store
        .update(|s| match s.find_student_mut(&name) {
            Some(student) => {
                if let Some(level) = level {
                    student.pm_level = level;
                }
                if let Some(words) = words {
                    student.focus_words = words;
                }
                (Some(student.clone()), true)
            }
            None => (None, false),
        })
        .await
        .with_context(|| format!("Failed to update {}", store.path().display()))?;

    let Some(student) = updated else {
        bail!("Student not found: {}", name);
    };

    println!(
        "Updated {}: level {}, words: {}",
        student.name,
        student.pm_level,
        student.focus_words.join(", ")
    );
    Ok(())
}

pub fn handle_prompt(level: u32, words: Vec<String>, theme: String, word_count: u32) -> Result<()> {
    println!("{}", build_prompt(level, &clean_words(words), &theme, word_count));
    Ok(())
}

fn clean_words(words: Vec<String>) -> Vec<String> {
    words
        .into_iter()
        .map(|w| w.trim().to_string())
        .filter(|w| !w.is_empty())
        .collect()
}
