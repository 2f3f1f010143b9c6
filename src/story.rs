use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::Config;
use crate::error::GenerationError;

/// Story text handed to the caller whenever generation fails.
pub const FALLBACK_STORY: &str = "Error generating story. Please try again.";

/// Prompt for one story. Words are joined with ", " and every input is
/// embedded verbatim.
pub fn build_prompt(pm_level: u32, focus_words: &[String], theme: &str, word_count: u32) -> String {
    format!(
        "Write a {}-word story for a Level {} reader using these words: {}. \
         Use theme: {}. Include a title at the start. \
         Strictly follow PM Level {} vocabulary and grammar.",
        word_count,
        pm_level,
        focus_words.join(", "),
        theme,
        pm_level
    )
}

/// Something that turns a prompt into generated text.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// OpenAI-compatible chat completions endpoint.
pub struct ChatCompletionsClient {
    client: Client,
    config: Config,
}

impl ChatCompletionsClient {
    pub fn new(config: Config) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl CompletionBackend for ChatCompletionsClient {
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let mut request = self.client.post(&self.config.api_url).json(&body);
        match self.config.api_token() {
            Some(token) => request = request.bearer_auth(token),
            None => tracing::warn!(
                env = %self.config.token_env,
                "API token not set, sending unauthenticated request"
            ),
        }

        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| GenerationError::MalformedResponse("no message content".to_string()))
    }
}

/// Writes stories through a backend. Never fails: any backend error is
/// logged and replaced by `FALLBACK_STORY`.
#[derive(Clone)]
pub struct StoryGenerator {
    backend: Arc<dyn CompletionBackend>,
}

impl StoryGenerator {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self { backend }
    }

    pub async fn generate(
        &self,
        pm_level: u32,
        focus_words: &[String],
        theme: &str,
        word_count: u32,
    ) -> String {
        let prompt = build_prompt(pm_level, focus_words, theme, word_count);
        tracing::debug!(%prompt, "requesting story");

        match self.backend.complete(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "story generation failed");
                FALLBACK_STORY.to_string()
            }
        }
    }
}
