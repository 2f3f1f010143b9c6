use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_DATA_FILE: &str = "data.json";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_API_URL: &str = "https://api.deepinfra.com/v1/openai/chat/completions";
pub const DEFAULT_MODEL: &str = "deepseek-ai/DeepSeek-R1-Distill-Qwen-32B";
pub const DEFAULT_TOKEN_ENV: &str = "DEEPINFRA_TOKEN";

#[derive(Debug, Clone)]
pub struct Config {
    pub data_file: PathBuf,
    pub bind: SocketAddr,
    pub api_url: String,
    pub model: String,
    /// Name of the environment variable holding the API bearer token.
    pub token_env: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from(DEFAULT_DATA_FILE),
            bind: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            api_url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            token_env: DEFAULT_TOKEN_ENV.to_string(),
        }
    }
}

impl Config {
    /// Bearer token for the completion API, read at call time.
    /// Unset and empty both count as absent.
    pub fn api_token(&self) -> Option<String> {
        std::env::var(&self.token_env)
            .ok()
            .filter(|key| !key.is_empty())
    }
}
