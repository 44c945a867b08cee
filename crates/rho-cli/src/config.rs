//! Configuration file support

use rho_chat::UserTurnPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV_VAR: &str = "RHO_CONFIG_PATH";

/// Configuration for rho. Every field is optional; unset fields fall back
/// to built-in defaults, and CLI flags override both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model identifier
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    /// Stream responses as they are generated
    pub stream: Option<bool>,
    /// File holding the bearer token
    pub api_key_file: Option<PathBuf>,
    /// Endpoint root, e.g. https://api.openai.com/v1
    pub base_url: Option<String>,
    /// Deadline for one request, in seconds
    pub timeout_secs: Option<u64>,
    /// When the user's side of a turn enters history
    pub user_turn_policy: Option<UserTurnPolicy>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rho")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV_VAR) {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from the default location
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`; a missing or unusable file yields defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file");
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), "failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }
        Self::starter().save_to(&path)?;
        Ok(path)
    }

    /// The values written by `--init-config`
    pub fn starter() -> Self {
        let params = rho_ai::RequestParameters::default();
        Config {
            model: Some(params.model),
            max_tokens: Some(params.max_tokens),
            temperature: Some(params.temperature),
            top_p: Some(params.top_p),
            stream: Some(params.stream),
            api_key_file: None,
            base_url: Some(rho_ai::client::DEFAULT_BASE_URL.to_string()),
            timeout_secs: Some(rho_ai::client::DEFAULT_TIMEOUT.as_secs()),
            user_turn_policy: Some(UserTurnPolicy::default()),
        }
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# rho configuration file
# Place at ~/.config/rho/config.toml (Linux), ~/Library/Application Support/rho/config.toml (Mac)
# or %APPDATA%\rho\config.toml (Windows). RHO_CONFIG_PATH overrides the location.

# Model identifier
model = "gpt-3.5-turbo"

# Generation parameters
max_tokens = 500
temperature = 0.8
top_p = 0.9

# Print the reply as it is generated (false waits for the full response)
stream = true

# File holding the API key. Without it, ./api_key.txt and then
# OPENAI_API_KEY are tried.
# api_key_file = "~/.config/rho/api_key.txt"

# Any OpenAI-compatible endpoint
base_url = "https://api.openai.com/v1"
timeout_secs = 60

# When your message enters the history: "on_completion" (only if the reply
# arrives) or "on_dispatch" (as soon as the request is accepted)
user_turn_policy = "on_completion"
"#
}
