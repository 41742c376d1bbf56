use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

pub const PLACEHOLDER_API_KEY: &str = "PLACEHOLDER_OPENAI_API_KEY";

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
Role:
You are a sales assistant for a beauty product catalog.

Tone:
Friendly and concise.

Rules:
1. Talk with the user normally. Only draw on the Latest Context when the user input needs it; otherwise ignore it.
2. Only when the user asks for a recommendation, suggest a product from the Latest Context and personalise it to what they told you.
3. If the Latest Context does not answer the question, use the earlier conversation. Otherwise ask the user which product they mean and what they want to know about it.";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub completion: CompletionConfig,
    pub session: SessionConfig,
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    /// Whole-request deadline, streamed body included. Unset by default so
    /// long answers are never cut off.
    #[serde(default)]
    pub request_timeout_seconds: Option<u64>,
    /// Longest gap allowed between two reads of the response body.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_seconds: Option<u64>,
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Trailing memory entries included in each prompt (user + assistant pairs).
    pub memory_window: usize,
    pub system_prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub enabled: bool,
    pub top_k: usize,
    /// Similarity score threshold for filtering search results (0.0-1.0)
    #[serde(default)]
    pub similarity_threshold: Option<f32>,
    pub embedding_model: String,
    /// Newline-delimited documents loaded into the index at startup
    #[serde(default)]
    pub documents_path: Option<String>,
}

impl Config {
    /// Load configuration from file with environment variable overrides.
    /// Always returns a usable config; problems are logged.
    pub fn load() -> Self {
        let mut env_loaded = false;
        for path in [".env", "../.env"] {
            if dotenvy::from_path(path).is_ok() {
                tracing::info!("Loaded .env from: {}", path);
                env_loaded = true;
                break;
            }
        }
        if !env_loaded {
            tracing::debug!("No .env file found - continuing with env vars only");
        }

        let config_path =
            env::var("CHAT_CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            match fs::read_to_string(&config_path) {
                Ok(contents) => Self::from_yaml(&contents).unwrap_or_else(|e| {
                    tracing::error!(
                        "Failed to parse config file {}: {} - using defaults",
                        config_path,
                        e
                    );
                    Self::default()
                }),
                Err(e) => {
                    tracing::error!(
                        "Failed to read config file {}: {} - using defaults",
                        config_path,
                        e
                    );
                    Self::default()
                }
            }
        } else {
            tracing::info!("Config file not found at {} - using defaults", config_path);
            Self::default()
        };

        config.apply_env_overrides();

        if let Err(e) = config.validate() {
            tracing::warn!("Config validation warnings: {} - continuing anyway", e);
        }

        config
    }

    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        let config = serde_yaml::from_str::<Config>(contents)?;
        tracing::info!("Loaded configuration from YAML");
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Completion overrides
        if let Some(api_key) = lookup("OPENAI_API_KEY") {
            self.completion.api_key = api_key;
        }
        if let Some(url) = lookup("CHAT_API_URL") {
            self.completion.api_url = url;
        }
        if let Some(model) = lookup("CHAT_MODEL") {
            self.completion.model = model;
        }
        if let Some(temperature) = lookup("CHAT_TEMPERATURE") {
            if let Ok(t) = temperature.parse() {
                self.completion.temperature = t;
            }
        }
        if let Some(timeout) = lookup("CHAT_REQUEST_TIMEOUT_SECONDS") {
            if let Ok(secs) = timeout.parse() {
                self.completion.request_timeout_seconds = Some(secs);
            }
        }
        if let Some(timeout) = lookup("CHAT_READ_TIMEOUT_SECONDS") {
            if let Ok(secs) = timeout.parse() {
                self.completion.read_timeout_seconds = Some(secs);
            }
        }

        // Session overrides
        if let Some(window) = lookup("CHAT_MEMORY_WINDOW") {
            if let Ok(n) = window.parse() {
                self.session.memory_window = n;
            }
        }
        if let Some(prompt) = lookup("CHAT_SYSTEM_PROMPT") {
            self.session.system_prompt = prompt;
        }

        // Retrieval overrides
        if let Some(top_k) = lookup("CHAT_RETRIEVAL_TOP_K") {
            if let Ok(k) = top_k.parse() {
                self.retrieval.top_k = k;
            }
        }
        if let Some(threshold) = lookup("CHAT_SIMILARITY_THRESHOLD") {
            if let Ok(t) = threshold.parse() {
                self.retrieval.similarity_threshold = Some(t);
            }
        }
        if let Some(path) = lookup("CHAT_DOCUMENTS_PATH") {
            self.retrieval.documents_path = Some(path);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.completion.api_key.is_empty() || self.completion.api_key == PLACEHOLDER_API_KEY {
            return Err("OPENAI_API_KEY environment variable must be set".into());
        }
        if !(0.0..=2.0).contains(&self.completion.temperature) {
            return Err("Temperature must be between 0.0 and 2.0".into());
        }
        if self.session.memory_window == 0 || self.session.memory_window % 2 != 0 {
            return Err("Memory window must be a positive, even number of entries".into());
        }
        if let Some(threshold) = self.retrieval.similarity_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err("Similarity threshold must be between 0.0 and 1.0".into());
            }
        }
        if self.retrieval.enabled && self.retrieval.top_k == 0 {
            return Err("Retrieval top_k cannot be 0 when retrieval is enabled".into());
        }
        Ok(())
    }
}

fn default_read_timeout() -> Option<u64> {
    Some(60)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            completion: CompletionConfig {
                api_url: "https://api.openai.com/v1/chat/completions".to_string(),
                api_key: PLACEHOLDER_API_KEY.to_string(),
                model: "gpt-4-0125-preview".to_string(),
                temperature: 0.5,
                request_timeout_seconds: None,
                read_timeout_seconds: default_read_timeout(),
                connect_timeout_seconds: 10,
            },
            session: SessionConfig {
                memory_window: 6,
                system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            },
            retrieval: RetrievalConfig {
                enabled: true,
                top_k: 3,
                similarity_threshold: None,
                embedding_model: "text-embedding-3-small".to_string(),
                documents_path: None,
            },
        }
    }
}
