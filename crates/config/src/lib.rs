//! Configuration loading, validation, and management for Lorebook.
//!
//! Loads configuration from `~/.lorebook/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.lorebook/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the completion/embedding endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Completion / embedding endpoint configuration
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Knowledge retrieval configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Conversation context configuration
    #[serde(default)]
    pub chat: ChatConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Transcript log configuration
    #[serde(default)]
    pub transcript: TranscriptConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("provider", &self.provider)
            .field("retrieval", &self.retrieval)
            .field("chat", &self.chat)
            .field("gateway", &self.gateway)
            .field("transcript", &self.transcript)
            .finish()
    }
}

/// Completion / embedding endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the OpenAI-compatible endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Chat model
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per reply
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Completion call timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_request_timeout() -> u64 {
    60
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Knowledge retrieval settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Vector search backend URL
    #[serde(default = "default_index_url")]
    pub index_url: String,

    /// Vector search backend token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_token: Option<String>,

    /// Collection to search
    #[serde(default = "default_collection")]
    pub collection: String,

    /// How many nearest neighbors to request
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Embedding model
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Embedding dimension (must match the collection's index)
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,

    /// Retrieval timeout (embedding + search) in seconds
    #[serde(default = "default_retrieval_timeout")]
    pub timeout_secs: u64,
}

fn default_index_url() -> String {
    "http://localhost:19530".into()
}
fn default_collection() -> String {
    "lorebook".into()
}
fn default_top_k() -> usize {
    5
}
fn default_embedding_model() -> String {
    "text-embedding-3-large".into()
}
fn default_embedding_dimension() -> usize {
    3072
}
fn default_retrieval_timeout() -> u64 {
    15
}

impl std::fmt::Debug for RetrievalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalConfig")
            .field("index_url", &self.index_url)
            .field("index_token", &redact(&self.index_token))
            .field("collection", &self.collection)
            .field("top_k", &self.top_k)
            .field("embedding_model", &self.embedding_model)
            .field("embedding_dimension", &self.embedding_dimension)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            index_url: default_index_url(),
            index_token: None,
            collection: default_collection(),
            top_k: default_top_k(),
            embedding_model: default_embedding_model(),
            embedding_dimension: default_embedding_dimension(),
            timeout_secs: default_retrieval_timeout(),
        }
    }
}

/// Conversation context settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// The system message seeded into every new conversation
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Context budget: total characters across a history's messages
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,

    /// Prompt template path; omit to use the built-in template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_path: Option<PathBuf>,

    /// When false, skip the model call on empty retrieval and reply with the
    /// no-knowledge phrase directly
    #[serde(default = "default_true")]
    pub reply_without_knowledge: bool,
}

fn default_system_prompt() -> String {
    "You are a precise question-answering assistant. Ground every answer in \
     the knowledge provided to you."
        .into()
}
fn default_max_context_chars() -> usize {
    4096
}
fn default_true() -> bool {
    true
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            max_context_chars: default_max_context_chars(),
            template_path: None,
            reply_without_knowledge: true,
        }
    }
}

/// Gateway settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Bearer tokens accepted on /v1 routes. Empty list disables auth
    /// (development mode; logged loudly at startup).
    #[serde(default)]
    pub api_tokens: Vec<String>,

    /// Requests per minute per client before 429
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: usize,
}

fn default_port() -> u16 {
    8307
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_rate_limit() -> usize {
    60
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("port", &self.port)
            .field("host", &self.host)
            .field("api_tokens", &format!("[{} token(s)]", self.api_tokens.len()))
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .finish()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            api_tokens: vec![],
            rate_limit_per_minute: default_rate_limit(),
        }
    }
}

/// Transcript log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptConfig {
    #[serde(default)]
    pub enabled: bool,

    /// SQLite database path; defaults to `~/.lorebook/transcript.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            db_path: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.lorebook/config.toml).
    ///
    /// Also checks environment variables for overrides:
    /// - `LOREBOOK_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `LOREBOOK_MODEL` overrides the chat model
    /// - `LOREBOOK_INDEX_URL` overrides the vector backend URL
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("LOREBOOK_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("LOREBOOK_MODEL") {
            config.provider.model = model;
        }

        if let Ok(url) = std::env::var("LOREBOOK_INDEX_URL") {
            config.retrieval.index_url = url;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".lorebook")
    }

    /// Resolved transcript database path.
    pub fn transcript_db_path(&self) -> PathBuf {
        self.transcript
            .db_path
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("transcript.db"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.temperature < 0.0 || self.provider.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.retrieval.top_k == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.top_k must be at least 1".into(),
            ));
        }

        if self.retrieval.embedding_dimension == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.embedding_dimension must be positive".into(),
            ));
        }

        if self.chat.max_context_chars == 0 {
            return Err(ConfigError::ValidationError(
                "chat.max_context_chars must be positive".into(),
            ));
        }

        if self.chat.system_prompt.chars().count() > self.chat.max_context_chars {
            return Err(ConfigError::ValidationError(
                "chat.system_prompt alone exceeds chat.max_context_chars".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard`).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider: ProviderConfig::default(),
            retrieval: RetrievalConfig::default(),
            chat: ChatConfig::default(),
            gateway: GatewayConfig::default(),
            transcript: TranscriptConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
