//! TOML configuration parsing and validation.
//!
//! Every section has defaults matching the public Jikan API and OpenAI
//! services, so `Config::default()` is a complete working configuration.
//! A file passed with `--config` is parsed with [`load_config`], which
//! applies the same defaults to any section or key it omits.
//!
//! Credentials are not part of the file. They are resolved once at startup
//! into [`Credentials`] and handed to the client constructors.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Lowest inter-page delay the Jikan API tolerates.
pub const MIN_REQUEST_DELAY_MS: u64 = 1000;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_page_count")]
    pub page_count: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            page_count: default_page_count(),
            page_size: default_page_size(),
            request_delay_ms: default_request_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl CatalogConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

fn default_endpoint() -> String {
    "https://api.jikan.moe/v4/top/anime".to_string()
}
fn default_page_count() -> u32 {
    4
}
fn default_page_size() -> u32 {
    25
}
fn default_request_delay_ms() -> u64 {
    MIN_REQUEST_DELAY_MS
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/anime-index.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: Option<String>,
    #[serde(default = "default_embedding_dims")]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL override (Ollama host or an OpenAI-compatible gateway).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dims: default_embedding_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> Option<String> {
    Some("text-embedding-3-small".to_string())
}
fn default_embedding_dims() -> Option<usize> {
    Some(1536)
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_provider")]
    pub provider: String,
    #[serde(default = "default_completion_model")]
    pub model: String,
    #[serde(default = "default_completion_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_completion_provider(),
            model: default_completion_model(),
            max_retries: default_completion_retries(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_completion_timeout_secs(),
            url: None,
        }
    }
}

fn default_completion_provider() -> String {
    "openai".to_string()
}
fn default_completion_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_completion_retries() -> u32 {
    1
}
fn default_max_tokens() -> u32 {
    512
}
fn default_completion_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConversationConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_exit_token")]
    pub exit_token: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            exit_token: default_exit_token(),
        }
    }
}

fn default_max_turns() -> usize {
    10
}
fn default_exit_token() -> String {
    "exit".to_string()
}

/// Secrets resolved once at startup.
#[derive(Clone, Default)]
pub struct Credentials {
    pub openai_api_key: Option<String>,
}

impl Credentials {
    /// Read credentials from the process environment.
    pub fn from_env() -> Self {
        Self {
            openai_api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field(
                "openai_api_key",
                &self.openai_api_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Catalog
    if config.catalog.page_count == 0 {
        anyhow::bail!("catalog.page_count must be >= 1");
    }
    if config.catalog.page_size == 0 {
        anyhow::bail!("catalog.page_size must be >= 1");
    }
    if config.catalog.request_delay_ms < MIN_REQUEST_DELAY_MS {
        anyhow::bail!(
            "catalog.request_delay_ms must be >= {} (upstream rate limit)",
            MIN_REQUEST_DELAY_MS
        );
    }

    // Retrieval and conversation
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.conversation.max_turns == 0 {
        anyhow::bail!("conversation.max_turns must be >= 1");
    }

    // Embedding
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.provider == "openai" || config.embedding.provider == "ollama" {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    // Completion
    match config.completion.provider.as_str() {
        "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown completion provider: '{}'. Must be openai or ollama.",
            other
        ),
    }
    if config.completion.model.trim().is_empty() {
        anyhow::bail!("completion.model must not be empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<Config> {
        let config: Config = toml::from_str(content)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.catalog.page_count, 4);
        assert_eq!(config.catalog.page_size, 25);
        assert_eq!(config.catalog.request_delay(), Duration::from_secs(1));
        assert_eq!(config.retrieval.top_k, 10);
        assert_eq!(config.conversation.max_turns, 10);
        assert_eq!(config.conversation.exit_token, "exit");
        assert_eq!(config.completion.model, "gpt-3.5-turbo");
        assert_eq!(config.completion.max_retries, 1);
        assert!(config.embedding.is_enabled());
    }

    #[test]
    fn default_config_is_valid() {
        validate(&Config::default()).unwrap();
    }

    #[test]
    fn example_config_parses() {
        let config = parse(include_str!("../config/anime-chat.example.toml")).unwrap();
        assert_eq!(config.catalog.endpoint, "https://api.jikan.moe/v4/top/anime");
        assert_eq!(config.embedding.dims, Some(1536));
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config = parse(
            r#"
[catalog]
page_count = 2

[index]
path = "/tmp/custom.sqlite"
"#,
        )
        .unwrap();
        assert_eq!(config.catalog.page_count, 2);
        assert_eq!(config.catalog.page_size, 25);
        assert_eq!(config.index.path, PathBuf::from("/tmp/custom.sqlite"));
    }

    #[test]
    fn rejects_delay_below_rate_limit() {
        let err = parse("[catalog]\nrequest_delay_ms = 250\n").unwrap_err();
        assert!(err.to_string().contains("request_delay_ms"));
    }

    #[test]
    fn rejects_zero_pages_and_turns() {
        assert!(parse("[catalog]\npage_count = 0\n").is_err());
        assert!(parse("[conversation]\nmax_turns = 0\n").is_err());
        assert!(parse("[retrieval]\ntop_k = 0\n").is_err());
    }

    #[test]
    fn rejects_unknown_providers() {
        assert!(parse("[embedding]\nprovider = \"magic\"\n").is_err());
        assert!(parse("[completion]\nprovider = \"magic\"\n").is_err());
    }

    #[test]
    fn load_config_reports_missing_file() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = Credentials {
            openai_api_key: Some("sk-secret".to_string()),
        };
        let dbg = format!("{:?}", creds);
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("redacted"));
    }
}
