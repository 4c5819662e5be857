use std::fmt;

use serde::{Deserialize, Serialize};

/// A secret string that never shows up in `Debug` or `Display` output.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalSection,
    #[serde(skip)]
    pub secrets: ResolvedSecrets,
}

#[derive(Debug, Default)]
pub struct ResolvedSecrets {
    pub openai_api_key: Option<Secret>,
}

fn default_store_path() -> String {
    ".quarry/index.db".into()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StoreConfig {
    /// `":memory:"` keeps the index in RAM for the lifetime of the process.
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Embedding backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Hash,
    Ollama,
    OpenAi,
    Subprocess,
    Candle,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hash => "hash",
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
            Self::Subprocess => "subprocess",
            Self::Candle => "candle",
        }
    }

    #[must_use]
    pub fn default_model(self) -> &'static str {
        match self {
            Self::Hash | Self::Subprocess => "",
            Self::Ollama => "nomic-embed-text",
            Self::OpenAi => "text-embedding-3-small",
            Self::Candle => "sentence-transformers/all-MiniLM-L6-v2",
        }
    }

    #[must_use]
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            _ => "http://localhost:11434",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_dimension() -> usize {
    quarry_embed::hash::DEFAULT_DIMENSION
}

fn default_batch_size() -> usize {
    quarry_embed::orchestrator::DEFAULT_BATCH_SIZE
}

fn default_concurrency() -> usize {
    quarry_embed::orchestrator::DEFAULT_CONCURRENCY
}

fn default_device() -> String {
    "cpu".into()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    /// Model name; falls back to a per-provider default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Candle device: `cpu`, `cuda`, `metal` or `auto`.
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subprocess: Option<SubprocessConfig>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: None,
            base_url: None,
            dimension: default_dimension(),
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            device: default_device(),
            subprocess: None,
        }
    }
}

impl EmbeddingConfig {
    #[must_use]
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
    }
}

fn default_subprocess_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubprocessConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_subprocess_timeout")]
    pub timeout_secs: u64,
}

fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

#[derive(Debug, Deserialize, Serialize)]
pub struct IndexConfig {
    /// Files larger than this are skipped.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

fn default_score_threshold() -> f32 {
    0.3
}

fn default_keyword_score() -> f32 {
    0.1
}

fn default_keyword_limit() -> usize {
    quarry_index::store::DEFAULT_KEYWORD_LIMIT
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RetrievalSection {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    #[serde(default = "default_keyword_score")]
    pub keyword_score: f32,
    #[serde(default = "default_keyword_limit")]
    pub keyword_limit: usize,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            score_threshold: default_score_threshold(),
            keyword_score: default_keyword_score(),
            keyword_limit: default_keyword_limit(),
        }
    }
}
