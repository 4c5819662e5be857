mod env;
mod types;


pub use types::*;

use std::path::Path;

use anyhow::{Context, bail};

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the resulting configuration is invalid.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the indexer or retriever misbehave.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.store.path.trim().is_empty() {
            bail!("store.path must not be empty");
        }
        let embedding = &self.embedding;
        if embedding.dimension == 0 {
            bail!("embedding.dimension must be greater than 0");
        }
        if embedding.batch_size == 0 {
            bail!("embedding.batch_size must be greater than 0");
        }
        if embedding.concurrency == 0 {
            bail!("embedding.concurrency must be greater than 0");
        }
        match embedding.provider {
            ProviderKind::OpenAi if self.secrets.openai_api_key.is_none() => {
                bail!("openai provider requires QUARRY_OPENAI_API_KEY");
            }
            ProviderKind::Subprocess => match &embedding.subprocess {
                Some(sub) if sub.command.trim().is_empty() => {
                    bail!("embedding.subprocess.command must not be empty");
                }
                Some(sub) if sub.timeout_secs == 0 => {
                    bail!("embedding.subprocess.timeout_secs must be greater than 0");
                }
                Some(_) => {}
                None => bail!("subprocess provider requires an [embedding.subprocess] section"),
            },
            ProviderKind::Candle
                if !matches!(embedding.device.as_str(), "cpu" | "cuda" | "metal" | "auto") =>
            {
                bail!(
                    "embedding.device must be one of cpu, cuda, metal, auto (got {})",
                    embedding.device
                );
            }
            _ => {}
        }
        let retrieval = &self.retrieval;
        if retrieval.top_k == 0 {
            bail!("retrieval.top_k must be greater than 0");
        }
        if retrieval.keyword_limit == 0 {
            bail!("retrieval.keyword_limit must be greater than 0");
        }
        if !(0.0..=1.0).contains(&retrieval.score_threshold) {
            bail!("retrieval.score_threshold must be within 0.0..=1.0");
        }
        Ok(())
    }
}
