//! Builds the provider, store, indexer and retriever described by a [`Config`].

use std::path::Path;
use std::sync::Arc;

#[cfg(not(feature = "candle"))]
use anyhow::bail;
use anyhow::Context;
use quarry_embed::any::AnyEmbedder;
use quarry_embed::hash::HashEmbedder;
use quarry_embed::ollama::OllamaEmbedder;
use quarry_embed::openai::OpenAiEmbedder;
use quarry_embed::subprocess::SubprocessEmbedder;
use quarry_embed::{Embedder, EmbeddingOrchestrator, OrchestratorConfig};
use quarry_index::indexer::IndexerConfig;
use quarry_index::{
    CodeIndexer, CodeRetriever, CodeStore, DeltaIndexer, ParserRegistry, RetrievalConfig,
};

use crate::config::{Config, ProviderKind};

/// Construct the embedding provider selected by `config.embedding.provider`.
///
/// # Errors
///
/// Returns an error if a required setting is missing or the provider was not
/// compiled in.
pub fn create_embedder(config: &Config) -> anyhow::Result<AnyEmbedder> {
    let embedding = &config.embedding;
    let dimension = embedding.dimension;
    let provider = match embedding.provider {
        ProviderKind::Hash => AnyEmbedder::Hash(HashEmbedder::new(dimension)),
        ProviderKind::Ollama => AnyEmbedder::Ollama(OllamaEmbedder::new(
            embedding.base_url(),
            embedding.model().to_owned(),
            dimension,
        )?),
        ProviderKind::OpenAi => {
            let api_key = config
                .secrets
                .openai_api_key
                .as_ref()
                .context("QUARRY_OPENAI_API_KEY not set")?;
            AnyEmbedder::OpenAi(OpenAiEmbedder::new(
                api_key.expose().to_owned(),
                embedding.base_url().to_owned(),
                embedding.model().to_owned(),
                dimension,
            ))
        }
        ProviderKind::Subprocess => {
            let sub = embedding
                .subprocess
                .as_ref()
                .context("subprocess provider requires an [embedding.subprocess] section")?;
            AnyEmbedder::Subprocess(SubprocessEmbedder::new(
                sub.command.clone(),
                sub.args.clone(),
                sub.timeout_secs,
                dimension,
            ))
        }
        ProviderKind::Candle => create_candle(config)?,
    };
    tracing::debug!(provider = provider.name(), dimension, "embedding provider configured");
    Ok(provider)
}

#[cfg(feature = "candle")]
fn create_candle(config: &Config) -> anyhow::Result<AnyEmbedder> {
    let device = select_device(&config.embedding.device)?;
    Ok(AnyEmbedder::Candle(
        quarry_embed::candle_provider::CandleEmbedder::new(
            config.embedding.model().to_owned(),
            device,
            config.embedding.dimension,
        ),
    ))
}

#[cfg(not(feature = "candle"))]
fn create_candle(_config: &Config) -> anyhow::Result<AnyEmbedder> {
    bail!("candle provider requires building with the `candle` feature")
}

#[cfg(feature = "candle")]
pub fn select_device(preference: &str) -> anyhow::Result<quarry_embed::candle_provider::Device> {
    use quarry_embed::candle_provider::Device;

    match preference {
        "metal" => {
            #[cfg(feature = "metal")]
            return Ok(Device::new_metal(0)?);
            #[cfg(not(feature = "metal"))]
            anyhow::bail!("candle compiled without metal feature");
        }
        "cuda" => {
            #[cfg(feature = "cuda")]
            return Ok(Device::new_cuda(0)?);
            #[cfg(not(feature = "cuda"))]
            anyhow::bail!("candle compiled without cuda feature");
        }
        "auto" => {
            #[cfg(feature = "metal")]
            if let Ok(device) = Device::new_metal(0) {
                return Ok(device);
            }
            #[cfg(feature = "cuda")]
            if let Ok(device) = Device::new_cuda(0) {
                return Ok(device);
            }
            Ok(Device::Cpu)
        }
        _ => Ok(Device::Cpu),
    }
}

#[must_use]
pub fn orchestrator_config(config: &Config) -> OrchestratorConfig {
    OrchestratorConfig {
        batch_size: config.embedding.batch_size,
        concurrency: config.embedding.concurrency,
    }
}

#[must_use]
pub fn retrieval_config(config: &Config) -> RetrievalConfig {
    RetrievalConfig {
        top_k: config.retrieval.top_k,
        score_threshold: config.retrieval.score_threshold,
        keyword_score: config.retrieval.keyword_score,
        keyword_limit: config.retrieval.keyword_limit,
    }
}

/// Open the chunk store, resolving a relative path against `root`.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or migrated.
pub async fn open_store(config: &Config, root: &Path) -> anyhow::Result<CodeStore> {
    let path = &config.store.path;
    let resolved = if path == quarry_index::store::MEMORY_PATH || Path::new(path).is_absolute() {
        path.clone()
    } else {
        root.join(path).to_string_lossy().into_owned()
    };
    CodeStore::open(&resolved)
        .await
        .with_context(|| format!("failed to open chunk store at {resolved}"))
}

/// Everything a host needs to index and query one project.
pub struct Engine<P> {
    pub store: CodeStore,
    pub orchestrator: Arc<EmbeddingOrchestrator<P>>,
    pub indexer: CodeIndexer<P>,
    pub retriever: CodeRetriever<P>,
}

impl<P: Embedder> Engine<P> {
    /// Wire `provider` and `store` into an indexer and a retriever that share
    /// one orchestrator.
    #[must_use]
    pub fn new(config: &Config, provider: P, store: CodeStore) -> Self {
        let orchestrator = Arc::new(EmbeddingOrchestrator::new(
            provider,
            orchestrator_config(config),
        ));
        let delta = DeltaIndexer::new(store.clone(), Arc::clone(&orchestrator));
        let indexer = CodeIndexer::new(
            ParserRegistry::with_builtin_grammars(),
            delta,
            IndexerConfig {
                max_file_bytes: config.index.max_file_bytes,
            },
        );
        let retriever = CodeRetriever::new(
            store.clone(),
            Arc::clone(&orchestrator),
            retrieval_config(config),
        );
        Self {
            store,
            orchestrator,
            indexer,
            retriever,
        }
    }

    /// Run provider initialization. Failures are logged, not fatal: indexing
    /// still stores chunks and search still has the keyword path.
    pub async fn initialize(&self) {
        if let Err(e) = self.orchestrator.initialize().await {
            tracing::warn!(
                provider = self.orchestrator.provider().name(),
                "embedding provider failed to initialize: {e}"
            );
        }
    }

    pub async fn shutdown(&self) {
        if let Err(e) = self.orchestrator.shutdown().await {
            tracing::warn!("embedding provider shutdown failed: {e}");
        }
        self.store.close().await;
    }
}

/// Build an [`Engine`] from configuration for the project rooted at `root`.
///
/// # Errors
///
/// Returns an error if the provider cannot be constructed or the store
/// cannot be opened.
pub async fn build_engine(config: &Config, root: &Path) -> anyhow::Result<Engine<AnyEmbedder>> {
    let provider = create_embedder(config)?;
    let store = open_store(config, root).await?;
    Ok(Engine::new(config, provider, store))
}
