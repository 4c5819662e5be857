//! Batched, fault-tolerant embedding over any [`Embedder`].
//!
//! Texts are split into consecutive batches of at most `batch_size`. A batch
//! is sent in one `embed_batch` call when the provider supports it; when that
//! call fails (or replies with the wrong number of vectors) the batch is
//! retried one text at a time with at most `concurrency` requests in flight.
//! [`EmbeddingOrchestrator::try_embed_batch`] reports a text that still fails
//! as `None`; [`EmbeddingOrchestrator::embed_many`] substitutes an all-zero
//! vector, so its output is always aligned with the input.

use futures::StreamExt;

use crate::error::EmbedError;
use crate::provider::{Embedder, zero_vector};

pub const DEFAULT_BATCH_SIZE: usize = 32;
pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub batch_size: usize,
    pub concurrency: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingOrchestrator<P> {
    provider: P,
    config: OrchestratorConfig,
}

impl<P: Embedder> EmbeddingOrchestrator<P> {
    #[must_use]
    pub fn new(provider: P, config: OrchestratorConfig) -> Self {
        Self {
            provider,
            config: OrchestratorConfig {
                batch_size: config.batch_size.max(1),
                concurrency: config.concurrency.max(1),
            },
        }
    }

    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// # Errors
    ///
    /// Propagates the provider's initialization failure.
    pub async fn initialize(&self) -> Result<(), EmbedError> {
        self.provider.initialize().await?;
        tracing::info!(
            provider = self.provider.name(),
            dimension = self.provider.dimension(),
            batch = self.provider.supports_batch(),
            "embedding provider ready"
        );
        Ok(())
    }

    /// # Errors
    ///
    /// Propagates the provider's shutdown failure.
    pub async fn shutdown(&self) -> Result<(), EmbedError> {
        self.provider.shutdown().await
    }

    /// Embed a single query text, surfacing any provider error.
    ///
    /// # Errors
    ///
    /// Returns the provider error, or [`EmbedError::Other`] for an empty vector.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let vector = self.provider.embed(text).await?;
        if vector.is_empty() {
            return Err(EmbedError::Other(format!(
                "{} returned an empty query vector",
                self.provider.name()
            )));
        }
        Ok(vector)
    }

    /// Embed every text; the result has exactly one vector per input, in order.
    pub async fn embed_many(&self, texts: &[String]) -> Vec<Vec<f32>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size) {
            match self.try_embed_batch(batch).await {
                Ok(outcomes) => {
                    let dim = self.provider.dimension();
                    out.extend(
                        outcomes
                            .into_iter()
                            .map(|v| v.unwrap_or_else(|| zero_vector(dim))),
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        provider = self.provider.name(),
                        size = batch.len(),
                        "embedding batch failed entirely, using zero vectors: {e}"
                    );
                    let dim = self.provider.dimension();
                    out.extend(batch.iter().map(|_| zero_vector(dim)));
                }
            }
        }
        out
    }

    /// Embed one batch, reporting each item's outcome in input order. `None`
    /// marks an item the provider failed to embed; a vector the provider
    /// returned is passed through as-is, even when it is all zeros.
    ///
    /// # Errors
    ///
    /// Returns the last provider error when no item of a non-empty batch could
    /// be embedded.
    pub async fn try_embed_batch(
        &self,
        texts: &[String],
    ) -> Result<Vec<Option<Vec<f32>>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        if self.provider.supports_batch() {
            match self.provider.embed_batch(texts).await {
                Ok(vectors) if vectors.len() == texts.len() => {
                    return Ok(vectors.into_iter().map(Some).collect());
                }
                Ok(vectors) => tracing::warn!(
                    provider = self.provider.name(),
                    expected = texts.len(),
                    got = vectors.len(),
                    "batch reply misaligned, falling back to per-item embedding"
                ),
                Err(e) => tracing::warn!(
                    provider = self.provider.name(),
                    "batch embedding failed, falling back to per-item embedding: {e}"
                ),
            }
        }

        // Collected eagerly so the returned future stays `Send` for callers
        // that spawn it (works around higher-ranked closure inference).
        let pending: Vec<_> = texts.iter().map(|t| self.provider.embed(t)).collect();
        let results: Vec<Result<Vec<f32>, EmbedError>> =
            futures::stream::iter(pending)
                .buffered(self.config.concurrency)
                .collect()
                .await;

        let mut last_error = None;
        let mut failed = 0usize;
        let outcomes: Vec<Option<Vec<f32>>> = results
            .into_iter()
            .map(|r| match r {
                Ok(v) => Some(v),
                Err(e) => {
                    failed += 1;
                    last_error = Some(e);
                    None
                }
            })
            .collect();

        if failed == texts.len()
            && let Some(e) = last_error
        {
            return Err(e);
        }
        if failed > 0 {
            tracing::warn!(
                provider = self.provider.name(),
                failed,
                total = texts.len(),
                "some texts could not be embedded"
            );
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    /// Vector `[len, 1.0]` per text; fails on texts starting with `!`.
    #[derive(Default)]
    struct Scripted {
        batch: bool,
        batch_fails: bool,
        batch_drops_one: bool,
        embed_calls: AtomicUsize,
        batch_calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl Scripted {
        fn vector(text: &str) -> Vec<f32> {
            #[allow(clippy::cast_precision_loss)]
            vec![text.len() as f32, 1.0]
        }
    }

    impl Embedder for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn dimension(&self) -> usize {
            2
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            self.embed_calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if text.starts_with('!') {
                return Err(EmbedError::Other("scripted failure".into()));
            }
            Ok(Self::vector(text))
        }

        fn supports_batch(&self) -> bool {
            self.batch
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            if self.batch_fails {
                return Err(EmbedError::Other("scripted batch failure".into()));
            }
            let mut out: Vec<_> = texts.iter().map(|t| Self::vector(t)).collect();
            if self.batch_drops_one {
                out.pop();
            }
            Ok(out)
        }
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    fn orchestrator(p: Scripted, batch_size: usize) -> EmbeddingOrchestrator<Scripted> {
        EmbeddingOrchestrator::new(
            p,
            OrchestratorConfig {
                batch_size,
                concurrency: 2,
            },
        )
    }

    #[tokio::test]
    async fn empty_input_yields_empty_output() {
        let o = orchestrator(Scripted::default(), 4);
        assert!(o.embed_many(&[]).await.is_empty());
        assert_eq!(o.provider().embed_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn native_batch_used_once_per_batch() {
        let o = orchestrator(
            Scripted {
                batch: true,
                ..Scripted::default()
            },
            2,
        );
        let out = o.embed_many(&texts(&["a", "bb", "ccc", "dddd", "eeeee"])).await;
        assert_eq!(out.len(), 5);
        assert_eq!(out[2], vec![3.0, 1.0]);
        assert_eq!(o.provider().batch_calls.load(Ordering::SeqCst), 3);
        assert_eq!(o.provider().embed_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_batch_falls_back_per_item() {
        let o = orchestrator(
            Scripted {
                batch: true,
                batch_fails: true,
                ..Scripted::default()
            },
            8,
        );
        let out = o.embed_many(&texts(&["a", "bb", "ccc"])).await;
        assert_eq!(out, vec![vec![1.0, 1.0], vec![2.0, 1.0], vec![3.0, 1.0]]);
        assert_eq!(o.provider().embed_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn misaligned_batch_reply_falls_back() {
        let o = orchestrator(
            Scripted {
                batch: true,
                batch_drops_one: true,
                ..Scripted::default()
            },
            8,
        );
        let out = o.embed_many(&texts(&["a", "bb"])).await;
        assert_eq!(out, vec![vec![1.0, 1.0], vec![2.0, 1.0]]);
    }

    #[tokio::test]
    async fn failed_item_becomes_zero_vector_in_place() {
        let o = orchestrator(Scripted::default(), 8);
        let out = o.embed_many(&texts(&["a", "!bad", "ccc"])).await;
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], vec![1.0, 1.0]);
        assert_eq!(out[1], vec![0.0, 0.0]);
        assert_eq!(out[2], vec![3.0, 1.0]);
    }

    #[tokio::test]
    async fn try_embed_batch_marks_only_failed_items() {
        let o = orchestrator(Scripted::default(), 8);
        let out = o.try_embed_batch(&texts(&["a", "!bad", "ccc"])).await.unwrap();
        assert_eq!(out, vec![Some(vec![1.0, 1.0]), None, Some(vec![3.0, 1.0])]);
    }

    #[tokio::test]
    async fn genuine_zero_vector_is_not_a_failure() {
        struct Silent;
        impl Embedder for Silent {
            fn name(&self) -> &str {
                "silent"
            }
            fn dimension(&self) -> usize {
                3
            }
            async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
                Ok(vec![0.0; 3])
            }
        }
        let o = EmbeddingOrchestrator::new(Silent, OrchestratorConfig::default());
        let out = o.try_embed_batch(&texts(&["{}"])).await.unwrap();
        assert_eq!(out, vec![Some(vec![0.0; 3])]);
    }

    #[tokio::test]
    async fn whole_batch_failure_is_error_for_try_and_zeros_for_many() {
        let o = orchestrator(Scripted::default(), 2);
        assert!(o.try_embed_batch(&texts(&["!x", "!y"])).await.is_err());

        let out = o.embed_many(&texts(&["!x", "!y", "ok"])).await;
        assert_eq!(out, vec![vec![0.0, 0.0], vec![0.0, 0.0], vec![2.0, 1.0]]);
    }

    #[tokio::test]
    async fn per_item_concurrency_is_bounded() {
        let o = orchestrator(Scripted::default(), 16);
        let input: Vec<String> = (0..10).map(|i| format!("t{i}")).collect();
        let out = o.embed_many(&input).await;
        assert_eq!(out.len(), 10);
        assert!(o.provider().max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn embed_query_surfaces_errors() {
        let o = orchestrator(Scripted::default(), 4);
        assert!(o.embed_query("!boom").await.is_err());
        assert_eq!(o.embed_query("hey").await.unwrap(), vec![3.0, 1.0]);
    }

    #[test]
    fn zero_sizes_are_clamped() {
        let o = EmbeddingOrchestrator::new(
            Scripted::default(),
            OrchestratorConfig {
                batch_size: 0,
                concurrency: 0,
            },
        );
        assert_eq!(o.batch_size(), 1);
    }

    #[tokio::test]
    async fn shared_provider_through_arc() {
        let counter = Arc::new(AtomicUsize::new(0));
        struct Counting(Arc<AtomicUsize>);
        impl Embedder for Counting {
            fn name(&self) -> &str {
                "counting"
            }
            fn dimension(&self) -> usize {
                1
            }
            async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(vec![1.0])
            }
        }
        let o = EmbeddingOrchestrator::new(Counting(Arc::clone(&counter)), OrchestratorConfig::default());
        let out = o.embed_many(&texts(&["a"; 40])).await;
        assert_eq!(out.len(), 40);
        assert_eq!(counter.load(Ordering::SeqCst), 40);
    }
}
