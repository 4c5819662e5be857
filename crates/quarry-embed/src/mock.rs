//! Test-only scripted embedding provider.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::EmbedError;
use crate::provider::{Embedder, l2_normalize};

#[derive(Debug, Clone)]
pub struct MockEmbedder {
    pub dimension: usize,
    /// Exact-text overrides; anything else gets a deterministic pseudo-random vector.
    pub fixed: HashMap<String, Vec<f32>>,
    pub batch_supported: bool,
    pub fail_batch: bool,
    pub fail_all: bool,
    /// Single-item calls whose text contains any of these substrings fail.
    pub fail_on: Vec<String>,
    /// Milliseconds to sleep before each single-item reply.
    pub delay_ms: u64,
    embed_calls: Arc<AtomicUsize>,
    batch_calls: Arc<AtomicUsize>,
    embedded_texts: Arc<AtomicUsize>,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(8)
    }
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fixed: HashMap::new(),
            batch_supported: true,
            fail_batch: false,
            fail_all: false,
            fail_on: Vec::new(),
            delay_ms: 0,
            embed_calls: Arc::new(AtomicUsize::new(0)),
            batch_calls: Arc::new(AtomicUsize::new(0)),
            embedded_texts: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn with_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.fixed.insert(text.into(), vector);
        self
    }

    #[must_use]
    pub fn without_batch(mut self) -> Self {
        self.batch_supported = false;
        self
    }

    #[must_use]
    pub fn failing_batch(mut self) -> Self {
        self.fail_batch = true;
        self
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_all: true,
            fail_batch: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing_on(mut self, needle: impl Into<String>) -> Self {
        self.fail_on.push(needle.into());
        self
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Number of single-item `embed` calls so far (shared across clones).
    #[must_use]
    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    /// Total texts handed to the provider through either path.
    #[must_use]
    pub fn embedded_texts(&self) -> usize {
        self.embedded_texts.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.embed_calls.store(0, Ordering::SeqCst);
        self.batch_calls.store(0, Ordering::SeqCst);
        self.embedded_texts.store(0, Ordering::SeqCst);
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(v) = self.fixed.get(text) {
            return v.clone();
        }
        let mut out = Vec::with_capacity(self.dimension);
        let mut reader = blake3::Hasher::new().update(text.as_bytes()).finalize_xof();
        let mut buf = [0u8; 4];
        for _ in 0..self.dimension {
            reader.fill(&mut buf);
            #[allow(clippy::cast_precision_loss)]
            let unit = u32::from_le_bytes(buf) as f32 / u32::MAX as f32;
            out.push(unit * 2.0 - 1.0);
        }
        l2_normalize(&mut out);
        out
    }
}

impl Embedder for MockEmbedder {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        self.embedded_texts.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if self.fail_all || self.fail_on.iter().any(|n| text.contains(n.as_str())) {
            return Err(EmbedError::Other("mock embedding error".into()));
        }
        Ok(self.vector_for(text))
    }

    fn supports_batch(&self) -> bool {
        self.batch_supported
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if !self.batch_supported {
            return Err(EmbedError::BatchUnsupported { provider: "mock" });
        }
        if self.fail_batch {
            return Err(EmbedError::Other("mock batch error".into()));
        }
        self.embedded_texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}
