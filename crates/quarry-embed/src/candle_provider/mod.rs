//! Local BERT embeddings via candle. The model is loaded lazily on first use
//! (or eagerly by `initialize`) and inference runs on the blocking pool.

pub mod embed;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub use candle_core::Device;
use tokio::sync::OnceCell;

use self::embed::BertEncoder;
use crate::error::EmbedError;
use crate::provider::Embedder;

#[derive(Clone)]
pub struct CandleEmbedder {
    repo_id: String,
    device: Device,
    encoder: Arc<OnceCell<BertEncoder>>,
    dimension: Arc<AtomicUsize>,
}

impl std::fmt::Debug for CandleEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandleEmbedder")
            .field("repo_id", &self.repo_id)
            .field("device", &self.device_name())
            .field("loaded", &self.encoder.initialized())
            .finish()
    }
}

impl CandleEmbedder {
    #[must_use]
    pub fn new(repo_id: String, device: Device, dimension: usize) -> Self {
        Self {
            repo_id,
            device,
            encoder: Arc::new(OnceCell::new()),
            dimension: Arc::new(AtomicUsize::new(dimension)),
        }
    }

    #[must_use]
    pub fn device_name(&self) -> &'static str {
        match self.device {
            Device::Cpu => "cpu",
            Device::Cuda(_) => "cuda",
            Device::Metal(_) => "metal",
        }
    }

    async fn encoder(&self) -> Result<&BertEncoder, EmbedError> {
        self.encoder
            .get_or_try_init(|| async {
                let repo_id = self.repo_id.clone();
                let device = self.device.clone();
                tracing::info!(model = %repo_id, device = self.device_name(), "loading candle embedding model");
                let encoder = tokio::task::spawn_blocking(move || BertEncoder::load(&repo_id, &device))
                    .await
                    .map_err(|e| EmbedError::ModelLoad(format!("model load task failed: {e}")))??;
                self.dimension.store(encoder.hidden_size(), Ordering::Relaxed);
                Ok(encoder)
            })
            .await
    }
}

impl Embedder for CandleEmbedder {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "candle"
    }

    fn dimension(&self) -> usize {
        self.dimension.load(Ordering::Relaxed)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let encoder = self.encoder().await?.clone();
        let text = text.to_owned();
        tokio::task::spawn_blocking(move || encoder.encode(&text))
            .await
            .map_err(|e| EmbedError::Inference(format!("candle embedding task failed: {e}")))?
    }

    fn supports_batch(&self) -> bool {
        true
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let encoder = self.encoder().await?.clone();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || {
            texts.iter().map(|t| encoder.encode(t)).collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(|e| EmbedError::Inference(format!("candle embedding task failed: {e}")))?
    }

    async fn initialize(&self) -> Result<(), EmbedError> {
        self.encoder().await.map(|_| ())
    }
}
