#[cfg(feature = "candle")]
use crate::candle_provider::CandleEmbedder;
use crate::error::EmbedError;
use crate::hash::HashEmbedder;
#[cfg(feature = "mock")]
use crate::mock::MockEmbedder;
use crate::ollama::OllamaEmbedder;
use crate::openai::OpenAiEmbedder;
use crate::provider::Embedder;
use crate::subprocess::SubprocessEmbedder;

/// Generates a match over all `AnyEmbedder` variants, binding the inner provider
/// and evaluating the given expression for each arm.
macro_rules! delegate_embedder {
    ($self:expr, |$p:ident| $expr:expr) => {
        match $self {
            AnyEmbedder::Hash($p) => $expr,
            AnyEmbedder::Ollama($p) => $expr,
            AnyEmbedder::OpenAi($p) => $expr,
            AnyEmbedder::Subprocess($p) => $expr,
            #[cfg(feature = "candle")]
            AnyEmbedder::Candle($p) => $expr,
            #[cfg(feature = "mock")]
            AnyEmbedder::Mock($p) => $expr,
        }
    };
}

#[derive(Debug, Clone)]
pub enum AnyEmbedder {
    Hash(HashEmbedder),
    Ollama(OllamaEmbedder),
    OpenAi(OpenAiEmbedder),
    Subprocess(SubprocessEmbedder),
    #[cfg(feature = "candle")]
    Candle(CandleEmbedder),
    #[cfg(feature = "mock")]
    Mock(MockEmbedder),
}

impl Embedder for AnyEmbedder {
    fn name(&self) -> &str {
        delegate_embedder!(self, |p| p.name())
    }

    fn dimension(&self) -> usize {
        delegate_embedder!(self, |p| p.dimension())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        delegate_embedder!(self, |p| p.embed(text).await)
    }

    fn supports_batch(&self) -> bool {
        delegate_embedder!(self, |p| p.supports_batch())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        delegate_embedder!(self, |p| p.embed_batch(texts).await)
    }

    async fn initialize(&self) -> Result<(), EmbedError> {
        delegate_embedder!(self, |p| p.initialize().await)
    }

    async fn shutdown(&self) -> Result<(), EmbedError> {
        delegate_embedder!(self, |p| p.shutdown().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_hash_delegates() {
        let e = AnyEmbedder::Hash(HashEmbedder::new(128));
        assert_eq!(e.name(), "hash");
        assert_eq!(e.dimension(), 128);
        assert!(e.supports_batch());
    }

    #[test]
    fn any_ollama_name() {
        let e = AnyEmbedder::Ollama(OllamaEmbedder::new(
            "http://localhost:11434",
            "nomic-embed-text".into(),
            768,
        )
        .unwrap());
        assert_eq!(e.name(), "ollama");
        assert_eq!(e.dimension(), 768);
    }

    #[test]
    fn any_subprocess_name() {
        let e = AnyEmbedder::Subprocess(SubprocessEmbedder::new("embedder".into(), vec![], 5, 384));
        assert_eq!(e.name(), "subprocess");
    }

    #[tokio::test]
    async fn any_hash_embeds() {
        let e = AnyEmbedder::Hash(HashEmbedder::new(32));
        let v = e.embed("parse config file").await.unwrap();
        assert_eq!(v.len(), 32);
        e.initialize().await.unwrap();
        e.shutdown().await.unwrap();
    }
}
