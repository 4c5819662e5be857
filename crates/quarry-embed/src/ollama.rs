use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ollama_rs::Ollama;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};

use crate::error::EmbedError;
use crate::provider::Embedder;

#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: Ollama,
    model: String,
    dimension: Arc<AtomicUsize>,
}

impl OllamaEmbedder {
    /// # Errors
    ///
    /// Returns an error if `base_url` is not a usable HTTP URL.
    pub fn new(base_url: &str, model: String, dimension: usize) -> Result<Self, EmbedError> {
        let (host, port) = parse_host_port(base_url);
        let mut url = reqwest::Url::parse(&host)
            .map_err(|e| EmbedError::Other(format!("invalid Ollama base URL {base_url}: {e}")))?;
        url.set_port(Some(port))
            .map_err(|()| EmbedError::Other(format!("Ollama base URL {base_url} cannot carry a port")))?;
        Ok(Self {
            client: Ollama::builder().url(url).build(),
            model,
            dimension: Arc::new(AtomicUsize::new(dimension)),
        })
    }

    /// Check if Ollama is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection to Ollama fails.
    pub async fn health_check(&self) -> Result<(), EmbedError> {
        self.client.list_local_models().await.map_err(|e| {
            EmbedError::Other(format!("failed to connect to Ollama, is it running? {e}"))
        })?;
        Ok(())
    }

    async fn request(&self, input: EmbeddingsInput) -> Result<Vec<Vec<f32>>, EmbedError> {
        let request = GenerateEmbeddingsRequest::new(self.model.clone(), input);
        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|e| EmbedError::Other(format!("Ollama embedding request failed: {e}")))?;
        Ok(response.embeddings)
    }
}

impl Embedder for OllamaEmbedder {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "ollama"
    }

    fn dimension(&self) -> usize {
        self.dimension.load(Ordering::Relaxed)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.request(EmbeddingsInput::from(text))
            .await?
            .into_iter()
            .next()
            .ok_or(EmbedError::EmptyResponse { provider: "ollama" })
    }

    fn supports_batch(&self) -> bool {
        true
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let embeddings = self
            .request(EmbeddingsInput::Multiple(texts.to_vec()))
            .await?;
        if embeddings.len() != texts.len() {
            return Err(EmbedError::CountMismatch {
                provider: "ollama",
                expected: texts.len(),
                got: embeddings.len(),
            });
        }
        Ok(embeddings)
    }

    /// Probe the server and learn the model's real output dimension.
    async fn initialize(&self) -> Result<(), EmbedError> {
        self.health_check().await?;
        let sample = self.embed("dimension check").await?;
        let configured = self.dimension();
        if sample.len() != configured {
            tracing::warn!(
                configured,
                actual = sample.len(),
                model = %self.model,
                "ollama embedding dimension differs from config, using model output"
            );
            self.dimension.store(sample.len(), Ordering::Relaxed);
        }
        Ok(())
    }
}

fn parse_host_port(url: &str) -> (String, u16) {
    let url = url.trim_end_matches('/');
    if let Some(colon_pos) = url.rfind(':') {
        let port_str = &url[colon_pos + 1..];
        if let Ok(port) = port_str.parse::<u16>() {
            return (url[..colon_pos].to_string(), port);
        }
    }
    (url.to_string(), 11434)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_host_port_with_port() {
        let (host, port) = parse_host_port("http://localhost:11434/");
        assert_eq!(host, "http://localhost");
        assert_eq!(port, 11434);
    }

    #[test]
    fn parse_host_port_custom_port() {
        let (host, port) = parse_host_port("http://gpu-box:8080");
        assert_eq!(host, "http://gpu-box");
        assert_eq!(port, 8080);
    }

    #[test]
    fn parse_host_port_without_port() {
        let (host, port) = parse_host_port("http://localhost");
        assert_eq!(host, "http://localhost");
        assert_eq!(port, 11434);
    }

    #[test]
    fn reports_configured_dimension() {
        let e = OllamaEmbedder::new("http://localhost:11434", "nomic-embed-text".into(), 768)
            .unwrap();
        assert_eq!(e.dimension(), 768);
        assert!(e.supports_batch());
        assert_eq!(e.name(), "ollama");
    }

    #[test]
    fn rejects_unusable_base_url() {
        assert!(OllamaEmbedder::new("not a url", "m".into(), 8).is_err());
        assert!(OllamaEmbedder::new("mailto:ops@example.com", "m".into(), 8).is_err());
    }
}
