use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EmbedError;
use crate::provider::Embedder;
use crate::retry::send_with_retry;

const MAX_RETRIES: u32 = 3;

/// Client for OpenAI-compatible `/embeddings` endpoints.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
}

impl fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl OpenAiEmbedder {
    #[must_use]
    pub fn new(api_key: String, mut base_url: String, model: String, dimension: usize) -> Self {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: crate::http::default_client(),
            api_key,
            base_url,
            model,
            dimension,
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn request(&self, input: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let body = EmbeddingRequest {
            input,
            model: &self.model,
        };
        let url = format!("{}/embeddings", self.base_url);

        let response = send_with_retry("openai", MAX_RETRIES, || {
            self.client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
        })
        .await?;

        let status = response.status();
        let text = response.text().await.map_err(EmbedError::Http)?;

        if !status.is_success() {
            tracing::error!("OpenAI embedding API error {status}: {text}");
            return Err(EmbedError::Other(format!(
                "OpenAI embedding request failed (status {status})"
            )));
        }

        let mut resp: EmbeddingResponse = serde_json::from_str(&text)?;
        resp.data.sort_by_key(|d| d.index);
        Ok(resp.data.into_iter().map(|d| d.embedding).collect())
    }
}

impl Embedder for OpenAiEmbedder {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "openai"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.request(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or(EmbedError::EmptyResponse { provider: "openai" })
    }

    fn supports_batch(&self) -> bool {
        true
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let input: Vec<&str> = texts.iter().map(String::as_str).collect();
        let embeddings = self.request(&input).await?;
        if embeddings.len() != texts.len() {
            return Err(EmbedError::CountMismatch {
                provider: "openai",
                expected: texts.len(),
                got: embeddings.len(),
            });
        }
        Ok(embeddings)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [&'a str],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn embedder(uri: &str) -> OpenAiEmbedder {
        OpenAiEmbedder::new("sk-test".into(), format!("{uri}/v1/"), "text-embedding-3-small".into(), 3)
    }

    #[test]
    fn debug_redacts_api_key() {
        let e = embedder("http://localhost");
        let dbg = format!("{e:?}");
        assert!(!dbg.contains("sk-test"));
        assert!(dbg.contains("<redacted>"));
        assert!(dbg.contains("http://localhost/v1\""));
    }

    #[test]
    fn parse_embedding_response() {
        let json = r#"{"data":[{"embedding":[0.1,0.2,0.3],"index":0}]}"#;
        let resp: EmbeddingResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.data[0].embedding, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn embed_single_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "text-embedding-3-small",
                "input": ["hello"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [1.0, 0.0, 0.0], "index": 0}]
            })))
            .mount(&server)
            .await;

        let v = embedder(&server.uri()).embed("hello").await.unwrap();
        assert_eq!(v, vec![1.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn batch_is_reordered_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"embedding": [0.0, 1.0, 0.0], "index": 1},
                    {"embedding": [1.0, 0.0, 0.0], "index": 0}
                ]
            })))
            .mount(&server)
            .await;

        let out = embedder(&server.uri())
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(out[0], vec![1.0, 0.0, 0.0]);
        assert_eq!(out[1], vec![0.0, 1.0, 0.0]);
    }

    #[tokio::test]
    async fn batch_count_mismatch_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [1.0, 0.0, 0.0], "index": 0}]
            })))
            .mount(&server)
            .await;

        let err = embedder(&server.uri())
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EmbedError::CountMismatch {
                expected: 2,
                got: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn server_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = embedder(&server.uri()).embed("x").await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_errors() {
        let e = OpenAiEmbedder::new(
            "k".into(),
            "http://127.0.0.1:1".into(),
            "m".into(),
            3,
        );
        assert!(e.embed("test").await.is_err());
    }
}
