#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rate limited")]
    RateLimited,

    #[error("empty response from {provider}")]
    EmptyResponse { provider: &'static str },

    #[error("batch embedding not supported by {provider}")]
    BatchUnsupported { provider: &'static str },

    #[error("{provider} returned {got} embeddings for {expected} inputs")]
    CountMismatch {
        provider: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("subprocess embedder failed: {0}")]
    Subprocess(String),

    #[error("subprocess embedder timed out after {0}s")]
    Timeout(u64),

    #[error("model loading failed: {0}")]
    ModelLoad(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[cfg(feature = "candle")]
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, EmbedError>;
