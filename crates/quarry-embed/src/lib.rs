//! Embedding provider abstraction and backend implementations.
//!
//! Providers turn text into fixed-length vectors. They are tagged variants of
//! [`any::AnyEmbedder`] selected at construction time; the
//! [`orchestrator::EmbeddingOrchestrator`] batches texts over whichever one is
//! active and isolates failures per item.

pub mod any;
#[cfg(feature = "candle")]
pub mod candle_provider;
pub mod error;
pub mod hash;
pub(crate) mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod orchestrator;
pub mod provider;
pub(crate) mod retry;
pub mod subprocess;

pub use error::EmbedError;
pub use orchestrator::{EmbeddingOrchestrator, OrchestratorConfig};
pub use provider::Embedder;
