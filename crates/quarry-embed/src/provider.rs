use std::future::Future;

use crate::error::EmbedError;

/// Capability every embedding backend exposes.
///
/// Only `embed` and `dimension` are mandatory. Backends with a native batch
/// endpoint override `supports_batch`/`embed_batch`; backends holding external
/// resources override the `initialize`/`shutdown` hooks.
pub trait Embedder: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Fixed length of every vector this provider returns.
    fn dimension(&self) -> usize;

    /// Embed a single text.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or replies with an unusable payload.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, EmbedError>> + Send;

    fn supports_batch(&self) -> bool {
        false
    }

    /// Embed many texts in one call. The reply must be aligned with `texts`.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError::BatchUnsupported`] unless overridden, or any backend error.
    fn embed_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, EmbedError>> + Send {
        let _ = texts;
        async {
            Err(EmbedError::BatchUnsupported {
                provider: "default",
            })
        }
    }

    /// Prepare the backend (load a model, check the endpoint).
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be brought up.
    fn initialize(&self) -> impl Future<Output = Result<(), EmbedError>> + Send {
        async { Ok(()) }
    }

    /// Release backend resources.
    ///
    /// # Errors
    ///
    /// Returns an error if teardown fails.
    fn shutdown(&self) -> impl Future<Output = Result<(), EmbedError>> + Send {
        async { Ok(()) }
    }
}

/// All-zero vector used as the placeholder for a failed item.
#[must_use]
pub fn zero_vector(dimension: usize) -> Vec<f32> {
    vec![0.0; dimension]
}

/// Scale `vector` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}
