//! Embedding backend that delegates to an external program.
//!
//! One child process is spawned per request. It receives a single JSON line
//! `{"texts":[...]}` on stdin and must print `{"embeddings":[[...]],"error":null}`
//! on stdout before exiting with status 0.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::EmbedError;
use crate::provider::Embedder;

#[derive(Debug, Clone)]
pub struct SubprocessEmbedder {
    command: String,
    args: Vec<String>,
    timeout: Duration,
    dimension: Arc<AtomicUsize>,
}

#[derive(Serialize)]
struct Request<'a> {
    texts: &'a [String],
}

#[derive(Deserialize)]
struct Reply {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
    #[serde(default)]
    error: Option<String>,
}

impl SubprocessEmbedder {
    #[must_use]
    pub fn new(command: String, args: Vec<String>, timeout_secs: u64, dimension: usize) -> Self {
        Self {
            command,
            args,
            timeout: Duration::from_secs(timeout_secs),
            dimension: Arc::new(AtomicUsize::new(dimension)),
        }
    }

    async fn run(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EmbedError::Subprocess(format!("failed to spawn {}: {e}", self.command)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| EmbedError::Subprocess("child stdin unavailable".into()))?;
        let mut payload = serde_json::to_vec(&Request { texts })?;
        payload.push(b'\n');
        let writer = tokio::spawn(async move {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| EmbedError::Timeout(self.timeout.as_secs()))??;

        match writer.await {
            Ok(Err(e)) => tracing::debug!("subprocess embedder stdin write failed: {e}"),
            Err(e) => tracing::debug!("subprocess embedder writer task failed: {e}"),
            Ok(Ok(())) => {}
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EmbedError::Subprocess(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .ok_or(EmbedError::EmptyResponse {
                provider: "subprocess",
            })?;
        let reply: Reply = serde_json::from_str(line)?;

        if let Some(error) = reply.error {
            return Err(EmbedError::Subprocess(error));
        }
        if reply.embeddings.len() != texts.len() {
            return Err(EmbedError::CountMismatch {
                provider: "subprocess",
                expected: texts.len(),
                got: reply.embeddings.len(),
            });
        }
        Ok(reply.embeddings)
    }
}

impl Embedder for SubprocessEmbedder {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "subprocess"
    }

    fn dimension(&self) -> usize {
        self.dimension.load(Ordering::Relaxed)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.run(&[text.to_owned()])
            .await?
            .into_iter()
            .next()
            .ok_or(EmbedError::EmptyResponse {
                provider: "subprocess",
            })
    }

    fn supports_batch(&self) -> bool {
        true
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.run(texts).await
    }

    /// Run one sample request so a missing binary is reported at startup.
    async fn initialize(&self) -> Result<(), EmbedError> {
        let sample = self.embed("dimension check").await?;
        let configured = self.dimension();
        if sample.len() != configured {
            tracing::warn!(
                configured,
                actual = sample.len(),
                command = %self.command,
                "subprocess embedding dimension differs from config, using program output"
            );
            self.dimension.store(sample.len(), Ordering::Relaxed);
        }
        Ok(())
    }
}
