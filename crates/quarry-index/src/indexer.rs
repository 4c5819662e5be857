//! Incremental indexing: only chunks whose fingerprint is new (or that never
//! received a vector) are embedded; chunks that disappeared are deleted.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use quarry_embed::{Embedder, EmbeddingOrchestrator};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::chunker::{CodeChunk, chunk_file, normalize_source};
use crate::error::Result;
use crate::fingerprint::file_hash;
use crate::languages::{ParserRegistry, detect_language};
use crate::store::CodeStore;

/// Outcome of indexing one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub file_path: String,
    /// Chunks written to the store (new, changed, or retried).
    pub written: usize,
    pub unchanged: usize,
    /// Written chunks that ended up without a vector.
    pub without_vector: usize,
    /// Stale chunks deleted after the write.
    pub removed: usize,
}

/// Applies one file's extraction to the store.
pub struct DeltaIndexer<P> {
    store: CodeStore,
    orchestrator: Arc<EmbeddingOrchestrator<P>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<P: Embedder> DeltaIndexer<P> {
    #[must_use]
    pub fn new(store: CodeStore, orchestrator: Arc<EmbeddingOrchestrator<P>>) -> Self {
        Self {
            store,
            orchestrator,
            locks: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn store(&self) -> &CodeStore {
        &self.store
    }

    fn path_lock(&self, file_path: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(locks.entry(file_path.to_owned()).or_default())
    }

    /// Drop the map entry for `file_path` once nobody else holds or waits on it.
    fn release_lock(&self, file_path: &str, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // one reference in the map, one held by the caller
        if Arc::strong_count(lock) <= 2 {
            locks.remove(file_path);
        }
    }

    /// Bring the stored chunks of `file_path` in line with `chunks`.
    ///
    /// Embedding failures never fail the call: affected chunks are stored
    /// without a vector and retried on the next run.
    ///
    /// # Errors
    ///
    /// Returns an error if a store read, write or delete fails.
    pub async fn index_file(
        &self,
        file_path: &str,
        file_hash: &str,
        chunks: Vec<CodeChunk>,
    ) -> Result<FileReport> {
        let lock = self.path_lock(file_path);
        let result = {
            let _guard = lock.lock().await;
            self.apply(file_path, file_hash, chunks).await
        };
        self.release_lock(file_path, &lock);
        result
    }

    async fn apply(
        &self,
        file_path: &str,
        file_hash: &str,
        chunks: Vec<CodeChunk>,
    ) -> Result<FileReport> {
        let mut seen = HashSet::new();
        let mut current = Vec::with_capacity(chunks.len());
        for mut chunk in chunks {
            chunk.ensure_identity();
            if seen.insert(chunk.fingerprint.clone()) {
                current.push(chunk);
            }
        }

        let stored = self.store.fingerprints_for_file(file_path).await?;
        let valid: Vec<String> = current.iter().map(|c| c.fingerprint.clone()).collect();
        let (unchanged, mut to_embed): (Vec<_>, Vec<_>) = current
            .into_iter()
            .partition(|c| stored.get(&c.fingerprint).copied().unwrap_or(false));

        let batch_size = self.orchestrator.batch_size();
        for batch in to_embed.chunks_mut(batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            match self.orchestrator.try_embed_batch(&texts).await {
                Ok(outcomes) => {
                    for (chunk, vector) in batch.iter_mut().zip(outcomes) {
                        chunk.vector = vector;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        file = file_path,
                        size = batch.len(),
                        "embedding failed, storing chunks without vectors: {e}"
                    );
                    for chunk in batch.iter_mut() {
                        chunk.vector = None;
                    }
                }
            }
        }

        let written = self.store.upsert_many(file_hash, &to_embed).await?;
        let removed = self.store.delete_stale_for_file(file_path, &valid).await?;

        let report = FileReport {
            file_path: file_path.to_owned(),
            written,
            unchanged: unchanged.len(),
            without_vector: to_embed.iter().filter(|c| !c.has_vector()).count(),
            removed,
        };
        tracing::debug!(
            file = file_path,
            written = report.written,
            unchanged = report.unchanged,
            removed = report.removed,
            without_vector = report.without_vector,
            "delta applied"
        );
        Ok(report)
    }

    /// Drop every chunk of a file that no longer exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails.
    pub async fn remove_file(&self, file_path: &str) -> Result<usize> {
        let lock = self.path_lock(file_path);
        let result = {
            let _guard = lock.lock().await;
            self.store.remove_file(file_path).await
        };
        self.release_lock(file_path, &lock);
        result
    }
}

/// File-level indexing configuration.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Files larger than this are skipped.
    pub max_file_bytes: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: 1024 * 1024,
        }
    }
}

/// Summary of an indexing run.
#[derive(Debug, Default, Serialize)]
pub struct IndexReport {
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub files_removed: usize,
    pub chunks_written: usize,
    pub chunks_unchanged: usize,
    pub chunks_removed: usize,
    pub chunks_without_vector: usize,
    pub errors: Vec<String>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl IndexReport {
    fn absorb(&mut self, file: &FileReport) {
        if file.written > 0 || file.removed > 0 {
            self.files_indexed += 1;
        }
        self.chunks_written += file.written;
        self.chunks_unchanged += file.unchanged;
        self.chunks_removed += file.removed;
        self.chunks_without_vector += file.without_vector;
    }
}

/// What happened to one path handed to [`CodeIndexer::index_path`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathOutcome {
    Indexed(FileReport),
    /// Too large or not UTF-8. Chunks stored for it by an earlier run are
    /// dropped; `removed` counts them.
    Skipped { removed: usize },
}

/// Reads files from disk, extracts chunks and feeds them to a [`DeltaIndexer`].
pub struct CodeIndexer<P> {
    registry: ParserRegistry,
    delta: DeltaIndexer<P>,
    config: IndexerConfig,
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

impl<P: Embedder> CodeIndexer<P> {
    #[must_use]
    pub fn new(registry: ParserRegistry, delta: DeltaIndexer<P>, config: IndexerConfig) -> Self {
        Self {
            registry,
            delta,
            config,
        }
    }

    #[must_use]
    pub fn delta(&self) -> &DeltaIndexer<P> {
        &self.delta
    }

    /// Index a single file. A file that is too large or not UTF-8 is skipped,
    /// and whatever an earlier run stored for it is removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the store fails.
    pub async fn index_path(&self, root: &Path, path: &Path) -> Result<PathOutcome> {
        let rel_path = relative_path(root, path);
        let meta = tokio::fs::metadata(path).await?;
        if meta.len() > self.config.max_file_bytes {
            tracing::debug!(file = %rel_path, bytes = meta.len(), "file too large, skipping");
            return self.skip(&rel_path).await;
        }

        let bytes = tokio::fs::read(path).await?;
        let Ok(raw) = String::from_utf8(bytes) else {
            tracing::debug!(file = %rel_path, "not valid UTF-8, skipping");
            return self.skip(&rel_path).await;
        };
        let source = normalize_source(&raw);

        let chunks = chunk_file(&self.registry, detect_language(path), &rel_path, &source);
        let report = self
            .delta
            .index_file(&rel_path, &file_hash(&source), chunks)
            .await?;
        Ok(PathOutcome::Indexed(report))
    }

    async fn skip(&self, rel_path: &str) -> Result<PathOutcome> {
        let removed = self.delta.remove_file(rel_path).await?;
        if removed > 0 {
            tracing::info!(file = rel_path, removed, "dropped chunks of skipped file");
        }
        Ok(PathOutcome::Skipped { removed })
    }

    /// Index the given files in order, stopping early when `cancel` fires.
    pub async fn index_paths(
        &self,
        root: &Path,
        paths: &[PathBuf],
        cancel: &CancellationToken,
    ) -> IndexReport {
        let start = std::time::Instant::now();
        let mut report = IndexReport::default();
        let total = paths.len();

        for (i, path) in paths.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(done = i, total, "indexing cancelled");
                report.cancelled = true;
                break;
            }
            report.files_scanned += 1;
            match self.index_path(root, path).await {
                Ok(PathOutcome::Indexed(file)) => {
                    tracing::info!(
                        file = %file.file_path,
                        progress = format_args!("{}/{total}", i + 1),
                        written = file.written,
                        unchanged = file.unchanged,
                    );
                    report.absorb(&file);
                }
                Ok(PathOutcome::Skipped { removed }) => {
                    report.files_skipped += 1;
                    if removed > 0 {
                        report.files_removed += 1;
                        report.chunks_removed += removed;
                    }
                }
                Err(e) => {
                    let rel = relative_path(root, path);
                    tracing::warn!(file = %rel, "indexing failed: {e}");
                    report.errors.push(format!("{rel}: {e}"));
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        report
    }

    /// Walk `root` (respecting `.gitignore`), index every recognised source
    /// file, then drop stored files that no longer exist.
    ///
    /// # Errors
    ///
    /// Returns an error if listing stored files fails.
    pub async fn index_project(&self, root: &Path, cancel: &CancellationToken) -> Result<IndexReport> {
        let paths: Vec<PathBuf> = ignore::WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(true)
            .build()
            .flatten()
            .filter(|e| e.file_type().is_some_and(|ft| ft.is_file()))
            .filter(|e| detect_language(e.path()).is_some())
            .map(ignore::DirEntry::into_path)
            .collect();

        tracing::info!(total = paths.len(), root = %root.display(), "indexing started");
        let mut report = self.index_paths(root, &paths, cancel).await;
        if report.cancelled {
            return Ok(report);
        }

        let current: HashSet<String> = paths.iter().map(|p| relative_path(root, p)).collect();
        for old in self.delta.store().indexed_files().await? {
            if current.contains(&old) {
                continue;
            }
            match self.delta.remove_file(&old).await {
                Ok(n) => {
                    report.files_removed += 1;
                    report.chunks_removed += n;
                }
                Err(e) => report.errors.push(format!("cleanup {old}: {e}")),
            }
        }

        tracing::info!(
            files = report.files_scanned,
            written = report.chunks_written,
            unchanged = report.chunks_unchanged,
            removed = report.chunks_removed,
            errors = report.errors.len(),
            duration_ms = report.duration_ms,
            "indexing finished"
        );
        Ok(report)
    }
}
