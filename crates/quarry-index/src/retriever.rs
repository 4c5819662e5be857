//! Hybrid retrieval: cosine ranking over stored vectors with a keyword
//! fallback when the semantic answer is weak or unavailable.

use std::sync::Arc;

use quarry_embed::{Embedder, EmbeddingOrchestrator};
use serde::Serialize;

use crate::chunker::CodeChunk;
use crate::error::Result;
use crate::keywords::{count_matches, extract_keywords};
use crate::store::{CodeStore, DEFAULT_KEYWORD_LIMIT};

const COSINE_EPSILON: f32 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchSource {
    Semantic,
    Keyword,
}

impl std::fmt::Display for MatchSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Semantic => "semantic",
            Self::Keyword => "keyword",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk: CodeChunk,
    pub score: f32,
    pub source: MatchSource,
}

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Minimum top semantic score; below it keyword search is used instead.
    pub score_threshold: f32,
    /// Score attached to every keyword hit.
    pub keyword_score: f32,
    /// Row cap for the keyword query.
    pub keyword_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            score_threshold: 0.3,
            keyword_score: 0.1,
            keyword_limit: DEFAULT_KEYWORD_LIMIT,
        }
    }
}

/// `dot(a, b) / (|a| * |b| + 1e-8)`. Zero vectors score 0.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt() + COSINE_EPSILON)
}

pub struct CodeRetriever<P> {
    store: CodeStore,
    orchestrator: Arc<EmbeddingOrchestrator<P>>,
    config: RetrievalConfig,
}

impl<P: Embedder> CodeRetriever<P> {
    #[must_use]
    pub fn new(
        store: CodeStore,
        orchestrator: Arc<EmbeddingOrchestrator<P>>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            orchestrator,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Best `top_k` chunks for `query`. Never fails: embedding or store errors
    /// and weak semantic matches fall back to keyword search.
    pub async fn search(&self, query: &str, top_k: usize) -> Vec<SearchHit> {
        match self.semantic_search(query, top_k).await {
            Ok(hits)
                if hits
                    .first()
                    .is_some_and(|h| h.score >= self.config.score_threshold) =>
            {
                hits
            }
            Ok(hits) => {
                tracing::debug!(
                    top = hits.first().map(|h| h.score),
                    threshold = self.config.score_threshold,
                    "weak semantic match, using keyword search"
                );
                self.keyword_search(query, top_k).await
            }
            Err(e) => {
                tracing::warn!("semantic search failed, using keyword search: {e}");
                self.keyword_search(query, top_k).await
            }
        }
    }

    /// Pure similarity ranking. Ties keep store order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query cannot be embedded or the store fails.
    pub async fn semantic_search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let query_vector = self.orchestrator.embed_query(query).await?;
        let rows = self.store.all_with_vector().await?;

        let mut skipped = 0usize;
        let mut scored: Vec<(String, f32)> = Vec::with_capacity(rows.len());
        for (id, vector) in rows {
            if vector.len() != query_vector.len() {
                skipped += 1;
                continue;
            }
            let score = cosine_similarity(&query_vector, &vector);
            scored.push((id, score));
        }
        if skipped > 0 {
            tracing::warn!(
                skipped,
                expected = query_vector.len(),
                "ignoring stored vectors with a different dimension"
            );
        }

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);

        let mut hits = Vec::with_capacity(scored.len());
        for (id, score) in scored {
            if let Some(chunk) = self.store.get_by_id(&id).await? {
                hits.push(SearchHit {
                    chunk,
                    score,
                    source: MatchSource::Semantic,
                });
            }
        }
        Ok(hits)
    }

    /// Substring search on the query's keywords, ranked by how many distinct
    /// keywords each chunk contains. Store errors yield an empty list.
    pub async fn keyword_search(&self, query: &str, top_k: usize) -> Vec<SearchHit> {
        let keywords = extract_keywords(query);
        if keywords.is_empty() {
            return Vec::new();
        }
        let chunks = match self
            .store
            .find_by_keywords(&keywords, self.config.keyword_limit)
            .await
        {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::warn!("keyword search failed: {e}");
                return Vec::new();
            }
        };

        let mut ranked: Vec<(usize, CodeChunk)> = chunks
            .into_iter()
            .map(|c| (count_matches(&c.text, &keywords), c))
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0));
        ranked
            .into_iter()
            .take(top_k)
            .map(|(_, chunk)| self.keyword_hit(chunk))
            .collect()
    }

    /// Chunks mentioning `symbol` verbatim (case-insensitive).
    pub async fn find_references(&self, symbol: &str, limit: usize) -> Vec<SearchHit> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Vec::new();
        }
        match self.store.find_by_keywords(&[symbol.to_owned()], limit).await {
            Ok(chunks) => chunks.into_iter().map(|c| self.keyword_hit(c)).collect(),
            Err(e) => {
                tracing::warn!(symbol, "reference lookup failed: {e}");
                Vec::new()
            }
        }
    }

    fn keyword_hit(&self, chunk: CodeChunk) -> SearchHit {
        SearchHit {
            chunk,
            score: self.config.keyword_score,
            source: MatchSource::Keyword,
        }
    }
}
