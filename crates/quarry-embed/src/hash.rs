//! Offline embedder based on token feature hashing.
//!
//! Every identifier-like token (and the parts of camelCase words) is hashed
//! with FNV-1a into one of `dimension` buckets with a hash-derived sign.
//! Single-character tokens and stop words (English filler and common language
//! keywords) are dropped, and repeated tokens are weighted by `1 + ln(tf)`.
//! The resulting vector is L2-normalized, so cosine similarity approximates
//! overlap of meaningful terms. Needs no model files or network.
//!
//! Text with no meaningful tokens embeds to the all-zero vector.

use std::collections::HashMap;

use crate::error::EmbedError;
use crate::provider::{Embedder, l2_normalize};

pub const DEFAULT_DIMENSION: usize = 384;

#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl HashEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    #[must_use]
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut counts: HashMap<String, u32> = HashMap::new();
        for token in tokenize(text) {
            *counts.entry(token).or_default() += 1;
        }

        let mut vector = vec![0.0_f32; self.dimension];
        for (token, tf) in counts {
            let hash = fnv1a_64(token.as_bytes());
            #[allow(clippy::cast_possible_truncation)]
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 1 { -1.0 } else { 1.0 };
            #[allow(clippy::cast_precision_loss)]
            let weight = 1.0 + (tf as f32).ln();
            vector[bucket] += sign * weight;
        }
        l2_normalize(&mut vector);
        vector
    }
}

impl Embedder for HashEmbedder {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "hash"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        Ok(self.embed_sync(text))
    }

    fn supports_batch(&self) -> bool {
        true
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }
}

const STOP_WORDS: &[&str] = &[
    "about", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "how",
    "in", "is", "it", "me", "my", "of", "on", "or", "so", "that", "the", "there", "to", "we",
    "what", "when", "where", "which", "who", "why", "with", "you", "your",
    // keywords shared by most indexed languages
    "const", "def", "else", "false", "fn", "func", "function", "if", "let", "mut", "null", "pub",
    "return", "self", "this", "true", "var", "void",
];

fn is_meaningful(token: &str) -> bool {
    token.chars().count() > 1 && !STOP_WORDS.contains(&token)
}

/// Lowercased identifier tokens plus the parts of camelCase identifiers,
/// without single characters and stop words.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        tokens.push(word.to_lowercase());
        let parts = camel_parts(word);
        if parts.len() > 1 {
            tokens.extend(parts.into_iter().map(str::to_lowercase));
        }
    }
    tokens.retain(|t| is_meaningful(t));
    tokens
}

fn camel_parts(word: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut prev_lower = false;
    for (i, c) in word.char_indices() {
        if c.is_uppercase() && prev_lower {
            parts.push(&word[start..i]);
            start = i;
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
    }
    parts.push(&word[start..]);
    parts
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn tokenize_splits_on_punctuation() {
        assert_eq!(
            tokenize("fetchRows(conn,limit){return conn.rows;}"),
            vec!["fetchrows", "fetch", "rows", "conn", "limit", "conn", "rows"]
        );
    }

    #[test]
    fn tokenize_drops_stop_words_and_single_chars() {
        assert_eq!(tokenize("function add(a,b){return a+b;}"), vec!["add"]);
        assert_eq!(tokenize("How do I add two numbers?"), vec!["add", "two", "numbers"]);
        assert!(tokenize("{ } ;").is_empty());
    }

    #[test]
    fn punctuation_only_text_gives_zero_vector() {
        assert_eq!(HashEmbedder::new(8).embed_sync("{}"), vec![0.0; 8]);
    }

    #[test]
    fn repeated_tokens_are_damped() {
        let e = HashEmbedder::new(384);
        let once = e.embed_sync("parse tokens");
        let many = e.embed_sync("parse parse parse parse tokens");
        // with raw counts the second vector would be dominated by `parse`
        let overlap: f32 = once.iter().zip(&many).map(|(x, y)| x * y).sum();
        assert!(overlap > 0.9);
    }

    #[test]
    fn tokenize_adds_camel_case_parts() {
        let tokens = tokenize("getUserName");
        assert!(tokens.contains(&"getusername".to_string()));
        assert!(tokens.contains(&"get".to_string()));
        assert!(tokens.contains(&"user".to_string()));
        assert!(tokens.contains(&"name".to_string()));
    }

    #[test]
    fn camel_parts_single_word() {
        assert_eq!(camel_parts("plain"), vec!["plain"]);
        assert_eq!(camel_parts("HTTP"), vec!["HTTP"]);
    }

    #[test]
    fn embedding_is_unit_length() {
        let v = HashEmbedder::new(64).embed_sync("fn main() { run(); }");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_text_gives_zero_vector() {
        let v = HashEmbedder::new(16).embed_sync("   ");
        assert_eq!(v, vec![0.0; 16]);
    }

    #[test]
    fn shared_tokens_score_higher() {
        let e = HashEmbedder::default();
        let query = e.embed_sync("How do I add two numbers?");
        let add = e.embed_sync("function add(a,b){return a+b;}");
        let greeting = e.embed_sync("const greeting='Hello';");
        assert!(cosine(&query, &add) > cosine(&query, &greeting));
        // well above the default retrieval threshold of 0.3
        assert!(cosine(&query, &add) > 0.5);
    }

    #[test]
    fn fnv1a_known_vector() {
        assert_eq!(fnv1a_64(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a_64(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[tokio::test]
    async fn batch_matches_single() {
        let e = HashEmbedder::new(32);
        let texts = vec!["alpha beta".to_string(), "gamma".to_string()];
        let batch = e.embed_batch(&texts).await.unwrap();
        assert_eq!(batch[0], e.embed("alpha beta").await.unwrap());
        assert_eq!(batch[1], e.embed("gamma").await.unwrap());
    }
}
