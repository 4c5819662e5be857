//! Incremental semantic code index.
//!
//! Source files are parsed with tree-sitter and split into declaration-level
//! chunks. Each chunk carries a content fingerprint, so re-indexing a file only
//! embeds what changed. Chunks and their vectors live in a `SQLite` store and
//! are queried by cosine similarity with a keyword fallback.

pub mod chunker;
pub mod error;
pub mod fingerprint;
pub mod indexer;
pub mod keywords;
pub mod languages;
pub mod retriever;
pub mod store;
pub mod syntax;

pub use chunker::CodeChunk;
pub use error::{IndexError, Result};
pub use indexer::{CodeIndexer, DeltaIndexer, FileReport, IndexReport, PathOutcome};
pub use languages::{Lang, ParserRegistry};
pub use retriever::{CodeRetriever, MatchSource, RetrievalConfig, SearchHit};
pub use store::CodeStore;
pub use tokio_util::sync::CancellationToken;
