//! Error types for quarry-index.

use std::num::TryFromIntError;

/// Errors that can occur during code indexing operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading source files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// `SQLite` database error.
    #[error("database error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Embedding provider error.
    #[error("embedding error: {0}")]
    Embed(#[from] quarry_embed::EmbedError),

    /// Tree-sitter parsing error.
    #[error("parse failed: {0}")]
    Parse(String),

    /// Unsupported or unrecognized language.
    #[error("unsupported language")]
    UnsupportedLanguage,

    /// Stored vector blob whose length is not a multiple of four bytes.
    #[error("corrupt embedding blob for chunk {0}")]
    CorruptVector(String),

    #[error("integer conversion failed: {0}")]
    IntConversion(#[from] TryFromIntError),

    #[error("{0}")]
    Other(String),
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
