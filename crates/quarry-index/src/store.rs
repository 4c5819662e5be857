//! `SQLite` persistence for chunks and their vectors.
//!
//! Vectors are stored as little-endian `f32` blobs; a `NULL` embedding means
//! the chunk is only reachable through keyword search until it is re-embedded.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::chunker::CodeChunk;
use crate::error::{IndexError, Result};
use crate::syntax::{Position, Span};

pub const MEMORY_PATH: &str = ":memory:";

/// Default cap on rows returned by [`CodeStore::find_by_keywords`].
pub const DEFAULT_KEYWORD_LIMIT: usize = 20;

#[derive(Debug, Clone)]
pub struct CodeStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct ChunkRow {
    id: String,
    file_path: String,
    chunk_hash: String,
    chunk_type: String,
    chunk_text: String,
    start_line: i64,
    start_column: i64,
    end_line: i64,
    end_column: i64,
    embedding: Option<Vec<u8>>,
}

const CHUNK_COLUMNS: &str = "id, file_path, chunk_hash, chunk_type, chunk_text, \
     start_line, start_column, end_line, end_column, embedding";

impl TryFrom<ChunkRow> for CodeChunk {
    type Error = IndexError;

    fn try_from(row: ChunkRow) -> Result<Self> {
        let vector = row
            .embedding
            .as_deref()
            .map(|blob| decode_vector(&row.id, blob))
            .transpose()?;
        Ok(Self {
            span: Span {
                start: Position::new(
                    usize::try_from(row.start_line)?,
                    usize::try_from(row.start_column)?,
                ),
                end: Position::new(
                    usize::try_from(row.end_line)?,
                    usize::try_from(row.end_column)?,
                ),
            },
            id: row.id,
            file_path: row.file_path,
            kind: row.chunk_type,
            text: row.chunk_text,
            fingerprint: row.chunk_hash,
            vector,
        })
    }
}

/// Encode a vector as consecutive little-endian `f32` values.
#[must_use]
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// # Errors
///
/// Returns [`IndexError::CorruptVector`] if the blob length is not a multiple of four.
pub fn decode_vector(id: &str, blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(IndexError::CorruptVector(id.to_owned()));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn escape_like(keyword: &str) -> String {
    let mut out = String::with_capacity(keyword.len() + 2);
    out.push('%');
    for c in keyword.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

impl CodeStore {
    /// Open (or create) the store at `path` and run migrations.
    /// `":memory:"` gives an ephemeral store.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub async fn open(path: &str) -> Result<Self> {
        let pool = if path == MEMORY_PATH {
            // Every connection to `:memory:` is a separate database, so keep exactly one alive.
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
                .await?
        } else {
            if let Some(parent) = std::path::Path::new(path).parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent).await?;
            }
            let opts = SqliteConnectOptions::from_str(&format!("sqlite:{path}?mode=rwc"))?
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(opts)
                .await?
        };

        sqlx::migrate!().run(&pool).await?;
        Ok(Self { pool })
    }

    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub async fn in_memory() -> Result<Self> {
        Self::open(MEMORY_PATH).await
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// # Errors
    ///
    /// Returns an error if the metadata row is missing or not a number.
    pub async fn schema_version(&self) -> Result<u32> {
        let value: String =
            sqlx::query_scalar("SELECT value FROM metadata WHERE key = 'schema_version'")
                .fetch_one(&self.pool)
                .await?;
        value
            .parse()
            .map_err(|e| IndexError::Other(format!("invalid schema_version {value:?}: {e}")))
    }

    /// Insert or replace `chunks` by id in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if any write fails; nothing is committed in that case.
    pub async fn upsert_many(&self, file_hash: &str, chunks: &[CodeChunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            sqlx::query(
                "INSERT OR REPLACE INTO code_chunks \
                 (id, file_path, file_hash, chunk_hash, chunk_type, chunk_text, \
                  start_line, start_column, end_line, end_column, embedding) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.file_path)
            .bind(file_hash)
            .bind(&chunk.fingerprint)
            .bind(&chunk.kind)
            .bind(&chunk.text)
            .bind(i64::try_from(chunk.span.start.row)?)
            .bind(i64::try_from(chunk.span.start.column)?)
            .bind(i64::try_from(chunk.span.end.row)?)
            .bind(i64::try_from(chunk.span.end.column)?)
            .bind(chunk.vector.as_deref().map(encode_vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(chunks.len())
    }

    /// # Errors
    ///
    /// Returns an error if the query fails or the row is malformed.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<CodeChunk>> {
        let row: Option<ChunkRow> =
            sqlx::query_as(&format!("SELECT {CHUNK_COLUMNS} FROM code_chunks WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(CodeChunk::try_from).transpose()
    }

    /// Ids and vectors of every chunk that has one, in insertion order.
    /// Rows with a corrupt blob are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn all_with_vector(&self) -> Result<Vec<(String, Vec<f32>)>> {
        let rows: Vec<(String, Vec<u8>)> = sqlx::query_as(
            "SELECT id, embedding FROM code_chunks WHERE embedding IS NOT NULL ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, blob)| match decode_vector(&id, &blob) {
                Ok(v) => Some((id, v)),
                Err(e) => {
                    tracing::warn!("{e}");
                    None
                }
            })
            .collect())
    }

    /// Chunks whose text contains any of `keywords` (case-insensitive for
    /// ASCII), at most `limit` rows in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn find_by_keywords(&self, keywords: &[String], limit: usize) -> Result<Vec<CodeChunk>> {
        if keywords.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let clause = vec!["chunk_text LIKE ? ESCAPE '\\'"; keywords.len()].join(" OR ");
        let sql = format!("SELECT {CHUNK_COLUMNS} FROM code_chunks WHERE {clause} ORDER BY rowid LIMIT ?");

        let mut query = sqlx::query_as::<_, ChunkRow>(&sql);
        for keyword in keywords {
            query = query.bind(escape_like(keyword));
        }
        let rows = query
            .bind(i64::try_from(limit)?)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(CodeChunk::try_from).collect()
    }

    /// Stored fingerprints of `file_path`, each mapped to whether it has a vector.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn fingerprints_for_file(&self, file_path: &str) -> Result<HashMap<String, bool>> {
        let rows: Vec<(String, bool)> = sqlx::query_as(
            "SELECT chunk_hash, embedding IS NOT NULL FROM code_chunks WHERE file_path = ?",
        )
        .bind(file_path)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    /// Delete chunks of `file_path` whose fingerprint is not in `valid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query or deletion fails.
    pub async fn delete_stale_for_file(&self, file_path: &str, valid: &[String]) -> Result<usize> {
        let keep: HashSet<&str> = valid.iter().map(String::as_str).collect();
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT id, chunk_hash FROM code_chunks WHERE file_path = ?")
                .bind(file_path)
                .fetch_all(&self.pool)
                .await?;

        let stale: Vec<String> = rows
            .into_iter()
            .filter(|(_, hash)| !keep.contains(hash.as_str()))
            .map(|(id, _)| id)
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for id in &stale {
            sqlx::query("DELETE FROM code_chunks WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(stale.len())
    }

    /// Remove every chunk of `file_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails.
    pub async fn remove_file(&self, file_path: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM code_chunks WHERE file_path = ?")
            .bind(file_path)
            .execute(&self.pool)
            .await?;
        Ok(usize::try_from(result.rows_affected())?)
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn indexed_files(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT file_path FROM code_chunks ORDER BY file_path")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(p,)| p).collect())
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM code_chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(n)?)
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_with_vector(&self) -> Result<usize> {
        let n: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM code_chunks WHERE embedding IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(usize::try_from(n)?)
    }
}
