//! SQLite-backed chunk store.
//!
//! One row per embedded chunk, mirrored into an FTS5 table for keyword
//! search. The store owns the dedup lookup, batch writes, document
//! deletion, listings, and both search channels (vector scan + BM25); the
//! rest of the system treats it as an opaque collaborator.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::StoreError;

/// One embedded chunk row.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: String,
    pub doc_id: String,
    pub library: String,
    pub source: String,
    pub content_hash: String,
    pub title: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub chunk_index: i64,
    pub created_at: String,
    pub metadata: String,
    pub file_type: String,
    pub last_modified: String,
    pub page: i64,
}

/// Document-level view grouped from chunk rows.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DocumentSummary {
    pub doc_id: String,
    pub source: String,
    pub title: String,
    pub library: String,
    pub content_hash: String,
    pub created_at: String,
    pub file_type: String,
    pub chunk_count: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct LibrarySummary {
    pub library: String,
    pub document_count: i64,
    pub chunk_count: i64,
}

/// One scored search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: String,
    pub doc_id: String,
    pub library: String,
    pub source: String,
    pub title: String,
    pub score: f64,
    pub snippet: String,
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database at `path` and apply the
    /// schema. Idempotent.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Sqlx(sqlx::Error::Io(e))
            })?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(StoreError::Sqlx)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                doc_id TEXT NOT NULL,
                library TEXT NOT NULL,
                source TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                chunk_index INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                file_type TEXT NOT NULL DEFAULT '',
                last_modified TEXT NOT NULL DEFAULT '',
                page INTEGER NOT NULL DEFAULT 0,
                UNIQUE(doc_id, chunk_index)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // FTS5 CREATE is not idempotent natively, so check first.
        let fts_exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
        )
        .fetch_one(&self.pool)
        .await?;

        if !fts_exists {
            sqlx::query(
                r#"
                CREATE VIRTUAL TABLE chunks_fts USING fts5(
                    chunk_id UNINDEXED,
                    doc_id UNINDEXED,
                    library UNINDEXED,
                    content
                )
                "#,
            )
            .execute(&self.pool)
            .await?;
        }

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chunks_source_library ON chunks(source, library)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_doc_id ON chunks(doc_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_library ON chunks(library)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Point lookup on the `(source, library)` dedup key.
    pub async fn find_existing(
        &self,
        source: &str,
        library: &str,
    ) -> Result<Option<(String, String)>, StoreError> {
        let row = sqlx::query(
            "SELECT doc_id, content_hash FROM chunks WHERE source = ? AND library = ? LIMIT 1",
        )
        .bind(source)
        .bind(library)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| (r.get("doc_id"), r.get("content_hash"))))
    }

    /// Durable batch insert of one document's chunk rows. No-op on empty
    /// input.
    pub async fn upsert_chunks(&self, chunks: &[ChunkRecord]) -> Result<(), StoreError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks
                    (id, doc_id, library, source, content_hash, title, content,
                     embedding, chunk_index, created_at, metadata, file_type,
                     last_modified, page)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.doc_id)
            .bind(&chunk.library)
            .bind(&chunk.source)
            .bind(&chunk.content_hash)
            .bind(&chunk.title)
            .bind(&chunk.content)
            .bind(vec_to_blob(&chunk.embedding))
            .bind(chunk.chunk_index)
            .bind(&chunk.created_at)
            .bind(&chunk.metadata)
            .bind(&chunk.file_type)
            .bind(&chunk.last_modified)
            .bind(chunk.page)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO chunks_fts (chunk_id, doc_id, library, content) VALUES (?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.doc_id)
            .bind(&chunk.library)
            .bind(&chunk.content)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(
            chunks = chunks.len(),
            doc_id = %chunks[0].doc_id,
            "wrote chunk batch"
        );
        Ok(())
    }

    /// Remove every row belonging to one document. Returns the number of
    /// chunk rows deleted.
    pub async fn delete_document(&self, doc_id: &str) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks_fts WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM chunks WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        debug!(doc_id, deleted, "deleted document");
        Ok(deleted)
    }

    /// All chunks of one document, ordered by `chunk_index`.
    pub async fn get_document(&self, doc_id: &str) -> Result<Vec<ChunkRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, doc_id, library, source, content_hash, title, content,
                   embedding, chunk_index, created_at, metadata, file_type,
                   last_modified, page
            FROM chunks WHERE doc_id = ? ORDER BY chunk_index ASC
            "#,
        )
        .bind(doc_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                ChunkRecord {
                    id: row.get("id"),
                    doc_id: row.get("doc_id"),
                    library: row.get("library"),
                    source: row.get("source"),
                    content_hash: row.get("content_hash"),
                    title: row.get("title"),
                    content: row.get("content"),
                    embedding: blob_to_vec(&blob),
                    chunk_index: row.get("chunk_index"),
                    created_at: row.get("created_at"),
                    metadata: row.get("metadata"),
                    file_type: row.get("file_type"),
                    last_modified: row.get("last_modified"),
                    page: row.get("page"),
                }
            })
            .collect())
    }

    /// Indexed documents, newest first, one entry per `doc_id`.
    pub async fn list_documents(
        &self,
        library: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DocumentSummary>, StoreError> {
        let base = r#"
            SELECT doc_id, source, title, library, content_hash, file_type,
                   MAX(created_at) AS created_at, COUNT(*) AS chunk_count
            FROM chunks
        "#;
        let tail = " GROUP BY doc_id ORDER BY created_at DESC LIMIT ? OFFSET ?";

        let rows = if let Some(lib) = library {
            sqlx::query(&format!("{base} WHERE library = ? {tail}"))
                .bind(lib)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query(&format!("{base} {tail}"))
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
        };

        Ok(rows
            .iter()
            .map(|row| DocumentSummary {
                doc_id: row.get("doc_id"),
                source: row.get("source"),
                title: row.get("title"),
                library: row.get("library"),
                content_hash: row.get("content_hash"),
                created_at: row.get("created_at"),
                file_type: row.get("file_type"),
                chunk_count: row.get("chunk_count"),
            })
            .collect())
    }

    /// Per-library document and chunk counts.
    pub async fn list_libraries(&self) -> Result<Vec<LibrarySummary>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT library,
                   COUNT(DISTINCT doc_id) AS document_count,
                   COUNT(*) AS chunk_count
            FROM chunks GROUP BY library ORDER BY library ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| LibrarySummary {
                library: row.get("library"),
                document_count: row.get("document_count"),
                chunk_count: row.get("chunk_count"),
            })
            .collect())
    }

    /// Vector search: cosine similarity between the query vector and every
    /// stored embedding, best first.
    pub async fn semantic_search(
        &self,
        query_vec: &[f32],
        top_k: usize,
        library: Option<&str>,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let base = r#"
            SELECT id, doc_id, library, source, title, embedding,
                   COALESCE(substr(content, 1, 240), '') AS snippet
            FROM chunks
        "#;

        let rows = if let Some(lib) = library {
            sqlx::query(&format!("{base} WHERE library = ?"))
                .bind(lib)
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query(base).fetch_all(&self.pool).await?
        };

        let mut hits: Vec<SearchHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                SearchHit {
                    chunk_id: row.get("id"),
                    doc_id: row.get("doc_id"),
                    library: row.get("library"),
                    source: row.get("source"),
                    title: row.get("title"),
                    score: cosine_similarity(query_vec, &vec) as f64,
                    snippet: row.get("snippet"),
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    /// BM25 keyword search over the FTS5 mirror, best first. Query terms
    /// are matched literally; FTS5 operator syntax is not exposed.
    pub async fn keyword_search(
        &self,
        query: &str,
        top_k: usize,
        library: Option<&str>,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let query = fts_quote(query);
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let base = r#"
            SELECT chunks_fts.chunk_id AS chunk_id, chunks_fts.doc_id AS doc_id,
                   chunks_fts.library AS library, c.source AS source, c.title AS title,
                   chunks_fts.rank AS rank,
                   snippet(chunks_fts, 3, '>>>', '<<<', '...', 48) AS snippet
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.chunk_id
            WHERE chunks_fts MATCH ?
        "#;
        let tail = " ORDER BY chunks_fts.rank LIMIT ?";

        let rows = if let Some(lib) = library {
            sqlx::query(&format!("{base} AND chunks_fts.library = ? {tail}"))
                .bind(&query)
                .bind(lib)
                .bind(top_k as i64)
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query(&format!("{base} {tail}"))
                .bind(&query)
                .bind(top_k as i64)
                .fetch_all(&self.pool)
                .await?
        };

        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                SearchHit {
                    chunk_id: row.get("chunk_id"),
                    doc_id: row.get("doc_id"),
                    library: row.get("library"),
                    source: row.get("source"),
                    title: row.get("title"),
                    score: -rank, // negate so higher = better
                    snippet: row.get("snippet"),
                }
            })
            .collect())
    }
}

/// Quote every whitespace-separated term so user input matches literally
/// instead of being parsed as FTS5 query syntax (quotes, `-`, `NEAR`, ...).
fn fts_quote(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fts_quote_neutralizes_operator_syntax() {
        assert_eq!(fts_quote("zebra"), "\"zebra\"");
        assert_eq!(fts_quote("kayak -rental"), "\"kayak\" \"-rental\"");
        assert_eq!(fts_quote("a NEAR b"), "\"a\" \"NEAR\" \"b\"");
        assert_eq!(fts_quote("say \"hi"), "\"say\" \"\"\"hi\"");
        assert_eq!(fts_quote("   "), "");
    }
}
