//! Content-addressed ingestion pipeline.
//!
//! Single documents run through a fixed sequence:
//! fetch, dedup against the `(source, library)` key, convert to text,
//! chunk, embed, write, then best-effort deletion of the replaced
//! document. A content hash match short-circuits the pipeline before any
//! conversion work. Bulk folder ingestion fans files out under a
//! concurrency bound and never lets one file's failure cancel another.

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::chunk::Chunker;
use crate::embedding::EmbeddingProvider;
use crate::error::IngestionError;
use crate::extract::{extract_text, is_supported_extension};
use crate::store::{ChunkRecord, Store};

/// Outcome of one document's trip through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    /// First time this `(source, library)` key was seen.
    Indexed,
    /// Key existed with a different content hash; old chunks removed.
    Replaced,
    /// Key existed with an identical content hash; nothing written.
    Skipped,
}

impl fmt::Display for IngestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestStatus::Indexed => write!(f, "indexed"),
            IngestStatus::Replaced => write!(f, "replaced"),
            IngestStatus::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestResult {
    pub status: IngestStatus,
    pub doc_id: String,
    pub source: String,
    pub library: String,
    pub title: String,
    pub chunk_count: usize,
}

#[derive(Debug, Serialize)]
pub struct IngestFailure {
    pub file: String,
    pub error: String,
}

/// Aggregate of a bulk folder run: per-file results for the files that
/// went through, `{file, error}` entries for the ones that did not. The
/// run itself succeeds as long as the folder was readable.
#[derive(Debug, Default, Serialize)]
pub struct BulkIngestResult {
    pub total: usize,
    pub indexed: usize,
    pub replaced: usize,
    pub skipped: usize,
    pub failed: usize,
    pub results: Vec<IngestResult>,
    pub failures: Vec<IngestFailure>,
}

/// What the fetch step produced: raw bytes that still need conversion, or
/// inline text that is already plain and must not go through the converter.
enum Payload {
    Bytes(Vec<u8>),
    Inline(String),
}

struct Fetched {
    payload: Payload,
    extension: String,
    last_modified: String,
}

pub struct Ingestor {
    store: Arc<Store>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: Arc<Chunker>,
    http: reqwest::Client,
}

impl Ingestor {
    pub fn new(
        store: Arc<Store>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunker: Arc<Chunker>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            store,
            embedder,
            chunker,
            http,
        }
    }

    /// Ingest one file path or URL.
    pub async fn ingest(
        &self,
        source: &str,
        library: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<IngestResult, IngestionError> {
        let fetched = self.fetch(source).await?;
        self.run_pipeline(source, library, fetched, metadata).await
    }

    /// Ingest inline text under a caller-chosen source label. Dedup runs on
    /// the UTF-8 bytes of `content`, same lifecycle as file ingestion.
    pub async fn ingest_content(
        &self,
        content: &str,
        source: &str,
        library: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<IngestResult, IngestionError> {
        let extension = extension_of(source)
            .filter(|e| is_supported_extension(e))
            .unwrap_or_else(|| "text".to_string());

        let fetched = Fetched {
            payload: Payload::Inline(content.to_string()),
            extension,
            last_modified: Utc::now().to_rfc3339(),
        };
        self.run_pipeline(source, library, fetched, metadata).await
    }

    /// Ingest every supported file directly under (or recursively below)
    /// `folder`, at most `max_concurrency` files in flight at once.
    ///
    /// Per-file failures are collected, not propagated; the only hard error
    /// is a missing folder.
    pub async fn ingest_folder(
        &self,
        folder: &Path,
        library: &str,
        metadata: Option<serde_json::Value>,
        recursive: bool,
        max_concurrency: usize,
    ) -> Result<BulkIngestResult, IngestionError> {
        if !folder.is_dir() {
            return Err(IngestionError::FolderNotFound(
                folder.display().to_string(),
            ));
        }

        let mut files: Vec<PathBuf> = Vec::new();
        let walker = if recursive {
            WalkDir::new(folder)
        } else {
            WalkDir::new(folder).max_depth(1)
        };
        for entry in walker.into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if extension_of_path(path)
                .map(|e| is_supported_extension(&e))
                .unwrap_or(false)
            {
                files.push(path.to_path_buf());
            }
        }
        files.sort();

        if files.is_empty() {
            warn!(folder = %folder.display(), "no supported files found");
            return Ok(BulkIngestResult::default());
        }

        info!(
            folder = %folder.display(),
            files = files.len(),
            max_concurrency,
            "starting bulk ingestion"
        );

        let metadata = &metadata;
        let outcomes: Vec<(String, Result<IngestResult, IngestionError>)> =
            stream::iter(files.into_iter().map(|path| {
                let source = path.display().to_string();
                async move {
                    let res = self.ingest(&source, library, metadata.clone()).await;
                    (source, res)
                }
            }))
            .buffer_unordered(max_concurrency.max(1))
            .collect()
            .await;

        let mut result = BulkIngestResult {
            total: outcomes.len(),
            ..Default::default()
        };
        for (file, outcome) in outcomes {
            match outcome {
                Ok(r) => {
                    match r.status {
                        IngestStatus::Indexed => result.indexed += 1,
                        IngestStatus::Replaced => result.replaced += 1,
                        IngestStatus::Skipped => result.skipped += 1,
                    }
                    result.results.push(r);
                }
                Err(e) => {
                    warn!(file = %file, error = %e, "file ingestion failed");
                    result.failed += 1;
                    result.failures.push(IngestFailure {
                        file,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            total = result.total,
            indexed = result.indexed,
            replaced = result.replaced,
            skipped = result.skipped,
            failed = result.failed,
            "bulk ingestion finished"
        );
        Ok(result)
    }

    async fn run_pipeline(
        &self,
        source: &str,
        library: &str,
        fetched: Fetched,
        metadata: Option<serde_json::Value>,
    ) -> Result<IngestResult, IngestionError> {
        let content_hash = match &fetched.payload {
            Payload::Bytes(bytes) => sha256_hex(bytes),
            Payload::Inline(text) => sha256_hex(text.as_bytes()),
        };

        // Dedup before any conversion work.
        let existing = self
            .store
            .find_existing(source, library)
            .await
            .map_err(|e| IngestionError::Store {
                source_id: source.to_string(),
                cause: e,
            })?;

        if let Some((old_doc_id, old_hash)) = &existing {
            if *old_hash == content_hash {
                info!(source, library, doc_id = %old_doc_id, "unchanged; skipping");
                return Ok(IngestResult {
                    status: IngestStatus::Skipped,
                    doc_id: old_doc_id.clone(),
                    source: source.to_string(),
                    library: library.to_string(),
                    title: String::new(),
                    chunk_count: 0,
                });
            }
        }

        let text = match &fetched.payload {
            Payload::Bytes(bytes) => {
                extract_text(bytes, &fetched.extension).map_err(|e| IngestionError::Convert {
                    source_id: source.to_string(),
                    cause: e,
                })?
            }
            // Inline content is already text; the extension is only a
            // file_type label here, never a parsing instruction.
            Payload::Inline(text) => text.clone(),
        };
        if text.trim().is_empty() {
            return Err(IngestionError::EmptyExtraction {
                source_id: source.to_string(),
            });
        }

        let title = extract_title(&text, source);

        // Chunking is CPU-bound; keep it off the async workers.
        let chunker = Arc::clone(&self.chunker);
        let text_owned = text.clone();
        let chunks = tokio::task::spawn_blocking(move || chunker.chunk(&text_owned))
            .await
            .map_err(|e| IngestionError::Chunk {
                source_id: source.to_string(),
                cause: Box::new(e),
            })?
            .map_err(|e| IngestionError::Chunk {
                source_id: source.to_string(),
                cause: Box::new(e),
            })?;

        if chunks.is_empty() {
            return Err(IngestionError::NoChunks {
                source_id: source.to_string(),
            });
        }
        debug!(source, chunks = chunks.len(), "chunked document");

        let vectors = self
            .embedder
            .embed_documents(&chunks)
            .await
            .map_err(|e| IngestionError::Embed {
                source_id: source.to_string(),
                cause: e,
            })?;
        if vectors.len() != chunks.len() {
            return Err(IngestionError::EmbeddingMismatch {
                source_id: source.to_string(),
                expected: chunks.len(),
                got: vectors.len(),
            });
        }

        let doc_id = Uuid::new_v4().to_string();
        let created_at = Utc::now().to_rfc3339();
        let metadata_json = metadata
            .as_ref()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "{}".to_string());
        let file_type = if is_supported_extension(&fetched.extension) {
            fetched.extension.clone()
        } else {
            "text".to_string()
        };

        let records: Vec<ChunkRecord> = chunks
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (content, embedding))| ChunkRecord {
                id: Uuid::new_v4().to_string(),
                doc_id: doc_id.clone(),
                library: library.to_string(),
                source: source.to_string(),
                content_hash: content_hash.clone(),
                title: title.clone(),
                content,
                embedding,
                chunk_index: i as i64,
                created_at: created_at.clone(),
                metadata: metadata_json.clone(),
                file_type: file_type.clone(),
                last_modified: fetched.last_modified.clone(),
                page: 0,
            })
            .collect();
        let chunk_count = records.len();

        self.store
            .upsert_chunks(&records)
            .await
            .map_err(|e| IngestionError::Store {
                source_id: source.to_string(),
                cause: e,
            })?;

        // New chunks are durable; removal of the replaced document is
        // best-effort and never fails the ingestion.
        let status = if let Some((old_doc_id, _)) = existing {
            if let Err(e) = self.store.delete_document(&old_doc_id).await {
                warn!(
                    source,
                    old_doc_id = %old_doc_id,
                    error = %e,
                    "failed to delete replaced document; stale chunks remain"
                );
            }
            IngestStatus::Replaced
        } else {
            IngestStatus::Indexed
        };

        info!(source, library, doc_id = %doc_id, chunks = chunk_count, %status, "ingested");
        Ok(IngestResult {
            status,
            doc_id,
            source: source.to_string(),
            library: library.to_string(),
            title,
            chunk_count,
        })
    }

    async fn fetch(&self, source: &str) -> Result<Fetched, IngestionError> {
        if source.starts_with("http://") || source.starts_with("https://") {
            self.fetch_url(source).await
        } else {
            self.fetch_file(source).await
        }
    }

    async fn fetch_file(&self, source: &str) -> Result<Fetched, IngestionError> {
        let path = Path::new(source);
        let extension = match extension_of_path(path) {
            Some(ext) if is_supported_extension(&ext) => ext,
            other => {
                return Err(IngestionError::UnsupportedFormat {
                    source_id: source.to_string(),
                    extension: other.unwrap_or_default(),
                })
            }
        };

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| IngestionError::Fetch {
                source_id: source.to_string(),
                cause: Box::new(e),
            })?;

        let last_modified = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
            .unwrap_or_else(|_| Utc::now().to_rfc3339());

        Ok(Fetched {
            payload: Payload::Bytes(bytes),
            extension,
            last_modified,
        })
    }

    async fn fetch_url(&self, source: &str) -> Result<Fetched, IngestionError> {
        let response = self
            .http
            .get(source)
            .send()
            .await
            .map_err(|e| IngestionError::Fetch {
                source_id: source.to_string(),
                cause: Box::new(e),
            })?;

        if !response.status().is_success() {
            return Err(IngestionError::Fetch {
                source_id: source.to_string(),
                cause: format!("HTTP status {}", response.status()).into(),
            });
        }

        let last_modified = response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| Utc::now().to_rfc3339());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| IngestionError::Fetch {
                source_id: source.to_string(),
                cause: Box::new(e),
            })?
            .to_vec();

        // URLs without a recognizable extension are treated as HTML pages.
        let extension = extension_of(source.split(['?', '#']).next().unwrap_or(source))
            .filter(|e| is_supported_extension(e))
            .unwrap_or_else(|| "html".to_string());

        Ok(Fetched {
            payload: Payload::Bytes(bytes),
            extension,
            last_modified,
        })
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn extension_of_path(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn extension_of(source: &str) -> Option<String> {
    let segment = source.rsplit(['/', '\\']).next().unwrap_or(source);
    let (_, ext) = segment.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Title from the first Markdown heading anywhere in the text, otherwise
/// the last path or URL segment of the source.
pub fn extract_title(text: &str, source: &str) -> String {
    for line in text.lines() {
        if let Some(rest) = line.trim().strip_prefix('#') {
            let title: String = rest.trim_start_matches('#').trim().chars().take(200).collect();
            if !title.is_empty() {
                return title;
            }
        }
    }

    source
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(source)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_prefers_first_heading() {
        let text = "## Getting Started\n\nBody text here.";
        assert_eq!(extract_title(text, "/tmp/guide.md"), "Getting Started");
    }

    #[test]
    fn title_falls_back_to_path_segment() {
        let text = "Plain text with no heading.";
        assert_eq!(extract_title(text, "/docs/manual.txt"), "manual.txt");
        assert_eq!(
            extract_title(text, "https://example.com/a/page.html"),
            "page.html"
        );
    }

    #[test]
    fn title_is_capped_at_200_chars() {
        let text = format!("# {}", "t".repeat(500));
        assert_eq!(extract_title(&text, "x").len(), 200);
    }

    #[test]
    fn heading_anywhere_in_text_wins_over_fallback() {
        let text = "intro paragraph\n# Late Heading";
        assert_eq!(extract_title(text, "notes.txt"), "Late Heading");
        assert_eq!(extract_title("no headings at all", "notes.txt"), "notes.txt");
    }

    #[test]
    fn extension_parsing() {
        assert_eq!(extension_of("report.PDF"), Some("pdf".to_string()));
        assert_eq!(
            extension_of("https://example.com/doc.html"),
            Some("html".to_string())
        );
        assert_eq!(extension_of("no-extension"), None);
        assert_eq!(extension_of("paste-1"), None);
    }

    #[test]
    fn sha256_is_stable() {
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_ne!(sha256_hex(b"hello"), sha256_hex(b"hello!"));
    }
}
