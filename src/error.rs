//! Domain error taxonomy.
//!
//! Single-document ingestion fails fast with [`IngestionError`]; bulk
//! ingestion converts those failures into per-file entries and continues.
//! [`IngestionError::UnsupportedFormat`] is kept as its own variant so
//! callers can distinguish "this format isn't supported" from "something
//! went wrong" without string matching.

use thiserror::Error;

/// Failure in the tokenizer backing a [`crate::token::TokenMeasurer`].
#[derive(Debug, Error)]
#[error("tokenization failed: {0}")]
pub struct TokenizeError(pub String);

/// Text extraction failure for one source.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file extension: {0:?}")]
    UnsupportedExtension(String),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),

    #[error("HTML extraction failed: {0}")]
    Html(String),
}

/// Persistence-layer failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("document not found: {0}")]
    NotFound(String),
}

/// Embedding backend failure.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider is disabled; set [embedding] provider in the config")]
    Disabled,

    #[error("OPENAI_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("embedding request failed: {0}")]
    Request(String),

    #[error("embedding API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
}

/// Failure in the single-document ingestion pipeline.
///
/// Every variant names the offending source so bulk error reports and CLI
/// messages are self-describing. Underlying causes are preserved through
/// `source()` for diagnostics.
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("unsupported file extension {extension:?} for {source_id:?}")]
    UnsupportedFormat { source_id: String, extension: String },

    #[error("failed to fetch {source_id:?}")]
    Fetch {
        source_id: String,
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("conversion failed for {source_id:?}")]
    Convert {
        source_id: String,
        #[source]
        cause: ExtractError,
    },

    #[error(
        "no text could be extracted from {source_id:?}; \
         the file may be scanned/image-based, password-protected, or empty"
    )]
    EmptyExtraction { source_id: String },

    #[error("chunking failed for {source_id:?}")]
    Chunk {
        source_id: String,
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("no usable chunks produced from {source_id:?}")]
    NoChunks { source_id: String },

    #[error("embedding failed for {source_id:?}")]
    Embed {
        source_id: String,
        #[source]
        cause: EmbeddingError,
    },

    #[error("embedding count mismatch for {source_id:?}: {expected} chunks, {got} vectors")]
    EmbeddingMismatch {
        source_id: String,
        expected: usize,
        got: usize,
    },

    #[error("store write failed for {source_id:?}")]
    Store {
        source_id: String,
        #[source]
        cause: StoreError,
    },

    #[error("folder not found or not a directory: {0:?}")]
    FolderNotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn ingestion_errors_name_the_offending_source() {
        let err = IngestionError::UnsupportedFormat {
            source_id: "archive.bin".to_string(),
            extension: "bin".to_string(),
        };
        assert!(err.to_string().contains("archive.bin"));
        assert!(err.source().is_none());

        let err = IngestionError::EmptyExtraction {
            source_id: "scan.pdf".to_string(),
        };
        assert!(err.to_string().contains("scan.pdf"));

        let err = IngestionError::EmbeddingMismatch {
            source_id: "doc.md".to_string(),
            expected: 4,
            got: 3,
        };
        assert!(err.to_string().contains("4 chunks, 3 vectors"));
    }

    #[test]
    fn causes_are_reachable_through_the_error_chain() {
        let err = IngestionError::Convert {
            source_id: "slides.pptx".to_string(),
            cause: ExtractError::Ooxml("bad zip".to_string()),
        };
        assert!(err.to_string().contains("slides.pptx"));
        assert!(err.source().unwrap().to_string().contains("bad zip"));

        let err = IngestionError::Embed {
            source_id: "doc.md".to_string(),
            cause: EmbeddingError::Disabled,
        };
        assert!(matches!(
            err.source().unwrap().downcast_ref::<EmbeddingError>(),
            Some(EmbeddingError::Disabled)
        ));
    }
}
