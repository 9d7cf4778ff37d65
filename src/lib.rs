//! docshelf: a personal semantic-search index.
//!
//! Ingests files, URLs, and pasted text into token-bounded, embedded
//! chunks stored in SQLite, deduplicated by content hash per
//! `(source, library)` key, and searchable by keyword (FTS5), embedding
//! similarity, or a hybrid of both.

pub mod catalog;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod search;
pub mod store;
pub mod token;
