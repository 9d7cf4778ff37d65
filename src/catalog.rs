//! Catalog commands: document/library listings, single-document dump, and
//! explicit deletion.

use anyhow::Result;

use crate::error::StoreError;
use crate::store::Store;

pub async fn run_get(store: &Store, doc_id: &str) -> Result<()> {
    let chunks = store.get_document(doc_id).await?;
    if chunks.is_empty() {
        return Err(StoreError::NotFound(doc_id.to_string()).into());
    }

    let first = &chunks[0];
    println!("doc_id:        {}", first.doc_id);
    println!("title:         {}", first.title);
    println!("source:        {}", first.source);
    println!("library:       {}", first.library);
    println!("file_type:     {}", first.file_type);
    println!("content_hash:  {}", first.content_hash);
    println!("created_at:    {}", first.created_at);
    println!("last_modified: {}", first.last_modified);
    println!("chunks:        {}", chunks.len());

    for chunk in &chunks {
        println!("\n--- chunk {} ({}) ---", chunk.chunk_index, chunk.id);
        println!("{}", chunk.content);
    }
    Ok(())
}

pub async fn run_documents(
    store: &Store,
    library: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<()> {
    let docs = store.list_documents(library, limit, offset).await?;
    if docs.is_empty() {
        println!("No documents indexed.");
        return Ok(());
    }

    for doc in &docs {
        println!(
            "{}  [{}] {} ({} chunks, {}) {}",
            doc.doc_id, doc.library, doc.title, doc.chunk_count, doc.file_type, doc.source
        );
    }
    println!("\n{} document(s)", docs.len());
    Ok(())
}

pub async fn run_libraries(store: &Store) -> Result<()> {
    let libraries = store.list_libraries().await?;
    if libraries.is_empty() {
        println!("No libraries.");
        return Ok(());
    }

    println!("{:<24} {:>10} {:>10}", "LIBRARY", "DOCUMENTS", "CHUNKS");
    for lib in &libraries {
        println!(
            "{:<24} {:>10} {:>10}",
            lib.library, lib.document_count, lib.chunk_count
        );
    }
    Ok(())
}

pub async fn run_delete(store: &Store, doc_id: &str) -> Result<()> {
    let deleted = store.delete_document(doc_id).await?;
    if deleted == 0 {
        return Err(StoreError::NotFound(doc_id.to_string()).into());
    }
    println!("Deleted {} chunk(s) of document {}", deleted, doc_id);
    Ok(())
}
