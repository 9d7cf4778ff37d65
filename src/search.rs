//! Search across indexed chunks: keyword (FTS5 bm25), semantic (query
//! embedding + cosine), and a hybrid merge of the two.
//!
//! Hybrid scoring min-max normalizes each channel's scores to `[0, 1]`,
//! then combines them as `(1 - alpha) * keyword + alpha * semantic`. A
//! chunk found by only one channel contributes 0 for the missing side.

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::store::{SearchHit, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Keyword,
    Semantic,
    Hybrid,
}

impl FromStr for SearchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "keyword" => Ok(SearchMode::Keyword),
            "semantic" => Ok(SearchMode::Semantic),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => bail!("Unknown search mode: '{}'. Must be keyword, semantic, or hybrid.", other),
        }
    }
}

pub async fn search(
    store: &Store,
    embedder: &Arc<dyn EmbeddingProvider>,
    retrieval: &RetrievalConfig,
    query: &str,
    mode: SearchMode,
    library: Option<&str>,
    limit: usize,
) -> Result<Vec<SearchHit>> {
    match mode {
        SearchMode::Keyword => Ok(store.keyword_search(query, limit, library).await?),
        SearchMode::Semantic => {
            let query_vec = embed_query(embedder, query).await?;
            Ok(store.semantic_search(&query_vec, limit, library).await?)
        }
        SearchMode::Hybrid => {
            // Oversample each channel so the merge has candidates that only
            // one side ranked highly.
            let pool = limit.saturating_mul(4).max(20);
            let keyword = store.keyword_search(query, pool, library).await?;
            let query_vec = embed_query(embedder, query).await?;
            let semantic = store.semantic_search(&query_vec, pool, library).await?;
            debug!(
                keyword = keyword.len(),
                semantic = semantic.len(),
                alpha = retrieval.hybrid_alpha,
                "merging hybrid candidates"
            );
            Ok(hybrid_merge(keyword, semantic, retrieval.hybrid_alpha, limit))
        }
    }
}

async fn embed_query(embedder: &Arc<dyn EmbeddingProvider>, query: &str) -> Result<Vec<f32>> {
    if embedder.dims() == 0 {
        bail!(
            "Semantic search requires an embedding provider; \
             set [embedding] provider in the config."
        );
    }
    Ok(embedder.embed_query(query).await?)
}

/// Min-max normalize scores in place. A single-hit (or constant-score)
/// list normalizes to 1.0 for every entry.
fn normalize_scores(hits: &mut [SearchHit]) {
    let Some(max) = hits.iter().map(|h| h.score).fold(None, |acc: Option<f64>, s| {
        Some(acc.map_or(s, |a| a.max(s)))
    }) else {
        return;
    };
    let min = hits
        .iter()
        .map(|h| h.score)
        .fold(f64::INFINITY, f64::min);

    let range = max - min;
    for hit in hits.iter_mut() {
        hit.score = if range > f64::EPSILON {
            (hit.score - min) / range
        } else {
            1.0
        };
    }
}

fn hybrid_merge(
    mut keyword: Vec<SearchHit>,
    mut semantic: Vec<SearchHit>,
    alpha: f64,
    limit: usize,
) -> Vec<SearchHit> {
    normalize_scores(&mut keyword);
    normalize_scores(&mut semantic);

    let mut merged: HashMap<String, SearchHit> = HashMap::new();

    for mut hit in keyword {
        hit.score *= 1.0 - alpha;
        merged.insert(hit.chunk_id.clone(), hit);
    }
    for mut hit in semantic {
        let weighted = hit.score * alpha;
        match merged.get_mut(&hit.chunk_id) {
            Some(existing) => {
                existing.score += weighted;
                // Prefer the keyword channel's highlighted snippet.
            }
            None => {
                hit.score = weighted;
                merged.insert(hit.chunk_id.clone(), hit);
            }
        }
    }

    let mut hits: Vec<SearchHit> = merged.into_values().collect();
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk_id.cmp(&b.chunk_id))
    });
    hits.truncate(limit);
    hits
}

pub fn print_hits(hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("No results.");
        return;
    }
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{:2}. [{:.4}] {} ({})",
            i + 1,
            hit.score,
            if hit.title.is_empty() { &hit.source } else { &hit.title },
            hit.library
        );
        println!("    source: {}", hit.source);
        println!("    doc:    {}", hit.doc_id);
        if !hit.snippet.is_empty() {
            let one_line = hit.snippet.replace('\n', " ");
            println!("    {}", one_line.trim());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(chunk_id: &str, score: f64) -> SearchHit {
        SearchHit {
            chunk_id: chunk_id.to_string(),
            doc_id: "d".to_string(),
            library: "default".to_string(),
            source: "s".to_string(),
            title: "t".to_string(),
            score,
            snippet: String::new(),
        }
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("keyword".parse::<SearchMode>().unwrap(), SearchMode::Keyword);
        assert_eq!("hybrid".parse::<SearchMode>().unwrap(), SearchMode::Hybrid);
        assert!("fuzzy".parse::<SearchMode>().is_err());
    }

    #[test]
    fn normalization_maps_to_unit_interval() {
        let mut hits = vec![hit("a", -8.0), hit("b", -2.0), hit("c", 4.0)];
        normalize_scores(&mut hits);
        assert!((hits[0].score - 0.0).abs() < 1e-9);
        assert!((hits[1].score - 0.5).abs() < 1e-9);
        assert!((hits[2].score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn normalization_of_constant_scores() {
        let mut hits = vec![hit("a", 3.0), hit("b", 3.0)];
        normalize_scores(&mut hits);
        assert_eq!(hits[0].score, 1.0);
        assert_eq!(hits[1].score, 1.0);
    }

    #[test]
    fn hybrid_merge_weights_channels() {
        // "both" tops each channel; "kw-only" and "sem-only" get one side.
        let keyword = vec![hit("both", 10.0), hit("kw-only", 5.0)];
        let semantic = vec![hit("both", 0.9), hit("sem-only", 0.5)];
        let merged = hybrid_merge(keyword, semantic, 0.6, 10);

        assert_eq!(merged[0].chunk_id, "both");
        assert!((merged[0].score - 1.0).abs() < 1e-9); // 0.4*1.0 + 0.6*1.0

        let kw_only = merged.iter().find(|h| h.chunk_id == "kw-only").unwrap();
        assert!((kw_only.score - 0.0).abs() < 1e-9); // normalized min, no sem side

        let sem_only = merged.iter().find(|h| h.chunk_id == "sem-only").unwrap();
        assert!((sem_only.score - 0.0).abs() < 1e-9);
    }

    #[test]
    fn hybrid_merge_respects_limit() {
        let keyword: Vec<SearchHit> = (0..30).map(|i| hit(&format!("k{i}"), i as f64)).collect();
        let merged = hybrid_merge(keyword, Vec::new(), 0.5, 5);
        assert_eq!(merged.len(), 5);
        assert_eq!(merged[0].chunk_id, "k29");
    }

    #[test]
    fn alpha_zero_is_pure_keyword() {
        let keyword = vec![hit("k", 2.0)];
        let semantic = vec![hit("s", 0.99)];
        let merged = hybrid_merge(keyword, semantic, 0.0, 10);
        assert_eq!(merged[0].chunk_id, "k");
        assert_eq!(merged[0].score, 1.0);
        let s = merged.iter().find(|h| h.chunk_id == "s").unwrap();
        assert_eq!(s.score, 0.0);
    }
}
