//! Token-bounded recursive text chunker.
//!
//! Splits document text into chunks that respect a configured token budget,
//! descending through a separator hierarchy (paragraph break, line break,
//! space, then a token-window fallback) and assembling pieces with a
//! merge-with-overlap pass so consecutive chunks share bounded context.
//!
//! Pieces that had to be split at a deeper separator level are flushed as
//! their own chunk group; they are never re-joined with a shallower
//! separator than the one that produced them.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::config::ChunkingConfig;
use crate::error::TokenizeError;
use crate::token::TokenMeasurer;

/// Separator hierarchy for recursive splitting. The token-window fallback
/// sits below the last entry.
const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

pub struct Chunker {
    measurer: Arc<dyn TokenMeasurer>,
    chunk_size: usize,
    overlap: usize,
    min_tokens: usize,
}

/// Memoizes token lengths for the duration of one `chunk` call so overlap
/// trimming does not re-tokenize already-measured pieces.
struct LenCache<'a> {
    measurer: &'a dyn TokenMeasurer,
    lens: HashMap<String, usize>,
}

impl<'a> LenCache<'a> {
    fn new(measurer: &'a dyn TokenMeasurer) -> Self {
        Self {
            measurer,
            lens: HashMap::new(),
        }
    }

    fn len(&mut self, text: &str) -> Result<usize, TokenizeError> {
        if let Some(n) = self.lens.get(text) {
            return Ok(*n);
        }
        let n = self.measurer.token_len(text)?;
        self.lens.insert(text.to_string(), n);
        Ok(n)
    }
}

impl Chunker {
    pub fn new(measurer: Arc<dyn TokenMeasurer>, config: &ChunkingConfig) -> Self {
        let chunk_size = config.chunk_size_tokens.max(1);
        Self {
            measurer,
            chunk_size,
            // The merge pass loops if overlap >= chunk_size; config load
            // rejects that, this clamp covers direct construction.
            overlap: config.overlap_tokens.min(chunk_size - 1),
            min_tokens: config.min_tokens,
        }
    }

    /// Split `text` into token-bounded chunks suitable for embedding.
    ///
    /// Returns an empty vector for empty or whitespace-only input. Chunks
    /// below the min-token floor are dropped, unless that would discard the
    /// entire document, in which case the unfiltered chunks are returned so
    /// short documents remain searchable.
    pub fn chunk(&self, text: &str) -> Result<Vec<String>, TokenizeError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut cache = LenCache::new(self.measurer.as_ref());
        let raw = self.split_level(text, 0, &mut cache)?;

        let mut kept = Vec::with_capacity(raw.len());
        for c in &raw {
            if cache.len(c)? >= self.min_tokens {
                kept.push(c.clone());
            }
        }

        if kept.is_empty() && !raw.is_empty() {
            tracing::debug!(
                min_tokens = self.min_tokens,
                chunks = raw.len(),
                "document below min-token floor; keeping undersized chunks"
            );
            return Ok(raw);
        }

        tracing::debug!(raw = raw.len(), kept = kept.len(), "chunked text");
        Ok(kept)
    }

    /// Split at one separator level, recursing into oversized pieces with
    /// the next separator and merging the rest with the current one.
    fn split_level(
        &self,
        text: &str,
        level: usize,
        cache: &mut LenCache<'_>,
    ) -> Result<Vec<String>, TokenizeError> {
        let Some(sep) = SEPARATORS.get(level) else {
            // Atomic span with no separators left: tokenize once and emit
            // sliding windows. Guarantees termination on pathological input.
            let step = (self.chunk_size - self.overlap).max(1);
            return self.measurer.window_split(text, self.chunk_size, step);
        };

        let mut out = Vec::new();
        let mut group: Vec<&str> = Vec::new();

        for piece in text.split(sep) {
            if piece.is_empty() {
                continue;
            }
            if cache.len(piece)? > self.chunk_size {
                if !group.is_empty() {
                    self.merge_with_overlap(&group, sep, cache, &mut out)?;
                    group.clear();
                }
                out.extend(self.split_level(piece, level + 1, cache)?);
            } else {
                group.push(piece);
            }
        }

        if !group.is_empty() {
            self.merge_with_overlap(&group, sep, cache, &mut out)?;
        }

        Ok(out)
    }

    /// Accumulate pieces into chunks of at most `chunk_size` tokens
    /// (counting the separator between pieces), retaining a suffix of each
    /// flushed chunk within the overlap budget as the start of the next.
    fn merge_with_overlap(
        &self,
        pieces: &[&str],
        sep: &str,
        cache: &mut LenCache<'_>,
        out: &mut Vec<String>,
    ) -> Result<(), TokenizeError> {
        let sep_tokens = cache.len(sep)?;
        // Token total of a buffer of `n` pieces summing to `tokens`,
        // including the separators joining them.
        let total = |n: usize, tokens: usize| tokens + sep_tokens * n.saturating_sub(1);

        let mut buf: VecDeque<(&str, usize)> = VecDeque::new();
        let mut buf_tokens = 0usize;

        let join = |buf: &VecDeque<(&str, usize)>| -> String {
            buf.iter()
                .map(|(p, _)| *p)
                .collect::<Vec<_>>()
                .join(sep)
        };

        for piece in pieces {
            let piece_tokens = cache.len(piece)?;

            if !buf.is_empty() && total(buf.len() + 1, buf_tokens + piece_tokens) > self.chunk_size
            {
                out.push(join(&buf));
                // Retain a suffix of the flushed pieces as overlap.
                while !buf.is_empty() && total(buf.len(), buf_tokens) > self.overlap {
                    if let Some((_, n)) = buf.pop_front() {
                        buf_tokens -= n;
                    }
                }
            }

            buf.push_back((piece, piece_tokens));
            buf_tokens += piece_tokens;

            // If the retained overlap plus this piece still exceeds the
            // budget, shrink the overlap further; the size invariant wins.
            while buf.len() > 1 && total(buf.len(), buf_tokens) > self.chunk_size {
                if let Some((_, n)) = buf.pop_front() {
                    buf_tokens -= n;
                }
            }
        }

        if !buf.is_empty() {
            out.push(join(&buf));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkingConfig;

    /// Deterministic measurer for tests: one token per char, windows slide
    /// over chars.
    struct CharMeasurer;

    impl TokenMeasurer for CharMeasurer {
        fn mode(&self) -> &'static str {
            "exact"
        }

        fn token_len(&self, text: &str) -> Result<usize, TokenizeError> {
            Ok(text.chars().count())
        }

        fn window_split(
            &self,
            text: &str,
            window: usize,
            step: usize,
        ) -> Result<Vec<String>, TokenizeError> {
            let chars: Vec<char> = text.chars().collect();
            let mut out = Vec::new();
            let mut start = 0;
            while start < chars.len() {
                let end = (start + window).min(chars.len());
                out.push(chars[start..end].iter().collect());
                if end == chars.len() {
                    break;
                }
                start += step.max(1);
            }
            Ok(out)
        }
    }

    fn chunker(chunk_size: usize, overlap: usize, min_tokens: usize) -> Chunker {
        Chunker::new(
            Arc::new(CharMeasurer),
            &ChunkingConfig {
                chunk_size_tokens: chunk_size,
                overlap_tokens: overlap,
                min_tokens,
            },
        )
    }

    #[test]
    fn empty_and_whitespace_yield_no_chunks() {
        let c = chunker(100, 10, 1);
        assert!(c.chunk("").unwrap().is_empty());
        assert!(c.chunk("   \n  ").unwrap().is_empty());
    }

    #[test]
    fn small_text_is_one_chunk() {
        let c = chunker(100, 10, 1);
        let chunks = c.chunk("hello world").unwrap();
        assert_eq!(chunks, vec!["hello world".to_string()]);
    }

    #[test]
    fn paragraphs_under_budget_merge_into_one_chunk() {
        let c = chunker(100, 10, 1);
        let chunks = c.chunk("first para\n\nsecond para\n\nthird para").unwrap();
        assert_eq!(
            chunks,
            vec!["first para\n\nsecond para\n\nthird para".to_string()]
        );
    }

    #[test]
    fn merge_flushes_with_bounded_overlap() {
        // Pieces of 2 tokens, separator costs 1: each flush retains one
        // piece (2 tokens <= overlap 3).
        let c = chunker(7, 3, 1);
        let chunks = c.chunk("aa bb cc dd ee").unwrap();
        assert_eq!(chunks, vec!["aa bb", "bb cc", "cc dd", "dd ee"]);
    }

    #[test]
    fn size_invariant_holds_for_every_chunk() {
        let m = CharMeasurer;
        let text = (0..60)
            .map(|i| format!("word{i:02}"))
            .collect::<Vec<_>>()
            .join(" ");
        let c = chunker(20, 5, 1);
        let chunks = c.chunk(&text).unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(
                m.token_len(chunk).unwrap() <= 20,
                "oversized chunk: {chunk:?}"
            );
        }
    }

    #[test]
    fn overlap_between_consecutive_chunks_is_bounded() {
        let text = (0..30)
            .map(|i| format!("w{i:02}"))
            .collect::<Vec<_>>()
            .join(" ");
        let c = chunker(10, 4, 1);
        let chunks = c.chunk(&text).unwrap();
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let left: Vec<&str> = pair[0].split(' ').collect();
            let right: Vec<&str> = pair[1].split(' ').collect();
            // Longest word-suffix of `left` that prefixes `right`.
            let mut shared = 0;
            for k in (1..=left.len().min(right.len())).rev() {
                if left[left.len() - k..] == right[..k] {
                    shared = k;
                    break;
                }
            }
            let shared_tokens: usize = right[..shared]
                .iter()
                .map(|w| w.chars().count())
                .sum::<usize>()
                + shared.saturating_sub(1);
            assert!(shared_tokens <= 4, "overlap too large in {pair:?}");
        }
    }

    #[test]
    fn oversized_paragraph_splits_on_lines_not_rejoined() {
        // Second paragraph exceeds the budget and is split per line; the
        // line-level chunks keep "\n" joins and never merge back with the
        // first paragraph.
        let c = chunker(12, 0, 1);
        let text = "intro\n\nlong line a\nlong line b";
        let chunks = c.chunk(text).unwrap();
        assert_eq!(chunks, vec!["intro", "long line a", "long line b"]);
    }

    #[test]
    fn unsplittable_text_falls_back_to_sliding_windows() {
        let text = "x".repeat(100);
        let c = chunker(10, 2, 1);
        let chunks = c.chunk(&text).unwrap();
        // Windows of 10 advancing by 8: starts 0, 8, ..., 96.
        assert_eq!(chunks.len(), 13);
        for chunk in &chunks[..12] {
            assert_eq!(chunk.len(), 10);
        }
        assert_eq!(chunks[12].len(), 4);
    }

    #[test]
    fn chunks_below_min_floor_are_dropped() {
        let c = chunker(10, 0, 4);
        let chunks = c.chunk("aaaa bbbb cc").unwrap();
        assert_eq!(chunks, vec!["aaaa bbbb"]);
    }

    #[test]
    fn short_document_is_preserved_despite_floor() {
        let c = chunker(100, 10, 50);
        let chunks = c.chunk("tiny note").unwrap();
        assert_eq!(chunks, vec!["tiny note".to_string()]);
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = "alpha beta\n\ngamma delta\nepsilon zeta eta theta";
        let c = chunker(12, 3, 1);
        assert_eq!(c.chunk(text).unwrap(), c.chunk(text).unwrap());
    }
}
