//! Token measurement for the chunker.
//!
//! Two implementations of [`TokenMeasurer`]:
//! - **[`HfTokenMeasurer`]** — exact subword counts from a HuggingFace
//!   `tokenizer.json` (no special tokens), matching the embedding model.
//! - **[`WordCountMeasurer`]** — degraded fallback approximating
//!   `max(1, round(words * 1.3))` tokens when no tokenizer file is
//!   configured or it fails to load.
//!
//! The mode is chosen once at startup by [`create_measurer`] and never
//! changes mid-run; mixing exact and approximate counts would corrupt the
//! chunker's size and overlap invariants.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::TokenizeError;

/// Chars-per-token heuristic used by the approximate measurer's window
/// fallback, where no token ids exist to slide over.
const CHARS_PER_TOKEN: usize = 4;

/// Measures the token length of a text span, deterministically for a fixed
/// configuration, and splits unsplittable oversized spans into sliding
/// token windows.
pub trait TokenMeasurer: Send + Sync {
    /// `"exact"` or `"approximate"`; logged at startup.
    fn mode(&self) -> &'static str;

    /// Token count of `text` with no special tokens added.
    fn token_len(&self, text: &str) -> Result<usize, TokenizeError>;

    /// Last-resort split for a span with no usable separators: windows of
    /// `window` tokens advancing by `step` tokens, each decoded back to text.
    /// `step` must be >= 1.
    fn window_split(
        &self,
        text: &str,
        window: usize,
        step: usize,
    ) -> Result<Vec<String>, TokenizeError>;
}

/// Exact measurement through a HuggingFace tokenizer.
pub struct HfTokenMeasurer {
    tokenizer: tokenizers::Tokenizer,
}

impl HfTokenMeasurer {
    pub fn from_file(path: &Path) -> Result<Self, TokenizeError> {
        let tokenizer = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| TokenizeError(format!("cannot load {}: {}", path.display(), e)))?;
        Ok(Self { tokenizer })
    }

    fn encode_ids(&self, text: &str) -> Result<Vec<u32>, TokenizeError> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| TokenizeError(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }
}

impl TokenMeasurer for HfTokenMeasurer {
    fn mode(&self) -> &'static str {
        "exact"
    }

    fn token_len(&self, text: &str) -> Result<usize, TokenizeError> {
        Ok(self.encode_ids(text)?.len())
    }

    fn window_split(
        &self,
        text: &str,
        window: usize,
        step: usize,
    ) -> Result<Vec<String>, TokenizeError> {
        let ids = self.encode_ids(text)?;
        let mut out = Vec::new();
        let mut start = 0;
        while start < ids.len() {
            let end = (start + window).min(ids.len());
            let piece = self
                .tokenizer
                .decode(&ids[start..end], true)
                .map_err(|e| TokenizeError(e.to_string()))?;
            if !piece.trim().is_empty() {
                out.push(piece);
            }
            if end == ids.len() {
                break;
            }
            start += step.max(1);
        }
        Ok(out)
    }
}

/// Word-count approximation, used when no tokenizer file is available.
pub struct WordCountMeasurer;

impl TokenMeasurer for WordCountMeasurer {
    fn mode(&self) -> &'static str {
        "approximate"
    }

    fn token_len(&self, text: &str) -> Result<usize, TokenizeError> {
        let words = text.split_whitespace().count();
        Ok(((words as f64 * 1.3).round() as usize).max(1))
    }

    fn window_split(
        &self,
        text: &str,
        window: usize,
        step: usize,
    ) -> Result<Vec<String>, TokenizeError> {
        // No token ids to slide over; windows are measured in chars at the
        // CHARS_PER_TOKEN ratio, split on char boundaries.
        let chars: Vec<char> = text.chars().collect();
        let window_chars = (window * CHARS_PER_TOKEN).max(1);
        let step_chars = (step.max(1) * CHARS_PER_TOKEN).max(1);

        let mut out = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + window_chars).min(chars.len());
            let piece: String = chars[start..end].iter().collect();
            if !piece.trim().is_empty() {
                out.push(piece);
            }
            if end == chars.len() {
                break;
            }
            start += step_chars;
        }
        Ok(out)
    }
}

/// Select the token measurer once at startup: exact when a tokenizer file is
/// configured and loads, otherwise the word-count approximation.
pub fn create_measurer(config: &crate::config::TokenizerConfig) -> Arc<dyn TokenMeasurer> {
    if let Some(path) = &config.path {
        match HfTokenMeasurer::from_file(path) {
            Ok(m) => {
                info!(tokenizer = %path.display(), "using exact token measurement");
                return Arc::new(m);
            }
            Err(e) => {
                warn!(
                    tokenizer = %path.display(),
                    error = %e,
                    "tokenizer unavailable; falling back to word-count approximation"
                );
            }
        }
    }
    Arc::new(WordCountMeasurer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_count_is_scaled_and_floored() {
        let m = WordCountMeasurer;
        assert_eq!(m.token_len("").unwrap(), 1);
        assert_eq!(m.token_len("one").unwrap(), 1);
        // 10 words * 1.3 = 13
        let ten = "a b c d e f g h i j";
        assert_eq!(m.token_len(ten).unwrap(), 13);
    }

    #[test]
    fn word_count_windows_respect_char_boundaries() {
        let m = WordCountMeasurer;
        // Multibyte chars must not be split mid-codepoint.
        let text = "é".repeat(100);
        let windows = m.window_split(&text, 5, 5).unwrap();
        assert_eq!(windows.len(), 5); // 100 chars / (5 * 4 chars)
        for w in &windows {
            assert_eq!(w.chars().count(), 20);
        }
    }

    #[test]
    fn window_split_covers_tail() {
        let m = WordCountMeasurer;
        let text = "x".repeat(45);
        // window = 20 chars, step = 20 chars -> 20 + 20 + 5
        let windows = m.window_split(&text, 5, 5).unwrap();
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[2].len(), 5);
    }
}
