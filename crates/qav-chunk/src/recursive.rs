//! Recursive character chunker.
//!
//! Splits text by trying progressively smaller separators until every piece
//! fits within the size limit, then greedily merges neighbouring pieces back
//! together with a trailing overlap.

use std::collections::VecDeque;

use tracing::debug;

use qav_core::{ChunkConfig, Chunker, QavError, Result};

/// Separators tried in order: paragraphs, lines, words, characters.
const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

/// Recursive chunker measuring length in characters.
pub struct RecursiveChunker {
    separators: Vec<String>,
}

impl RecursiveChunker {
    /// Create a chunker with the default separators.
    pub fn new() -> Self {
        Self::with_separators(DEFAULT_SEPARATORS)
    }

    /// Create a chunker with custom separators, coarsest first.
    pub fn with_separators(separators: &[&str]) -> Self {
        Self {
            separators: separators.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn len(text: &str) -> usize {
        text.chars().count()
    }

    /// Split text by a separator; the empty separator splits into characters.
    fn split_by_separator(text: &str, separator: &str) -> Vec<String> {
        if separator.is_empty() {
            return text.chars().map(String::from).collect();
        }
        text.split(separator)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    fn split_recursive(&self, text: &str, separators: &[String], config: &ChunkConfig) -> Vec<String> {
        // Pick the first separator present in the text.
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut remaining: &[String] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = "";
                break;
            }
            if text.contains(sep.as_str()) {
                separator = sep;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut fitting: Vec<String> = Vec::new();

        for piece in Self::split_by_separator(text, separator) {
            if Self::len(&piece) < config.chunk_size {
                fitting.push(piece);
                continue;
            }

            if !fitting.is_empty() {
                chunks.extend(self.merge(&fitting, separator, config));
                fitting.clear();
            }

            if remaining.is_empty() {
                chunks.push(piece);
            } else {
                chunks.extend(self.split_recursive(&piece, remaining, config));
            }
        }

        if !fitting.is_empty() {
            chunks.extend(self.merge(&fitting, separator, config));
        }

        chunks
    }

    /// Merge small pieces into chunks of at most `chunk_size`, carrying up to
    /// `chunk_overlap` characters of trailing pieces into the next chunk.
    fn merge(&self, pieces: &[String], separator: &str, config: &ChunkConfig) -> Vec<String> {
        let sep_len = Self::len(separator);
        let mut chunks = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let piece_len = Self::len(piece);
            let joiner = if current.is_empty() { 0 } else { sep_len };

            if total + piece_len + joiner > config.chunk_size {
                if total > config.chunk_size {
                    debug!(
                        "Created a chunk of size {}, which is longer than the specified {}",
                        total, config.chunk_size
                    );
                }

                if !current.is_empty() {
                    if let Some(chunk) = Self::join(&current, separator) {
                        chunks.push(chunk);
                    }

                    // Drop leading pieces until the carried-over tail fits the overlap
                    // and leaves room for the next piece.
                    while total > config.chunk_overlap
                        || (total > 0
                            && total + piece_len + if current.is_empty() { 0 } else { sep_len }
                                > config.chunk_size)
                    {
                        let Some(first) = current.pop_front() else {
                            break;
                        };
                        let dropped_sep = if current.is_empty() { 0 } else { sep_len };
                        total = total.saturating_sub(Self::len(first) + dropped_sep);
                    }
                }
            }

            current.push_back(piece);
            total += piece_len + if current.len() > 1 { sep_len } else { 0 };
        }

        if let Some(chunk) = Self::join(&current, separator) {
            chunks.push(chunk);
        }

        chunks
    }

    fn join(pieces: &VecDeque<&str>, separator: &str) -> Option<String> {
        let joined = pieces.iter().copied().collect::<Vec<_>>().join(separator);
        let trimmed = joined.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

impl Default for RecursiveChunker {
    fn default() -> Self {
        Self::new()
    }
}

impl Chunker for RecursiveChunker {
    fn split_text(&self, text: &str, config: &ChunkConfig) -> Result<Vec<String>> {
        if config.chunk_size == 0 {
            return Err(QavError::chunking("chunk_size must be positive"));
        }
        if config.chunk_overlap > config.chunk_size {
            return Err(QavError::chunking(format!(
                "chunk_overlap {} is larger than chunk_size {}",
                config.chunk_overlap, config.chunk_size
            )));
        }
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let chunks = self.split_recursive(text, &self.separators, config);
        debug!("Split {} chars into {} chunks", Self::len(text), chunks.len());
        Ok(chunks)
    }
}
