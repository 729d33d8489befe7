//! qav-chunk - Text splitting
//!
//! Splits document text into overlapping, character-bounded chunks before
//! they are embedded and stored as nested chunk vectors.
//!
//! # Example
//!
//! ```rust
//! use qav_chunk::{ChunkConfig, Chunker, RecursiveChunker};
//!
//! let chunker = RecursiveChunker::new();
//! let chunks = chunker.split_text("Hello world", &ChunkConfig::default()).unwrap();
//! assert_eq!(chunks, vec!["Hello world".to_string()]);
//! ```

mod recursive;

pub use recursive::RecursiveChunker;

// Re-export types for convenience
pub use qav_core::{ChunkConfig, Chunker};
