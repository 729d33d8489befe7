//! qav-query - Hybrid retrieval engine
//!
//! This crate runs a k-NN vector query and a nested full-text query against
//! chunk-level sub-documents, fuses the two chunk rankings with Reciprocal
//! Rank Fusion, selects a bounded set of passages and decides whether to
//! answer with those passages or with whole documents.
//!
//! # Pipeline
//!
//! 1. Pick single- or multi-document parameters from the filter ids
//! 2. Embed the query and build both query bodies
//! 3. Run both searches concurrently
//! 4. Rank chunks per method and fuse with RRF
//! 5. Select passages per document
//! 6. Retrieve full documents and apply the full-document policy
//!
//! # Example
//!
//! ```rust,ignore
//! use qav_query::HybridSearchEngine;
//! use qav_core::SearchRequest;
//!
//! let engine = HybridSearchEngine::new(backend, embedder, tokens, retrievers, config);
//! let mut request = SearchRequest::new("What is the verdict?");
//! request.filter_ids = vec!["doc123".into()];
//! let results = engine.search("sentenze", &request).await?;
//! ```

mod assemble;
mod builder;
mod engine;
mod fusion;
mod params;
mod select;

pub use assemble::{assemble, FullDocumentPolicy, PolicyDecision};
pub use builder::{full_text_query, vector_query, INNER_HIT_FIELDS};
pub use engine::HybridSearchEngine;
pub use fusion::{collect_ranks, fuse, rrf_score, ChunkKey, ChunkPayload, ChunkSlot, FusedChunk, RankMap};
pub use params::SearchMode;
pub use select::{select, DocChunks};

// Re-export for convenience
pub use qav_core::{DocumentResult, RetrievalMethod, SearchRequest};
