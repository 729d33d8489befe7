//! Core traits defining the interfaces to external collaborators.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Document, SearchResponse};

/// Embedding model trait.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of chunk texts at indexing time.
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;
}

/// Token counter used for the context-length budget.
pub trait TokenCounter: Send + Sync {
    /// Count tokens in text.
    fn count_tokens(&self, text: &str) -> Result<usize>;
}

/// The document search engine, as seen by the hybrid search core.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Run a query body against an index.
    async fn search(&self, index: &str, body: &serde_json::Value) -> Result<SearchResponse>;
}

/// Index administration and document write operations.
#[async_trait]
pub trait IndexAdmin: Send + Sync {
    async fn index_exists(&self, index: &str) -> Result<bool>;

    /// Create an index from a settings + mappings body.
    async fn create_index(&self, index: &str, body: &serde_json::Value) -> Result<()>;

    /// Index description (settings, mappings, aliases).
    async fn get_index(&self, index: &str) -> Result<serde_json::Value>;

    async fn delete_index(&self, index: &str) -> Result<()>;

    async fn count(&self, index: &str) -> Result<u64>;

    async fn get_mapping(&self, index: &str) -> Result<serde_json::Value>;

    /// Store a document, returning the engine's result string (`created`, `updated`).
    async fn index_document(
        &self,
        index: &str,
        id: Option<&str>,
        doc: &serde_json::Value,
    ) -> Result<String>;

    /// Apply a partial update to a stored document by engine id.
    async fn update_document(
        &self,
        index: &str,
        engine_id: &str,
        partial: &serde_json::Value,
    ) -> Result<String>;

    /// Delete every document matching a query, returning the number deleted.
    async fn delete_by_query(&self, index: &str, query: &serde_json::Value) -> Result<u64>;

    async fn refresh(&self, index: &str) -> Result<()>;
}

/// Maps a document id to the full document record.
#[async_trait]
pub trait DocumentRetriever: Send + Sync {
    async fn retrieve(&self, id: &str) -> Result<Document>;
}

/// Chunking configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// Maximum characters per chunk.
    pub chunk_size: usize,

    /// Characters shared between consecutive chunks.
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 100,
        }
    }
}

/// Chunking strategy trait.
pub trait Chunker: Send + Sync {
    /// Split text into chunks.
    fn split_text(&self, text: &str, config: &ChunkConfig) -> Result<Vec<String>>;
}
