//! qav-store - Search engine and document retriever clients
//!
//! This crate talks to the backing search engine through its
//! Elasticsearch-compatible REST API and to the per-collection document
//! retriever services over HTTP.

mod elastic;
mod retriever;
pub mod schema;

pub use elastic::ElasticClient;
pub use retriever::{registry_from_config, HttpRetriever};

// Re-export the traits for convenience
pub use qav_core::{DocumentRetriever, IndexAdmin, SearchBackend};
