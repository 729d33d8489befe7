//! qav-embed - Embedding model and tokenizer wrappers
//!
//! This crate provides the query/chunk embedder and the token counter used
//! by the hybrid search core.
//!
//! # Features
//!
//! - ONNX Runtime integration for sentence-embedding models
//! - Mean pooling with attention mask and L2 normalization
//! - Token counting with a HuggingFace `tokenizer.json`
//! - A bounded-concurrency admission gate around the model
//! - Deterministic mocks for tests

mod gate;
mod onnx;
mod tokens;

pub use gate::GatedEmbedder;
pub use onnx::{MockEmbedder, OnnxEmbedder};
pub use tokens::{HfTokenCounter, MockTokenCounter};

// Re-export the traits for convenience
pub use qav_core::{Embedder, TokenCounter};
