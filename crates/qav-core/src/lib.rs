//! qav-core - Core types and traits for the retrieval service
//!
//! This crate provides the foundational types, collaborator traits, error
//! handling and configuration used throughout the qav workspace.

pub mod annotation;
pub mod config;
pub mod error;
pub mod registry;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::{QavError, Result};
pub use registry::RetrieverRegistry;
pub use traits::*;
pub use types::*;
