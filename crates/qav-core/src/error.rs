//! Error types for the retrieval service.

use thiserror::Error;

/// Result type alias using QavError.
pub type Result<T> = std::result::Result<T, QavError>;

/// Errors that can occur in the retrieval service.
#[derive(Error, Debug)]
pub enum QavError {
    /// Document not found in the index or the retriever.
    #[error("Document not found: {id}")]
    DocumentNotFound { id: String },

    /// Index not found.
    #[error("Index not found: {name}")]
    IndexNotFound { name: String },

    /// Invalid argument provided.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Embedding model error.
    #[error("Embedding error: {message}")]
    Embedding { message: String },

    /// Tokenizer error.
    #[error("Tokenizer error: {message}")]
    Tokenizer { message: String },

    /// Search engine error.
    #[error("Search error: {message}")]
    Search { message: String },

    /// Document retriever error.
    #[error("Retriever error for {id}: {message}")]
    Retriever { id: String, message: String },

    /// Chunking error.
    #[error("Chunking error: {message}")]
    Chunking { message: String },

    /// The embedding gate stayed saturated for every retry.
    #[error("Server is busy after {attempts} attempts")]
    Busy { attempts: u32 },

    /// Request exceeded its deadline.
    #[error("Request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl QavError {
    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an embedding error.
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
        }
    }

    /// Create a tokenizer error.
    pub fn tokenizer(message: impl Into<String>) -> Self {
        Self::Tokenizer {
            message: message.into(),
        }
    }

    /// Create a search engine error.
    pub fn search(message: impl Into<String>) -> Self {
        Self::Search {
            message: message.into(),
        }
    }

    /// Create a retriever error for a document id.
    pub fn retriever(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Retriever {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Create a chunking error.
    pub fn chunking(message: impl Into<String>) -> Self {
        Self::Chunking {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the error concerns a single document rather than the request.
    pub fn is_document_level(&self) -> bool {
        matches!(self, Self::Retriever { .. } | Self::DocumentNotFound { .. })
    }

    /// Get the error code reported to callers.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DocumentNotFound { .. } => "DOCUMENT_NOT_FOUND",
            Self::IndexNotFound { .. } => "INDEX_NOT_FOUND",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::Embedding { .. } => "EMBEDDING_ERROR",
            Self::Tokenizer { .. } => "TOKENIZER_ERROR",
            Self::Search { .. } => "SEARCH_ERROR",
            Self::Retriever { .. } => "RETRIEVER_ERROR",
            Self::Chunking { .. } => "CHUNKING_ERROR",
            Self::Busy { .. } => "BUSY",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QavError::DocumentNotFound {
            id: "doc123".to_string(),
        };
        assert!(err.to_string().contains("doc123"));

        let err = QavError::retriever("doc9", "connection refused");
        assert_eq!(err.to_string(), "Retriever error for doc9: connection refused");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(QavError::search("boom").error_code(), "SEARCH_ERROR");
        assert_eq!(QavError::embedding("boom").error_code(), "EMBEDDING_ERROR");
        assert_eq!(QavError::Busy { attempts: 3 }.error_code(), "BUSY");
        assert_eq!(QavError::Timeout { secs: 5 }.error_code(), "TIMEOUT");
    }

    #[test]
    fn test_document_level_errors() {
        assert!(QavError::retriever("a", "b").is_document_level());
        assert!(!QavError::search("b").is_document_level());
        assert!(!QavError::embedding("b").is_document_level());
    }
}
