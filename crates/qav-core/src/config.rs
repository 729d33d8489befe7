//! Configuration types for the retrieval service.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::traits::ChunkConfig;

/// Main configuration for the retrieval service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QavConfig {
    /// Search engine connection.
    #[serde(default)]
    pub elastic: ElasticConfig,

    /// Embedding model configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Tokenizer used for the context-length budget.
    #[serde(default)]
    pub tokenizer: TokenizerConfig,

    /// Hybrid retrieval parameters.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Chunking configuration used at indexing time.
    #[serde(default)]
    pub chunking: ChunkConfig,

    /// Document retrievers per collection.
    #[serde(default)]
    pub retrievers: RetrieversConfig,
}

/// Search engine connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticConfig {
    /// Base URL of the engine's REST API.
    #[serde(default = "default_elastic_url")]
    pub url: String,

    #[serde(default = "default_elastic_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            url: default_elastic_url(),
            request_timeout_secs: 60,
        }
    }
}

/// Embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Path to the ONNX model file.
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    /// Path to the model's tokenizer.json.
    #[serde(default = "default_embed_tokenizer_path")]
    pub tokenizer_path: PathBuf,

    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Maximum input tokens per text.
    #[serde(default = "default_embed_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_num_threads")]
    pub num_threads: usize,

    /// Concurrent embedding calls admitted by the gate.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Sleep between admission attempts while the gate is full.
    #[serde(default = "default_busy_backoff_ms")]
    pub busy_backoff_ms: u64,

    /// Admission attempts before giving up with a busy error.
    #[serde(default = "default_max_busy_retries")]
    pub max_busy_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            tokenizer_path: default_embed_tokenizer_path(),
            dimension: 768,
            max_tokens: 8192,
            num_threads: 4,
            max_concurrent: 1,
            busy_backoff_ms: 1000,
            max_busy_retries: 30,
        }
    }
}

/// Tokenizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenizerConfig {
    /// Path to a tokenizer.json file.
    #[serde(default = "default_budget_tokenizer_path")]
    pub path: PathBuf,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            path: default_budget_tokenizer_path(),
        }
    }
}

/// Candidate-pool sizes for one retrieval mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeParams {
    /// Nearest neighbours requested from the vector query.
    pub knn_k: usize,

    /// Inner hits requested from the full-text query.
    pub inner_hits_size: usize,

    /// Chunks kept from the fused ranking (single-document mode).
    pub chunks_to_gather: usize,

    /// RRF smoothing constant.
    pub rrf_k: usize,
}

impl ModeParams {
    /// Parameters used when exactly one document is targeted.
    pub const SINGLE_DOCUMENT: Self = Self {
        knn_k: 50,
        inner_hits_size: 50,
        chunks_to_gather: 40,
        rrf_k: 50,
    };

    /// Parameters used for global or multi-document searches.
    pub const MULTI_DOCUMENT: Self = Self {
        knn_k: 25,
        inner_hits_size: 30,
        chunks_to_gather: 25,
        rrf_k: 30,
    };
}

/// Hybrid retrieval configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_single_doc")]
    pub single_doc: ModeParams,

    #[serde(default = "default_multi_doc")]
    pub multi_doc: ModeParams,

    /// Candidate pool for filtered k-NN queries.
    #[serde(default = "default_num_candidates")]
    pub num_candidates: usize,

    /// Documents kept in multi-document mode.
    #[serde(default = "default_max_docs")]
    pub max_docs: usize,

    /// Chunks kept per document in multi-document mode.
    #[serde(default = "default_max_chunks_per_doc")]
    pub max_chunks_per_doc: usize,

    /// Token ceiling for returning whole documents.
    #[serde(default = "default_full_doc_token_budget")]
    pub full_doc_token_budget: usize,

    /// Query substrings signalling extraction/summarization intent.
    #[serde(default = "default_full_doc_keywords")]
    pub full_doc_keywords: Vec<String>,

    /// Concurrent document retriever calls per request.
    #[serde(default = "default_retrieve_concurrency")]
    pub retrieve_concurrency: usize,

    /// Deadline for a whole search request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            single_doc: ModeParams::SINGLE_DOCUMENT,
            multi_doc: ModeParams::MULTI_DOCUMENT,
            num_candidates: 1000,
            max_docs: 5,
            max_chunks_per_doc: 5,
            full_doc_token_budget: 18000,
            full_doc_keywords: default_full_doc_keywords(),
            retrieve_concurrency: 4,
            request_timeout_secs: 120,
        }
    }
}

/// Document retriever endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieversConfig {
    /// Retriever used for collections without a dedicated entry.
    #[serde(default = "default_retriever_url")]
    pub default_url: String,

    /// Collection (index) name → retriever base URL.
    #[serde(default)]
    pub collections: HashMap<String, String>,
}

impl Default for RetrieversConfig {
    fn default() -> Self {
        Self {
            default_url: default_retriever_url(),
            collections: HashMap::new(),
        }
    }
}

// Default value functions

fn default_elastic_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_elastic_timeout() -> u64 {
    60
}

fn default_dimension() -> usize {
    768
}

fn default_embed_max_tokens() -> usize {
    8192
}

fn default_num_threads() -> usize {
    4
}

fn default_max_concurrent() -> usize {
    1
}

fn default_busy_backoff_ms() -> u64 {
    1000
}

fn default_max_busy_retries() -> u32 {
    30
}

fn default_single_doc() -> ModeParams {
    ModeParams::SINGLE_DOCUMENT
}

fn default_multi_doc() -> ModeParams {
    ModeParams::MULTI_DOCUMENT
}

fn default_num_candidates() -> usize {
    1000
}

fn default_max_docs() -> usize {
    5
}

fn default_max_chunks_per_doc() -> usize {
    5
}

fn default_full_doc_token_budget() -> usize {
    18000
}

fn default_full_doc_keywords() -> Vec<String> {
    vec!["estrai".to_string(), "riassumi".to_string()]
}

fn default_retrieve_concurrency() -> usize {
    4
}

fn default_request_timeout() -> u64 {
    120
}

fn default_retriever_url() -> String {
    "http://localhost:3001/api/document".to_string()
}

fn default_model_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("qav")
        .join("models")
}

fn default_model_path() -> PathBuf {
    default_model_dir()
        .join("gte-multilingual-base")
        .join("model.onnx")
}

fn default_embed_tokenizer_path() -> PathBuf {
    default_model_dir()
        .join("gte-multilingual-base")
        .join("tokenizer.json")
}

fn default_budget_tokenizer_path() -> PathBuf {
    default_model_dir()
        .join("phi-3.5-mini-instruct")
        .join("tokenizer.json")
}

impl QavConfig {
    /// Load configuration from file.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            crate::error::QavError::config(format!("Failed to parse config: {}", e))
        })?;
        Ok(config)
    }

    /// Load configuration from default paths, then apply environment overrides.
    pub fn load_default() -> crate::error::Result<Self> {
        let mut config = Self::load_from_default_paths()?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_from_default_paths() -> crate::error::Result<Self> {
        // Try user config first
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("qav").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        // Try local config
        let local_config = PathBuf::from("qav.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Self::default())
    }

    /// Override connection settings from `QAV_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("QAV_ELASTIC_URL") {
            self.elastic.url = url;
        }
        if let Ok(path) = std::env::var("QAV_EMBEDDING_MODEL") {
            self.embedding.model_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("QAV_TOKENIZER") {
            self.tokenizer.path = PathBuf::from(path);
        }
        if let Ok(url) = std::env::var("QAV_RETRIEVER_URL") {
            self.retrievers.default_url = url;
        }
    }
}
