//! Token counting for the context-length budget.

use std::path::Path;

use tokenizers::Tokenizer;
use tracing::info;

use qav_core::{QavError, Result, TokenCounter, TokenizerConfig};

/// Counts tokens with the tokenizer of the downstream generation model.
///
/// Special tokens are not added, so the count is the length of the plain
/// tokenization of the text.
pub struct HfTokenCounter {
    tokenizer: Tokenizer,
}

impl HfTokenCounter {
    pub fn from_config(config: &TokenizerConfig) -> Result<Self> {
        Self::from_file(&config.path)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading budget tokenizer from {:?}", path);
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| QavError::tokenizer(format!("Failed to load {:?}: {}", path, e)))?;
        Ok(Self { tokenizer })
    }

    pub fn from_tokenizer(tokenizer: Tokenizer) -> Self {
        Self { tokenizer }
    }
}

impl TokenCounter for HfTokenCounter {
    fn count_tokens(&self, text: &str) -> Result<usize> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| QavError::tokenizer(format!("Tokenization failed: {}", e)))?;
        Ok(encoding.get_ids().len())
    }
}

/// Whitespace token counter for tests.
#[derive(Debug, Default, Clone)]
pub struct MockTokenCounter;

impl MockTokenCounter {
    pub fn new() -> Self {
        Self
    }
}

impl TokenCounter for MockTokenCounter {
    fn count_tokens(&self, text: &str) -> Result<usize> {
        Ok(text.split_whitespace().count())
    }
}
