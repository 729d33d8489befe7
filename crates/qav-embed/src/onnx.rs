//! ONNX-based sentence embedder.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use ndarray::ArrayViewD;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::{Encoding, Tokenizer};
use tracing::{debug, info};

use qav_core::{Embedder, EmbeddingConfig, QavError, Result};

/// Sentence embedder backed by an ONNX export of a transformer encoder
/// (gte-multilingual-base in the default deployment).
///
/// Queries and chunks are embedded the same way: no instruction prefixes.
pub struct OnnxEmbedder {
    /// Session::run needs `&mut`.
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    dimension: usize,
    max_tokens: usize,
}

impl OnnxEmbedder {
    /// Load the model and tokenizer named in the embedding configuration.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        Self::load(
            &config.model_path,
            &config.tokenizer_path,
            config.dimension,
            config.max_tokens,
            config.num_threads,
        )
    }

    /// Load a model from explicit paths.
    pub fn load(
        model_path: impl AsRef<Path>,
        tokenizer_path: impl AsRef<Path>,
        dimension: usize,
        max_tokens: usize,
        num_threads: usize,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let tokenizer_path = tokenizer_path.as_ref();

        info!("Loading embedding model from {:?}", model_path);

        let session = Session::builder()
            .map_err(|e| QavError::embedding(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| QavError::embedding(format!("Failed to set optimization level: {}", e)))?
            .with_intra_threads(num_threads)
            .map_err(|e| QavError::embedding(format!("Failed to set thread count: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| QavError::embedding(format!("Failed to load model: {}", e)))?;

        let tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|e| {
            QavError::embedding(format!(
                "Failed to load tokenizer {:?}: {}",
                tokenizer_path, e
            ))
        })?;

        info!(
            "Embedder ready: dim={}, max_tokens={}, threads={}",
            dimension, max_tokens, num_threads
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            dimension,
            max_tokens,
        })
    }

    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| QavError::embedding(format!("Tokenization failed: {}", e)))?;

        let seq_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .min(self.max_tokens)
            .max(1);
        let batch = encodings.len();

        debug!("Embedding batch: size={}, seq_len={}", batch, seq_len);

        let (ids, mask) = pad_batch(&encodings, seq_len);

        let ids = Tensor::from_array((vec![batch, seq_len], ids))
            .map_err(|e| QavError::embedding(format!("Failed to build input_ids: {}", e)))?;
        let mask_tensor = Tensor::from_array((vec![batch, seq_len], mask.clone()))
            .map_err(|e| QavError::embedding(format!("Failed to build attention_mask: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| QavError::embedding(format!("Embedding session poisoned: {}", e)))?;

        let outputs = session
            .run(ort::inputs![
                "input_ids" => ids,
                "attention_mask" => mask_tensor
            ])
            .map_err(|e| QavError::embedding(format!("Inference failed: {}", e)))?;

        let (name, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| QavError::embedding("Model produced no outputs"))?;

        let view = output
            .try_extract_array::<f32>()
            .map_err(|e| QavError::embedding(format!("Failed to read output {}: {}", name, e)))?;

        let vectors = match view.ndim() {
            // token embeddings: [batch, seq, hidden]
            3 => mean_pool(&view, &mask, seq_len),
            // sentence embeddings: [batch, hidden]
            2 => (0..batch)
                .map(|i| l2_normalize((0..view.shape()[1]).map(|j| view[[i, j]]).collect()))
                .collect(),
            _ => {
                return Err(QavError::embedding(format!(
                    "Unexpected output shape: {:?}",
                    view.shape()
                )))
            }
        };

        if let Some(v) = vectors.first() {
            if v.len() != self.dimension {
                return Err(QavError::embedding(format!(
                    "Model returned {}-dimensional vectors, expected {}",
                    v.len(),
                    self.dimension
                )));
            }
        }

        Ok(vectors)
    }
}

/// Right-pad ids and masks to a common length, truncating longer inputs.
fn pad_batch(encodings: &[Encoding], seq_len: usize) -> (Vec<i64>, Vec<i64>) {
    let mut ids = vec![0i64; encodings.len() * seq_len];
    let mut mask = vec![0i64; encodings.len() * seq_len];

    for (row, encoding) in encodings.iter().enumerate() {
        let offset = row * seq_len;
        for (col, (&id, &m)) in encoding
            .get_ids()
            .iter()
            .zip(encoding.get_attention_mask())
            .take(seq_len)
            .enumerate()
        {
            ids[offset + col] = id as i64;
            mask[offset + col] = m as i64;
        }
    }

    (ids, mask)
}

/// Average token vectors under the attention mask, then normalize.
fn mean_pool(view: &ArrayViewD<'_, f32>, mask: &[i64], seq_len: usize) -> Vec<Vec<f32>> {
    let shape = view.shape();
    let (batch, tokens, hidden) = (shape[0], shape[1].min(seq_len), shape[2]);

    (0..batch)
        .map(|i| {
            let mut sum = vec![0.0f32; hidden];
            let mut count = 0usize;
            for j in 0..tokens {
                if mask[i * seq_len + j] == 0 {
                    continue;
                }
                count += 1;
                for (k, s) in sum.iter_mut().enumerate() {
                    *s += view[[i, j, k]];
                }
            }
            if count > 0 {
                for s in &mut sum {
                    *s /= count as f32;
                }
            }
            l2_normalize(sum)
        })
        .collect()
}

fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[async_trait]
impl Embedder for OnnxEmbedder {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.encode_batch(texts)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.encode_batch(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| QavError::embedding("No embedding returned"))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic embedder for tests; vectors depend only on the text bytes.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self { dimension: 768 }
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self { dimension }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let seed = text
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325u64, |acc, b| {
                (acc ^ b as u64).wrapping_mul(0x0100_0000_01b3)
            });
        let v = (0..self.dimension)
            .map(|i| {
                let x = seed.rotate_left((i % 64) as u32).wrapping_add(i as u64);
                (x % 2000) as f32 / 1000.0 - 1.0
            })
            .collect();
        l2_normalize(v)
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vector_for(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
