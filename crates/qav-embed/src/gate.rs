//! Bounded-concurrency admission gate around an embedder.
//!
//! A shared model is never oversubscribed: callers try to take a slot, and
//! while the gate is full they back off and retry instead of queueing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Semaphore, SemaphorePermit, TryAcquireError};
use tracing::{debug, warn};

use qav_core::{Embedder, EmbeddingConfig, QavError, Result};

/// Embedder wrapper admitting at most `slots` concurrent calls.
pub struct GatedEmbedder<E> {
    inner: E,
    slots: Arc<Semaphore>,
    backoff: Duration,
    max_attempts: u32,
}

impl<E: Embedder> GatedEmbedder<E> {
    pub fn new(inner: E, slots: usize, backoff: Duration, max_attempts: u32) -> Self {
        Self {
            inner,
            slots: Arc::new(Semaphore::new(slots.max(1))),
            backoff,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(inner: E, config: &EmbeddingConfig) -> Self {
        Self::new(
            inner,
            config.max_concurrent,
            Duration::from_millis(config.busy_backoff_ms),
            config.max_busy_retries,
        )
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    async fn admit(&self) -> Result<SemaphorePermit<'_>> {
        for attempt in 1..=self.max_attempts {
            match self.slots.try_acquire() {
                Ok(permit) => {
                    if attempt > 1 {
                        debug!("Embedding slot acquired after {} attempts", attempt);
                    }
                    return Ok(permit);
                }
                Err(TryAcquireError::Closed) => {
                    return Err(QavError::internal("embedding gate closed"));
                }
                Err(TryAcquireError::NoPermits) => {
                    debug!("Embedder busy (attempt {}/{})", attempt, self.max_attempts);
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
            }
        }

        warn!("Embedder still busy after {} attempts", self.max_attempts);
        Err(QavError::Busy {
            attempts: self.max_attempts,
        })
    }
}

#[async_trait]
impl<E: Embedder> Embedder for GatedEmbedder<E> {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let _permit = self.admit().await?;
        self.inner.embed_documents(texts).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let _permit = self.admit().await?;
        self.inner.embed_query(text).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}
