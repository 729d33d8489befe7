//! Per-collection document retriever bindings.

use std::collections::HashMap;
use std::sync::Arc;

use crate::traits::DocumentRetriever;

/// Maps collection (index) names to their document retriever.
///
/// Collections without an explicit binding use the default retriever.
#[derive(Clone)]
pub struct RetrieverRegistry {
    default: Arc<dyn DocumentRetriever>,
    collections: HashMap<String, Arc<dyn DocumentRetriever>>,
}

impl RetrieverRegistry {
    pub fn new(default: Arc<dyn DocumentRetriever>) -> Self {
        Self {
            default,
            collections: HashMap::new(),
        }
    }

    /// Bind a retriever to a collection.
    pub fn with_collection(
        mut self,
        collection: impl Into<String>,
        retriever: Arc<dyn DocumentRetriever>,
    ) -> Self {
        self.collections.insert(collection.into(), retriever);
        self
    }

    /// Retriever for a collection.
    pub fn for_collection(&self, collection: &str) -> Arc<dyn DocumentRetriever> {
        self.collections
            .get(collection)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }

    /// Number of explicitly bound collections.
    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}

impl std::fmt::Debug for RetrieverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.collections.keys().collect();
        names.sort();
        f.debug_struct("RetrieverRegistry")
            .field("collections", &names)
            .finish()
    }
}
