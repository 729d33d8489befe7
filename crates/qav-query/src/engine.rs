//! Hybrid search engine.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use qav_core::{
    ChunkRecord, Document, DocumentResult, Embedder, Result, RetrievalConfig, RetrieverRegistry,
    SearchBackend, SearchRequest, SearchResponse, TokenCounter,
};

use crate::assemble::{assemble, FullDocumentPolicy};
use crate::builder::{full_text_query, is_noop, vector_query};
use crate::fusion::{collect_ranks, fuse};
use crate::params::SearchMode;
use crate::select::{select, DocChunks};

/// Hybrid vector + full-text search over chunked documents.
///
/// Holds only read-only collaborators and configuration, so one engine is
/// shared by all concurrent requests.
pub struct HybridSearchEngine<B, E> {
    backend: Arc<B>,
    embedder: Arc<E>,
    tokens: Arc<dyn TokenCounter>,
    retrievers: RetrieverRegistry,
    config: RetrievalConfig,
}

impl<B, E> HybridSearchEngine<B, E>
where
    B: SearchBackend,
    E: Embedder,
{
    pub fn new(
        backend: Arc<B>,
        embedder: Arc<E>,
        tokens: Arc<dyn TokenCounter>,
        retrievers: RetrieverRegistry,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            backend,
            embedder,
            tokens,
            retrievers,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Search a collection (index) and return documents with their passages
    /// or whole text, best document first.
    pub async fn search(&self, collection: &str, request: &SearchRequest) -> Result<Vec<DocumentResult>> {
        let start = Instant::now();
        let method = &request.retrieval_method;

        info!(
            "Searching {} for {:?} (method={}, filter_ids={:?}, collection_id={:?}, force_rag={})",
            collection,
            request.query,
            method,
            request.filter_ids,
            request.collection_id,
            request.force_rag
        );

        if is_noop(method) {
            warn!("Unrecognized retrieval method {:?}, returning no results", method.as_str());
            return Ok(Vec::new());
        }

        let mode = SearchMode::for_request(request);
        let params = mode.params(&self.config);
        info!(
            "{} mode: knn_k={}, inner_hits_size={}, chunks_to_gather={}, rrf_k={}",
            mode.as_str(),
            params.knn_k,
            params.inner_hits_size,
            params.chunks_to_gather,
            params.rrf_k
        );

        let vector_body = if method.runs_vector() {
            let embedding = self.embedder.embed_query(&request.query).await?;
            Some(vector_query(request, &embedding, &params, self.config.num_candidates))
        } else {
            None
        };
        let full_text_body = method
            .runs_full_text()
            .then(|| full_text_query(request, &params));

        let (vector_response, full_text_response) = tokio::join!(
            self.run(collection, vector_body.as_ref()),
            self.run(collection, full_text_body.as_ref())
        );

        let vector_ranks = vector_response?
            .as_ref()
            .map(collect_ranks)
            .unwrap_or_default();
        let full_text_ranks = full_text_response?
            .as_ref()
            .map(collect_ranks)
            .unwrap_or_default();

        debug!(
            "Rank maps: vector={}, full_text={}",
            vector_ranks.len(),
            full_text_ranks.len()
        );

        let fused = fuse(&vector_ranks, &full_text_ranks, params.rrf_k);
        debug!("Fused ranking contains {} chunks", fused.len());

        let selected = select(&fused, mode, &params, &self.config);
        info!(
            "Selected {} chunks from {} documents",
            selected.iter().map(|g| g.chunks.len()).sum::<usize>(),
            selected.len()
        );

        let retrieved = self.retrieve(collection, selected).await;

        let policy = FullDocumentPolicy::new(&self.config, self.tokens.as_ref());
        let results = assemble(retrieved, request, &policy)?;

        info!(
            "Search completed in {}ms, returned {} documents",
            start.elapsed().as_millis(),
            results.len()
        );

        Ok(results)
    }

    async fn run(
        &self,
        collection: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Option<SearchResponse>> {
        match body {
            Some(body) => {
                let response = self.backend.search(collection, body).await?;
                debug!("Search returned {} hits", response.hits.hits.len());
                Ok(Some(response))
            }
            None => Ok(None),
        }
    }

    /// Fetch full documents for the selected groups, keeping group order.
    /// Documents the retriever cannot provide are dropped.
    async fn retrieve(
        &self,
        collection: &str,
        selected: Vec<DocChunks>,
    ) -> Vec<(Document, Vec<ChunkRecord>)> {
        let retriever = self.retrievers.for_collection(collection);
        let width = self.config.retrieve_concurrency.max(1);

        let fetched: Vec<(DocChunks, Result<Document>)> = stream::iter(selected)
            .map(|group| {
                let retriever = retriever.clone();
                async move {
                    let doc = retriever.retrieve(&group.doc_id).await;
                    (group, doc)
                }
            })
            .buffered(width)
            .collect()
            .await;

        fetched
            .into_iter()
            .filter_map(|(group, doc)| match doc {
                Ok(doc) => Some((doc, group.chunks)),
                Err(e) => {
                    warn!("Error retrieving document {}: {}", group.doc_id, e);
                    None
                }
            })
            .collect()
    }
}
