//! Service facade.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use qav_chunk::{Chunker, RecursiveChunker};
use qav_core::annotation::normalize_mention;
use qav_core::{
    DocumentResult, Embedder, IndexAdmin, QavConfig, QavError, Result, RetrieverRegistry,
    SearchBackend, SearchRequest, TokenCounter,
};
use qav_embed::{GatedEmbedder, HfTokenCounter, OnnxEmbedder};
use qav_query::HybridSearchEngine;
use qav_store::{registry_from_config, schema::index_settings, ElasticClient};

use crate::documents::{chunk_vectors, mongo_to_document, ProcessDocumentRequest};
use crate::index_query::{collection_probes, IndexQuery, IndexQueryResponse};

/// Retrieval and indexing service state.
pub struct QavService<B, E> {
    /// Search engine (queries, index administration, document writes).
    backend: Arc<B>,

    /// Embedder used at indexing time.
    embedder: Arc<E>,

    /// Splitter used at indexing time.
    chunker: Arc<RecursiveChunker>,

    /// Hybrid search engine sharing the backend and embedder.
    engine: Arc<HybridSearchEngine<B, E>>,

    config: Arc<QavConfig>,
}

/// Search request parameters.
#[derive(Debug, Deserialize, Serialize)]
pub struct SearchParams {
    /// Index to search; also selects the document retriever.
    pub collection: String,

    #[serde(flatten)]
    pub request: SearchRequest,
}

/// Index name parameter.
#[derive(Debug, Deserialize, Serialize)]
pub struct IndexParams {
    pub index: String,
}

/// A document to store as-is (or after Mongo mapping).
#[derive(Debug, Deserialize, Serialize)]
pub struct DocumentParams {
    pub index: String,
    pub doc: Value,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DeleteDocumentParams {
    pub index: String,
    pub doc_id: String,
}

/// Replacement annotations for one document.
#[derive(Debug, Deserialize, Serialize)]
pub struct AnnotationsParams {
    pub index: String,

    /// Matched against both `id` and `mongo_id`.
    pub document_id: String,

    pub mentions: Vec<Map<String, Value>>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ProcessDocumentParams {
    pub index: String,

    #[serde(flatten)]
    pub document: ProcessDocumentRequest,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct QueryIndexParams {
    pub index: String,

    #[serde(flatten)]
    pub query: IndexQuery,
}

/// Tool result.
#[derive(Debug, Serialize)]
pub struct ToolResult {
    /// Whether the operation was successful.
    pub success: bool,

    /// JSON output on success, error description otherwise.
    pub message: String,

    /// Stable error code on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl ToolResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            code: None,
        }
    }

    pub fn error(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            code: Some(code),
        }
    }

    fn from_result<T: Serialize>(tool: &str, result: Result<T>) -> Self {
        match result.and_then(|output| Ok(serde_json::to_string_pretty(&output)?)) {
            Ok(output) => Self::success(output),
            Err(e) => {
                warn!("Tool {} failed: {}", tool, e);
                Self::error(e.error_code(), format!("{} failed: {}", tool, e))
            }
        }
    }
}

impl QavService<ElasticClient, GatedEmbedder<OnnxEmbedder>> {
    /// Connect to the search engine and load the embedding model and tokenizer.
    pub fn from_config(config: QavConfig) -> Result<Self> {
        info!("Initializing qav service against {}", config.elastic.url);

        let backend = Arc::new(ElasticClient::from_config(&config.elastic)?);
        let model = OnnxEmbedder::from_config(&config.embedding)?;
        let embedder = Arc::new(GatedEmbedder::from_config(model, &config.embedding));
        let tokens: Arc<dyn TokenCounter> = Arc::new(HfTokenCounter::from_config(&config.tokenizer)?);
        let retrievers = registry_from_config(
            &config.retrievers,
            Duration::from_secs(config.elastic.request_timeout_secs),
        )?;

        Ok(Self::new(config, backend, embedder, tokens, retrievers))
    }
}

impl<B, E> QavService<B, E>
where
    B: SearchBackend + IndexAdmin,
    E: Embedder,
{
    pub fn new(
        config: QavConfig,
        backend: Arc<B>,
        embedder: Arc<E>,
        tokens: Arc<dyn TokenCounter>,
        retrievers: RetrieverRegistry,
    ) -> Self {
        let engine = Arc::new(HybridSearchEngine::new(
            backend.clone(),
            embedder.clone(),
            tokens,
            retrievers,
            config.retrieval.clone(),
        ));

        Self {
            backend,
            embedder,
            chunker: Arc::new(RecursiveChunker::new()),
            engine,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &QavConfig {
        &self.config
    }

    /// Get the server info.
    pub fn info() -> ServerInfo {
        ServerInfo {
            name: "qav".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "Hybrid vector and full-text retrieval over chunked documents".to_string(),
        }
    }

    /// List available tools.
    pub fn tools() -> Vec<ToolInfo> {
        [
            ("search", "Hybrid passage search over a collection"),
            ("create_index", "Create an index, or describe it if it already exists"),
            ("delete_index", "Delete an index and all its documents"),
            ("get_mapping", "Show the field mapping of an index"),
            ("index_document", "Store a raw document"),
            ("delete_document", "Delete a document by id"),
            ("add_annotations", "Replace the entity annotations of a document"),
            ("index_mongo_document", "Store a Mongo-shaped document"),
            (
                "index_document_with_processing",
                "Annotate, chunk, embed and store a document",
            ),
            ("query_index", "Faceted, paginated document query"),
        ]
        .into_iter()
        .map(|(name, description)| ToolInfo {
            name: name.to_string(),
            description: description.to_string(),
        })
        .collect()
    }

    /// Run a tool by name with JSON parameters.
    pub async fn call(&self, tool: &str, params: Value) -> ToolResult {
        match tool {
            "search" => match parse::<SearchParams>(params) {
                Ok(p) => ToolResult::from_result(tool, self.search(p).await),
                Err(e) => invalid(tool, e),
            },
            "create_index" => match parse::<IndexParams>(params) {
                Ok(p) => ToolResult::from_result(tool, self.create_index(&p.index).await),
                Err(e) => invalid(tool, e),
            },
            "delete_index" => match parse::<IndexParams>(params) {
                Ok(p) => ToolResult::from_result(tool, self.delete_index(&p.index).await),
                Err(e) => invalid(tool, e),
            },
            "get_mapping" => match parse::<IndexParams>(params) {
                Ok(p) => ToolResult::from_result(tool, self.get_mapping(&p.index).await),
                Err(e) => invalid(tool, e),
            },
            "index_document" => match parse::<DocumentParams>(params) {
                Ok(p) => ToolResult::from_result(tool, self.index_document(p).await),
                Err(e) => invalid(tool, e),
            },
            "delete_document" => match parse::<DeleteDocumentParams>(params) {
                Ok(p) => ToolResult::from_result(tool, self.delete_document(p).await),
                Err(e) => invalid(tool, e),
            },
            "add_annotations" => match parse::<AnnotationsParams>(params) {
                Ok(p) => ToolResult::from_result(tool, self.add_annotations(p).await),
                Err(e) => invalid(tool, e),
            },
            "index_mongo_document" => match parse::<DocumentParams>(params) {
                Ok(p) => ToolResult::from_result(tool, self.index_mongo_document(p).await),
                Err(e) => invalid(tool, e),
            },
            "index_document_with_processing" => match parse::<ProcessDocumentParams>(params) {
                Ok(p) => ToolResult::from_result(tool, self.index_document_with_processing(p).await),
                Err(e) => invalid(tool, e),
            },
            "query_index" => match parse::<QueryIndexParams>(params) {
                Ok(p) => ToolResult::from_result(tool, self.query_index(p).await),
                Err(e) => invalid(tool, e),
            },
            other => ToolResult::error("INVALID_ARGUMENT", format!("Unknown tool: {}", other)),
        }
    }

    /// Hybrid search, bounded by the request timeout.
    pub async fn search(&self, params: SearchParams) -> Result<Vec<DocumentResult>> {
        let secs = self.config.retrieval.request_timeout_secs;
        let search = self.engine.search(&params.collection, &params.request);

        match tokio::time::timeout(Duration::from_secs(secs), search).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Search in {} timed out after {}s", params.collection, secs);
                Err(QavError::Timeout { secs })
            }
        }
    }

    /// Create an index, or describe it when it already exists.
    ///
    /// The description carries an extra `n_documents` count.
    pub async fn create_index(&self, name: &str) -> Result<Value> {
        if self.backend.index_exists(name).await? {
            debug!("Index {} already exists", name);
            let description = self.backend.get_index(name).await?;
            let count = self.backend.count(name).await?;
            return Ok(with_document_count(description, count));
        }

        info!("Creating index {}", name);
        self.backend
            .create_index(name, &index_settings(self.embedder.dimension()))
            .await?;
        let description = self.backend.get_index(name).await?;
        Ok(with_document_count(description, 0))
    }

    pub async fn delete_index(&self, name: &str) -> Result<Value> {
        info!("Deleting index {}", name);
        self.backend
            .delete_index(name)
            .await
            .map_err(|e| QavError::search(format!("error while deleting index {}: {}", name, e)))?;
        Ok(json!({ "count": 1 }))
    }

    pub async fn get_mapping(&self, name: &str) -> Result<Value> {
        self.backend.get_mapping(name).await
    }

    /// Store a document without processing.
    pub async fn index_document(&self, params: DocumentParams) -> Result<String> {
        self.store(&params.index, &params.doc).await
    }

    /// Delete every document whose `id` matches, returning `{deleted}`.
    pub async fn delete_document(&self, params: DeleteDocumentParams) -> Result<Value> {
        info!("Deleting document {} from {}", params.doc_id, params.index);
        let query = json!({ "term": { "id": params.doc_id } });
        let deleted = self.backend.delete_by_query(&params.index, &query).await?;
        Ok(json!({ "deleted": deleted }))
    }

    /// Replace a document's annotations with normalized mentions.
    pub async fn add_annotations(&self, params: AnnotationsParams) -> Result<Value> {
        let lookup = json!({
            "query": {
                "bool": {
                    "should": [
                        { "term": { "id": params.document_id } },
                        { "term": { "mongo_id": params.document_id } }
                    ]
                }
            }
        });

        let found = self.backend.search(&params.index, &lookup).await?;
        let engine_id = found
            .hits
            .hits
            .first()
            .and_then(|hit| hit.id.clone())
            .ok_or_else(|| QavError::DocumentNotFound {
                id: params.document_id.clone(),
            })?;

        let annotations: Vec<_> = params.mentions.iter().map(normalize_mention).collect();
        info!(
            "Replacing annotations of {} ({} mentions)",
            params.document_id,
            annotations.len()
        );

        let result = self
            .backend
            .update_document(&params.index, &engine_id, &json!({ "annotations": annotations }))
            .await?;
        self.backend.refresh(&params.index).await?;

        Ok(json!({
            "result": result,
            "document_id": params.document_id,
            "annotations_count": annotations.len(),
        }))
    }

    /// Map a Mongo-shaped record and store it.
    pub async fn index_mongo_document(&self, params: DocumentParams) -> Result<String> {
        let doc = mongo_to_document(&params.doc)?;
        self.store(&params.index, &doc).await
    }

    /// Annotate, chunk, embed and store a document, returning `{result, id}`.
    pub async fn index_document_with_processing(&self, params: ProcessDocumentParams) -> Result<Value> {
        let ProcessDocumentParams { index, document } = params;
        info!(
            "Processing document {} for {} ({} chars, deanonymized text: {})",
            document.id,
            index,
            document.text.chars().count(),
            document.text_deanonymized.is_some()
        );

        let annotations = document.annotations();
        let mut record = document.to_record(&annotations)?;

        if !self.backend.index_exists(&index).await? {
            info!("Creating index {}", index);
            self.backend
                .create_index(&index, &index_settings(self.embedder.dimension()))
                .await?;
        }

        let chunks = self
            .chunker
            .split_text(document.embedding_text(), &self.config.chunking)?;
        let anonymized = self.chunker.split_text(&document.text, &self.config.chunking)?;
        debug!("Split {} into {} chunks", document.id, chunks.len());

        if !chunks.is_empty() {
            let texts: Vec<&str> = chunks.iter().map(String::as_str).collect();
            let embeddings = self.embedder.embed_documents(&texts).await?;
            record.insert(
                "chunks".to_string(),
                chunk_vectors(&chunks, &anonymized, embeddings)?,
            );
        }

        let result = self.store(&index, &Value::Object(record)).await?;
        info!(
            "Indexed {} with {} annotations and {} chunks",
            document.id,
            annotations.len(),
            chunks.len()
        );

        Ok(json!({ "result": result, "id": document.id }))
    }

    /// Faceted, paginated query.
    pub async fn query_index(&self, params: QueryIndexParams) -> Result<IndexQueryResponse> {
        let QueryIndexParams { index, query } = params;
        query.validate()?;

        let response = self.backend.search(&index, &query.body()).await?;
        let total = response.hits.total_value();
        debug!("Query on {} matched {} documents", index, total);

        if total == 0 {
            if let Some(cid) = query.collection() {
                self.diagnose_collection(&index, cid).await;
            }
        }

        Ok(IndexQueryResponse::from_search(&response, &query))
    }

    /// Log how many documents match the collection under each mapping.
    async fn diagnose_collection(&self, index: &str, collection_id: &str) {
        let mut counts = Vec::new();
        for (label, body) in collection_probes(collection_id) {
            match self.backend.search(index, &body).await {
                Ok(r) => counts.push(format!("{}={}", label, r.hits.total_value())),
                Err(e) => warn!("Collection probe {} on {} failed: {}", label, index, e),
            }
        }
        warn!(
            "No documents in {} for collection {}: {}",
            index,
            collection_id,
            counts.join(", ")
        );
    }

    async fn store(&self, index: &str, doc: &Value) -> Result<String> {
        let result = self.backend.index_document(index, None, doc).await?;
        self.backend.refresh(index).await?;
        Ok(result)
    }
}

fn with_document_count(description: Value, count: u64) -> Value {
    match description {
        Value::Object(mut map) => {
            map.insert("n_documents".to_string(), json!(count));
            Value::Object(map)
        }
        other => json!({ "index": other, "n_documents": count }),
    }
}

fn parse<T: serde::de::DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| QavError::invalid_argument(e.to_string()))
}

fn invalid(tool: &str, e: QavError) -> ToolResult {
    ToolResult::error(e.error_code(), format!("{}: {}", tool, e))
}

/// Server info.
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

/// Tool info.
#[derive(Debug, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use qav_core::{ChunkConfig, Document, DocumentRetriever, SearchResponse};
    use qav_embed::{MockEmbedder, MockTokenCounter};
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// In-memory engine: term lookups on `id`/`mongo_id`, canned responses
    /// for everything else.
    #[derive(Default)]
    struct MemoryBackend {
        indices: Mutex<HashMap<String, Vec<(String, Value)>>>,
        bodies: Mutex<HashMap<String, Value>>,
        canned: Mutex<VecDeque<Value>>,
        searches: Mutex<Vec<Value>>,
        refreshed: Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    impl MemoryBackend {
        fn with_canned(responses: Vec<Value>) -> Self {
            Self {
                canned: Mutex::new(responses.into()),
                ..Self::default()
            }
        }

        fn docs(&self, index: &str) -> Vec<Value> {
            self.indices
                .lock()
                .unwrap()
                .get(index)
                .map(|docs| docs.iter().map(|(_, d)| d.clone()).collect())
                .unwrap_or_default()
        }

        fn missing(index: &str) -> QavError {
            QavError::IndexNotFound {
                name: index.to_string(),
            }
        }
    }

    #[async_trait]
    impl SearchBackend for MemoryBackend {
        async fn search(&self, index: &str, body: &Value) -> Result<SearchResponse> {
            self.searches.lock().unwrap().push(body.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let canned = self.canned.lock().unwrap().pop_front();
            if let Some(canned) = canned {
                return Ok(serde_json::from_value(canned)?);
            }

            let wanted: Vec<&str> = body["query"]["bool"]["should"]
                .as_array()
                .map(|clauses| {
                    clauses
                        .iter()
                        .filter_map(|c| c["term"]["id"].as_str().or(c["term"]["mongo_id"].as_str()))
                        .collect()
                })
                .unwrap_or_default();

            let indices = self.indices.lock().unwrap();
            let docs = indices.get(index).ok_or_else(|| Self::missing(index))?;
            let hits: Vec<Value> = docs
                .iter()
                .filter(|(_, d)| wanted.iter().any(|w| d["id"] == *w || d["mongo_id"] == *w))
                .map(|(engine_id, d)| json!({"_id": engine_id, "_score": 1.0, "_source": d}))
                .collect();

            Ok(serde_json::from_value(
                json!({"hits": {"total": {"value": hits.len()}, "hits": hits}}),
            )?)
        }
    }

    #[async_trait]
    impl IndexAdmin for MemoryBackend {
        async fn index_exists(&self, index: &str) -> Result<bool> {
            Ok(self.indices.lock().unwrap().contains_key(index))
        }

        async fn create_index(&self, index: &str, body: &Value) -> Result<()> {
            self.indices.lock().unwrap().insert(index.to_string(), Vec::new());
            self.bodies.lock().unwrap().insert(index.to_string(), body.clone());
            Ok(())
        }

        async fn get_index(&self, index: &str) -> Result<Value> {
            let body = self
                .bodies
                .lock()
                .unwrap()
                .get(index)
                .cloned()
                .ok_or_else(|| Self::missing(index))?;
            let mut description = Map::new();
            description.insert(index.to_string(), body);
            Ok(Value::Object(description))
        }

        async fn delete_index(&self, index: &str) -> Result<()> {
            self.bodies.lock().unwrap().remove(index);
            self.indices
                .lock()
                .unwrap()
                .remove(index)
                .map(|_| ())
                .ok_or_else(|| Self::missing(index))
        }

        async fn count(&self, index: &str) -> Result<u64> {
            Ok(self.docs(index).len() as u64)
        }

        async fn get_mapping(&self, index: &str) -> Result<Value> {
            let description = self.get_index(index).await?;
            Ok(json!({ "mappings": description[index]["mappings"] }))
        }

        async fn index_document(&self, index: &str, id: Option<&str>, doc: &Value) -> Result<String> {
            let mut indices = self.indices.lock().unwrap();
            let docs = indices.entry(index.to_string()).or_default();
            let engine_id = id
                .map(String::from)
                .unwrap_or_else(|| format!("auto-{}", docs.len()));
            docs.push((engine_id, doc.clone()));
            Ok("created".to_string())
        }

        async fn update_document(&self, index: &str, engine_id: &str, partial: &Value) -> Result<String> {
            let mut indices = self.indices.lock().unwrap();
            let docs = indices.get_mut(index).ok_or_else(|| Self::missing(index))?;
            let (_, doc) = docs
                .iter_mut()
                .find(|(id, _)| id == engine_id)
                .ok_or_else(|| QavError::DocumentNotFound {
                    id: engine_id.to_string(),
                })?;
            if let (Some(doc), Some(partial)) = (doc.as_object_mut(), partial.as_object()) {
                for (k, v) in partial {
                    doc.insert(k.clone(), v.clone());
                }
            }
            Ok("updated".to_string())
        }

        async fn delete_by_query(&self, index: &str, query: &Value) -> Result<u64> {
            let id = query["term"]["id"].clone();
            let mut indices = self.indices.lock().unwrap();
            let docs = indices.get_mut(index).ok_or_else(|| Self::missing(index))?;
            let before = docs.len();
            docs.retain(|(_, d)| d["id"] != id);
            Ok((before - docs.len()) as u64)
        }

        async fn refresh(&self, index: &str) -> Result<()> {
            self.refreshed.lock().unwrap().push(index.to_string());
            Ok(())
        }
    }

    struct MapRetriever(HashMap<String, Document>);

    #[async_trait]
    impl DocumentRetriever for MapRetriever {
        async fn retrieve(&self, id: &str) -> Result<Document> {
            self.0
                .get(id)
                .cloned()
                .ok_or_else(|| QavError::retriever(id, "not available"))
        }
    }

    fn service_with(backend: MemoryBackend, config: QavConfig) -> QavService<MemoryBackend, MockEmbedder> {
        let docs = [("d1", "Il ricorso è respinto. Spese compensate.")]
            .iter()
            .map(|(id, text)| (id.to_string(), Document::new(*id, *text)))
            .collect();
        QavService::new(
            config,
            Arc::new(backend),
            Arc::new(MockEmbedder::with_dimension(8)),
            Arc::new(MockTokenCounter::new()),
            RetrieverRegistry::new(Arc::new(MapRetriever(docs))),
        )
    }

    fn service(backend: MemoryBackend) -> QavService<MemoryBackend, MockEmbedder> {
        service_with(backend, QavConfig::default())
    }

    fn chunk_hit(doc_id: &str, offset: usize, text: &str) -> Value {
        json!({
            "_id": format!("es-{}", doc_id),
            "_source": {"id": doc_id},
            "inner_hits": {"chunks.vectors": {"hits": {"hits": [{
                "_nested": {"field": "chunks", "offset": offset, "_nested": {"field": "vectors", "offset": 0}},
                "fields": {"chunks.vectors.text": [text], "chunks.vectors.text_anonymized": [text]}
            }]}}}
        })
    }

    #[tokio::test]
    async fn test_server_info_and_tools() {
        let info = QavService::<MemoryBackend, MockEmbedder>::info();
        assert_eq!(info.name, "qav");

        let tools = QavService::<MemoryBackend, MockEmbedder>::tools();
        assert_eq!(tools.len(), 10);
        assert!(tools.iter().any(|t| t.name == "search"));
        assert!(tools.iter().any(|t| t.name == "index_document_with_processing"));
    }

    #[tokio::test]
    async fn test_create_index_is_get_or_create() {
        let svc = service(MemoryBackend::default());

        let created = svc.create_index("sentenze").await.unwrap();
        assert_eq!(created["n_documents"], 0);
        let vectors = &created["sentenze"]["mappings"]["properties"]["chunks"]["properties"]["vectors"];
        assert_eq!(vectors["properties"]["predicted_value"]["dims"], 8);

        svc.index_document(DocumentParams {
            index: "sentenze".to_string(),
            doc: json!({"id": "d1", "text": "x"}),
        })
        .await
        .unwrap();

        let existing = svc.create_index("sentenze").await.unwrap();
        assert_eq!(existing["n_documents"], 1);
        assert!(existing.get("sentenze").is_some());
    }

    #[tokio::test]
    async fn test_delete_index() {
        let svc = service(MemoryBackend::default());
        svc.create_index("tmp").await.unwrap();
        assert_eq!(svc.delete_index("tmp").await.unwrap(), json!({"count": 1}));

        let err = svc.delete_index("tmp").await.unwrap_err();
        assert_eq!(err.error_code(), "SEARCH_ERROR");
    }

    #[tokio::test]
    async fn test_index_and_delete_raw_document() {
        let svc = service(MemoryBackend::default());
        let result = svc
            .index_document(DocumentParams {
                index: "raw".to_string(),
                doc: json!({"id": "d1", "text": "uno"}),
            })
            .await
            .unwrap();
        assert_eq!(result, "created");
        assert_eq!(*svc.backend.refreshed.lock().unwrap(), vec!["raw".to_string()]);

        let deleted = svc
            .delete_document(DeleteDocumentParams {
                index: "raw".to_string(),
                doc_id: "d1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(deleted, json!({"deleted": 1}));
        assert!(svc.backend.docs("raw").is_empty());
    }

    #[tokio::test]
    async fn test_index_document_with_processing() {
        let mut config = QavConfig::default();
        config.chunking = ChunkConfig {
            chunk_size: 20,
            chunk_overlap: 5,
        };
        let svc = service_with(MemoryBackend::default(), config);

        let mut document = ProcessDocumentRequest::new(
            "doc-7",
            "M**** R**** ha firmato il contratto con la banca",
            "c1",
        );
        document.text_deanonymized = Some("Mario Rossi ha firmato il contratto con la banca".to_string());
        document.name = Some("Contratto".to_string());
        document.features = Some(json!({"origin": "upload"}));
        document.annotation_sets = Some(json!({
            "entities_": {"annotations": [
                {"id": 1, "start": 0, "end": 11, "type": "persona"},
                {"id": 2, "start": 3}
            ]}
        }));

        let result = svc
            .index_document_with_processing(ProcessDocumentParams {
                index: "contratti".to_string(),
                document,
            })
            .await
            .unwrap();
        assert_eq!(result, json!({"result": "created", "id": "doc-7"}));
        assert!(svc.backend.bodies.lock().unwrap().contains_key("contratti"));

        let stored = &svc.backend.docs("contratti")[0];
        assert_eq!(stored["collectionId"], "c1");
        assert_eq!(stored["metadata"], json!([]));
        assert!(stored.get("features").is_none());
        assert!(stored.get("annotation_sets").is_none());
        assert_eq!(stored["annotations"].as_array().unwrap().len(), 1);
        assert_eq!(stored["annotations"][0]["mention"], "M**** R****");

        let chunks = stored["chunks"].as_array().unwrap();
        assert!(chunks.len() >= 2);
        let first = &chunks[0]["vectors"];
        assert_eq!(first["text"], "Mario Rossi ha");
        assert_eq!(first["text_anonymized"], "M**** R**** ha");
        assert_eq!(first["entities"], "");
        assert_eq!(first["predicted_value"].as_array().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_add_annotations_by_mongo_id() {
        let svc = service(MemoryBackend::default());
        svc.index_mongo_document(DocumentParams {
            index: "sentenze".to_string(),
            doc: json!({
                "id": "m42", "name": "Sentenza", "text": "Testo",
                "features": {"annoruolo": "2019", "clusters": {"entities_merged": []}}
            }),
        })
        .await
        .unwrap();

        let result = svc
            .call(
                "add_annotations",
                json!({
                    "index": "sentenze",
                    "document_id": "m42",
                    "mentions": [
                        {"id": 1, "mention": "Luca Verdi", "type": "controparte", "start": 3, "end": 13},
                        {"id": 2, "mention": "Milano", "type": "luogo"}
                    ]
                }),
            )
            .await;
        assert!(result.success, "{}", result.message);
        let output: Value = serde_json::from_str(&result.message).unwrap();
        assert_eq!(output["annotations_count"], 2);
        assert_eq!(output["document_id"], "m42");

        let stored = &svc.backend.docs("sentenze")[0];
        assert_eq!(stored["metadata"], json!([{"type": "annoruolo", "value": "2019"}]));
        assert_eq!(stored["annotations"][0]["display_name"], "L*** V****");
        assert_eq!(stored["annotations"][0]["anonymize"], true);
        assert_eq!(stored["annotations"][1]["display_name"], "Milano");
    }

    #[tokio::test]
    async fn test_add_annotations_unknown_document() {
        let svc = service(MemoryBackend::default());
        svc.create_index("sentenze").await.unwrap();

        let result = svc
            .call(
                "add_annotations",
                json!({"index": "sentenze", "document_id": "nope", "mentions": []}),
            )
            .await;
        assert!(!result.success);
        assert_eq!(result.code, Some("DOCUMENT_NOT_FOUND"));
    }

    #[tokio::test]
    async fn test_query_index() {
        let page = json!({"hits": {"total": {"value": 3}, "hits": [
            {"_id": "e1", "_score": 1.5, "_source": {"id": "d1", "name": "Uno", "text": "t",
                "metadata": [{"type": "annosentenza", "value": "2020"}]}}
        ]}});
        let svc = service(MemoryBackend::with_canned(vec![page]));

        let mut query = IndexQuery::new("ricorso");
        query.documents_per_page = 2;
        query.page = 2;
        let response = svc
            .query_index(QueryIndexParams {
                index: "sentenze".to_string(),
                query,
            })
            .await
            .unwrap();

        assert_eq!(response.hits[0].id, "d1");
        assert_eq!(response.pagination.total_pages, 2);
        assert_eq!(response.pagination.current_page, 2);
        assert_eq!(response.facets.metadata["annosentenza"][0].count, 1);

        let sent = svc.backend.searches.lock().unwrap()[0].clone();
        assert_eq!(sent["from"], 2);
        assert_eq!(sent["size"], 2);
    }

    #[tokio::test]
    async fn test_query_index_empty_collection_runs_probes() {
        let empty = json!({"hits": {"total": {"value": 0}, "hits": []}});
        let svc = service(MemoryBackend::with_canned(vec![
            empty.clone(),
            empty.clone(),
            empty.clone(),
            empty,
        ]));

        let mut query = IndexQuery::new("");
        query.collection_id = Some("c9".to_string());
        let response = svc
            .query_index(QueryIndexParams {
                index: "sentenze".to_string(),
                query,
            })
            .await
            .unwrap();
        assert!(response.hits.is_empty());
        assert_eq!(response.pagination.total_pages, 0);

        let searches = svc.backend.searches.lock().unwrap();
        assert_eq!(searches.len(), 4);
        assert_eq!(searches[1]["size"], 0);
        assert_eq!(searches[1]["query"]["term"]["collectionId.keyword"], "c9");
    }

    #[tokio::test]
    async fn test_search_tool() {
        let response = json!({"hits": {"total": {"value": 1}, "hits": [
            chunk_hit("d1", 0, "Il ricorso è respinto.")
        ]}});
        let svc = service(MemoryBackend::with_canned(vec![response.clone(), response]));

        let result = svc
            .call(
                "search",
                json!({
                    "collection": "sentenze",
                    "query": "What is the verdict?",
                    "filter_ids": ["d1"],
                    "retrievalMethod": "full"
                }),
            )
            .await;
        assert!(result.success, "{}", result.message);

        let output: Vec<DocumentResult> = serde_json::from_str(&result.message).unwrap();
        assert_eq!(output.len(), 1);
        assert!(output[0].full_docs);
        assert_eq!(output[0].chunks[0].text, "Il ricorso è respinto. Spese compensate.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_timeout() {
        let backend = MemoryBackend {
            delay: Some(Duration::from_secs(600)),
            ..MemoryBackend::default()
        };
        let mut config = QavConfig::default();
        config.retrieval.request_timeout_secs = 5;
        let svc = service_with(backend, config);

        let err = svc
            .search(SearchParams {
                collection: "sentenze".to_string(),
                request: SearchRequest::new("verdict"),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, QavError::Timeout { secs: 5 }));
    }

    #[tokio::test]
    async fn test_query_index_rejects_page_out_of_range() {
        let svc = service(MemoryBackend::default());

        let result = svc
            .call(
                "query_index",
                json!({"index": "sentenze", "text": "ricorso", "page": usize::MAX / 2}),
            )
            .await;
        assert!(!result.success);
        assert_eq!(result.code, Some("INVALID_ARGUMENT"));
        assert!(svc.backend.searches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_params_and_unknown_tool() {
        let svc = service(MemoryBackend::default());

        let result = svc.call("create_index", json!({"name": "x"})).await;
        assert!(!result.success);
        assert_eq!(result.code, Some("INVALID_ARGUMENT"));

        let result = svc.call("reindex", json!({})).await;
        assert!(!result.success);
        assert!(result.message.contains("Unknown tool"));
    }
}
