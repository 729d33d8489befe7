//! Core domain types for the retrieval service.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Retrieval method requested by the caller.
///
/// Controls which of the two searches run:
///
/// | method          | vector | full-text |
/// |-----------------|--------|-----------|
/// | `full`          | yes    | yes       |
/// | `dense`         | yes    | no        |
/// | `full-text`     | no     | yes       |
/// | `hibrid_no_ner` | yes    | yes, without entity matching |
///
/// Any other wire value is kept as [`RetrievalMethod::Unrecognized`] and runs
/// neither search.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RetrievalMethod {
    Full,
    Dense,
    FullText,
    HybridNoNer,
    Unrecognized(String),
}

impl RetrievalMethod {
    /// Parse a wire value. Never fails; unknown values become `Unrecognized`.
    pub fn parse(value: &str) -> Self {
        match value {
            "full" => Self::Full,
            "dense" => Self::Dense,
            "full-text" => Self::FullText,
            "hibrid_no_ner" | "hybrid_no_ner" => Self::HybridNoNer,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    /// Wire value of the method.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Full => "full",
            Self::Dense => "dense",
            Self::FullText => "full-text",
            Self::HybridNoNer => "hibrid_no_ner",
            Self::Unrecognized(other) => other,
        }
    }

    /// Whether the k-NN vector query is executed.
    pub fn runs_vector(&self) -> bool {
        matches!(self, Self::Full | Self::Dense | Self::HybridNoNer)
    }

    /// Whether the full-text query is executed.
    pub fn runs_full_text(&self) -> bool {
        matches!(self, Self::Full | Self::FullText | Self::HybridNoNer)
    }

    /// Whether the full-text query also matches the chunk `entities` field.
    pub fn matches_entities(&self) -> bool {
        !matches!(self, Self::HybridNoNer)
    }
}

impl Default for RetrievalMethod {
    fn default() -> Self {
        Self::Full
    }
}

impl From<String> for RetrievalMethod {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<RetrievalMethod> for String {
    fn from(value: RetrievalMethod) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for RetrievalMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A hybrid search request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Free-text query.
    pub query: String,

    /// Target document ids. Empty means a global search.
    #[serde(default)]
    pub filter_ids: Vec<String>,

    /// Retrieval method selector.
    #[serde(default, rename = "retrievalMethod")]
    pub retrieval_method: RetrievalMethod,

    /// Optional collection restriction.
    #[serde(default, rename = "collectionId")]
    pub collection_id: Option<String>,

    /// Always return passages, never whole documents.
    #[serde(default)]
    pub force_rag: bool,
}

impl SearchRequest {
    /// Create a request with the default method and no filters.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    /// The single target document id, if exactly one was supplied.
    pub fn single_target(&self) -> Option<&str> {
        match self.filter_ids.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }
}

/// A full document record as returned by a document retriever.
///
/// Only `id` and `text` are interpreted; the remaining fields are passed
/// through to callers untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub text: String,

    #[serde(default)]
    pub preview: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation_sets: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<serde_json::Value>,

    /// Any other fields of the record.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Document {
    /// Create a document with just an id and text.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            text: text.into(),
            preview: String::new(),
            annotation_sets: None,
            features: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// Metadata attached to every returned chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub doc_id: String,

    /// Length of the chunk text in characters.
    pub chunk_size: usize,
}

/// A passage returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Owning document id.
    pub id: String,

    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_anonymized: Option<String>,

    pub metadata: ChunkMetadata,
}

impl ChunkRecord {
    /// Create a passage record for a selected chunk.
    pub fn new(doc_id: &str, text: &str, text_anonymized: &str) -> Self {
        Self {
            id: doc_id.to_string(),
            text: text.to_string(),
            text_anonymized: Some(text_anonymized.to_string()),
            metadata: ChunkMetadata {
                doc_id: doc_id.to_string(),
                chunk_size: text.chars().count(),
            },
        }
    }

    /// A pseudo-chunk carrying a document's entire text.
    pub fn whole_document(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            text: doc.text.clone(),
            text_anonymized: None,
            metadata: ChunkMetadata {
                doc_id: doc.id.clone(),
                chunk_size: doc.text.chars().count(),
            },
        }
    }
}

/// One entry of the search response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentResult {
    pub doc: Document,
    pub chunks: Vec<ChunkRecord>,

    /// True when `chunks` holds the whole document instead of passages.
    pub full_docs: bool,
}

/// Search engine response envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub hits: Hits,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub took: Option<u64>,
}

/// A ranked hit list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Hits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<HitTotal>,

    #[serde(default)]
    pub hits: Vec<Hit>,
}

impl Hits {
    /// Total hit count reported by the engine, or the page size.
    pub fn total_value(&self) -> u64 {
        self.total
            .as_ref()
            .map(|t| t.value)
            .unwrap_or(self.hits.len() as u64)
    }
}

/// Total hit count.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HitTotal {
    pub value: u64,
}

/// A single hit, at document or nested-chunk level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Hit {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "_score", default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,

    #[serde(rename = "_source", default)]
    pub source: serde_json::Value,

    /// Position of a nested hit within its parent.
    #[serde(rename = "_nested", default, skip_serializing_if = "Option::is_none")]
    pub nested: Option<NestedIdentity>,

    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inner_hits: BTreeMap<String, InnerHits>,
}

impl Hit {
    /// The `id` field of the hit source.
    pub fn source_id(&self) -> Option<&str> {
        self.source.get("id").and_then(|v| v.as_str())
    }
}

/// Inner-hit section of a hit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InnerHits {
    #[serde(default)]
    pub hits: Hits,
}

/// Path of a nested hit, e.g. `chunks[3].vectors[0]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedIdentity {
    pub field: String,
    pub offset: usize,

    #[serde(rename = "_nested", default, skip_serializing_if = "Option::is_none")]
    pub child: Option<Box<NestedIdentity>>,
}

impl NestedIdentity {
    /// Offsets from the outermost to the innermost level.
    pub fn offsets(&self) -> Vec<usize> {
        let mut out = vec![self.offset];
        let mut cur = self.child.as_deref();
        while let Some(n) = cur {
            out.push(n.offset);
            cur = n.child.as_deref();
        }
        out
    }
}

/// Stable document id derived from the document text.
pub fn content_id(text: &str) -> String {
    hex::encode(blake3::hash(text.as_bytes()).as_bytes())
}
