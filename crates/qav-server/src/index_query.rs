//! Faceted, paginated document query over an index.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use qav_core::{Hit, QavError, Result, SearchResponse};

/// Fields left out of returned document sources.
const EXCLUDED_SOURCE_FIELDS: &[&str] = &["chunks", "annotation_sets"];

/// A `{type, value}` facet restriction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetFilter {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl FacetFilter {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

/// Query parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexQuery {
    /// Query-string text; blank matches every document.
    #[serde(default)]
    pub text: String,

    /// Metadata restrictions, OR-ed with the annotation restrictions.
    #[serde(default)]
    pub metadata: Vec<FacetFilter>,

    /// Annotation restrictions on `id_ER` and type.
    #[serde(default)]
    pub annotations: Vec<FacetFilter>,

    /// Maximum values per facet group (default: 20).
    #[serde(default = "default_n_facets")]
    pub n_facets: usize,

    /// 1-based page number (default: 1).
    #[serde(default = "default_page")]
    pub page: usize,

    /// Page size (default: 20).
    #[serde(default = "default_documents_per_page")]
    pub documents_per_page: usize,

    #[serde(default)]
    pub collection_id: Option<String>,
}

fn default_n_facets() -> usize {
    20
}

fn default_page() -> usize {
    1
}

fn default_documents_per_page() -> usize {
    20
}

impl IndexQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Vec::new(),
            annotations: Vec::new(),
            n_facets: default_n_facets(),
            page: default_page(),
            documents_per_page: default_documents_per_page(),
            collection_id: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.page == 0 {
            return Err(QavError::invalid_argument("page starts at 1"));
        }
        if self.documents_per_page == 0 {
            return Err(QavError::invalid_argument("documents_per_page must be positive"));
        }
        if self.from_offset().is_none() {
            return Err(QavError::invalid_argument(format!(
                "page {} is out of range for {} documents per page",
                self.page, self.documents_per_page
            )));
        }
        Ok(())
    }

    pub fn collection(&self) -> Option<&str> {
        self.collection_id.as_deref().filter(|c| !c.trim().is_empty())
    }

    /// Offset of the first hit on this page, `None` when it overflows.
    pub fn from_offset(&self) -> Option<usize> {
        self.page.saturating_sub(1).checked_mul(self.documents_per_page)
    }

    /// Search body for this page. Call [`IndexQuery::validate`] first.
    pub fn body(&self) -> Value {
        let mut must = Vec::new();
        if self.text.trim().is_empty() {
            must.push(json!({ "match_all": {} }));
        } else {
            must.push(json!({
                "query_string": { "query": self.text, "default_field": "text" }
            }));
        }

        if let Some(cid) = self.collection() {
            must.push(json!({
                "bool": {
                    "should": [
                        { "term": { "collectionId.keyword": cid } },
                        { "match_phrase": { "collectionId": cid } }
                    ],
                    "minimum_should_match": 1
                }
            }));
        }

        let filters: Vec<Value> = self
            .annotations
            .iter()
            .map(|f| nested_filter("annotations", "id_ER", f))
            .chain(self.metadata.iter().map(|f| nested_filter("metadata", "value", f)))
            .collect();

        let mut query = json!({ "must": must });
        if !filters.is_empty() {
            query["filter"] = json!({ "bool": { "should": filters } });
        }

        json!({
            "from": self.from_offset().unwrap_or_default(),
            "size": self.documents_per_page,
            "_source": { "excludes": EXCLUDED_SOURCE_FIELDS },
            "query": { "bool": query },
        })
    }
}

fn nested_filter(path: &str, value_field: &str, filter: &FacetFilter) -> Value {
    json!({
        "nested": {
            "path": path,
            "query": {
                "bool": {
                    "must": [
                        { "term": { format!("{}.{}", path, value_field): filter.value } },
                        { "term": { format!("{}.type", path): filter.kind } }
                    ]
                }
            }
        }
    })
}

/// Count-only probes run when a collection-restricted query finds nothing.
pub(crate) fn collection_probes(collection_id: &str) -> [(&'static str, Value); 3] {
    let probe = |query: Value| json!({ "size": 0, "query": query });
    [
        (
            "collectionId.keyword",
            probe(json!({ "term": { "collectionId.keyword": collection_id } })),
        ),
        (
            "collectionId",
            probe(json!({ "term": { "collectionId": collection_id } })),
        ),
        ("all", probe(json!({ "match_all": {} }))),
    ]
}

/// A matching document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexHit {
    pub id: String,
    pub name: String,
    pub text: String,
    pub preview: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl IndexHit {
    fn from_hit(hit: &Hit) -> Self {
        let text_field = |key: &str| {
            hit.source
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let id = hit
            .source_id()
            .map(String::from)
            .or_else(|| scalar_string(hit.source.get("mongo_id")))
            .or_else(|| hit.id.clone())
            .unwrap_or_default();

        Self {
            id,
            name: text_field("name"),
            text: text_field("text"),
            preview: text_field("preview"),
            score: hit.score,
        }
    }
}

/// One facet value with the number of returned documents carrying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetValue {
    pub value: String,
    pub count: usize,
    pub display_name: String,
}

/// Facet values grouped by type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFacets {
    pub annotations: BTreeMap<String, Vec<FacetValue>>,
    pub metadata: BTreeMap<String, Vec<FacetValue>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub current_page: usize,
    pub total_pages: u64,
    pub total_hits: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexQueryResponse {
    pub hits: Vec<IndexHit>,
    pub facets: QueryFacets,
    pub pagination: Pagination,
}

impl IndexQueryResponse {
    /// Shape an engine response. Facets cover the returned page only.
    pub fn from_search(response: &SearchResponse, query: &IndexQuery) -> Self {
        let hits = &response.hits.hits;
        let total_hits = response.hits.total_value();
        let per_page = query.documents_per_page.max(1) as u64;

        let mut annotations = FacetTally::default();
        let mut metadata = FacetTally::default();

        for hit in hits {
            let mut seen = HashSet::new();
            for ann in source_array(hit, "annotations") {
                let Some(kind) = ann.get("type").and_then(Value::as_str) else {
                    continue;
                };
                let mention = ann.get("mention").and_then(Value::as_str).unwrap_or_default();
                let value = ann
                    .get("id_ER")
                    .and_then(Value::as_str)
                    .filter(|v| !v.is_empty())
                    .unwrap_or(mention);
                let display = ann
                    .get("display_name")
                    .and_then(Value::as_str)
                    .unwrap_or(mention);
                if seen.insert((kind.to_string(), value.to_string())) {
                    annotations.add(kind, value, display);
                }
            }

            let mut seen = HashSet::new();
            for meta in source_array(hit, "metadata") {
                let Some(kind) = meta.get("type").and_then(Value::as_str) else {
                    continue;
                };
                let Some(value) = scalar_string(meta.get("value")) else {
                    continue;
                };
                if seen.insert((kind.to_string(), value.clone())) {
                    metadata.add(kind, &value, &value);
                }
            }
        }

        Self {
            hits: hits.iter().map(IndexHit::from_hit).collect(),
            facets: QueryFacets {
                annotations: annotations.finish(query.n_facets),
                metadata: metadata.finish(query.n_facets),
            },
            pagination: Pagination {
                current_page: query.page,
                total_pages: total_hits.div_ceil(per_page),
                total_hits,
            },
        }
    }
}

#[derive(Default)]
struct FacetTally {
    groups: BTreeMap<String, Vec<FacetValue>>,
}

impl FacetTally {
    fn add(&mut self, kind: &str, value: &str, display_name: &str) {
        let group = self.groups.entry(kind.to_string()).or_default();
        match group.iter_mut().find(|f| f.value == value) {
            Some(facet) => facet.count += 1,
            None => group.push(FacetValue {
                value: value.to_string(),
                count: 1,
                display_name: display_name.to_string(),
            }),
        }
    }

    fn finish(mut self, limit: usize) -> BTreeMap<String, Vec<FacetValue>> {
        for group in self.groups.values_mut() {
            group.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
            group.truncate(limit);
        }
        self.groups
    }
}

fn source_array<'a>(hit: &'a Hit, key: &str) -> impl Iterator<Item = &'a Value> {
    hit.source
        .get(key)
        .and_then(Value::as_array)
        .map(|v| v.iter())
        .into_iter()
        .flatten()
}

fn scalar_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
