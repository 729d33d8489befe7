//! Document shaping before indexing.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use qav_core::annotation::{display_name_for, process_raw_annotation, Annotation};
use qav_core::{QavError, Result};

/// Mongo `features` keys copied into the `metadata` list.
pub const METADATA_FEATURES: &[&str] = &[
    "annosentenza",
    "annoruolo",
    "codiceoggetto",
    "parte",
    "controparte",
    "nomegiudice",
    "tipodocumento",
];

/// Top-level keys never stored in the index.
const DROPPED_KEYS: &[&str] = &["annotation_sets", "annoation_sets", "features", "_id"];

/// A document to annotate, chunk, embed and index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDocumentRequest {
    pub id: String,

    /// Anonymized text, stored and shown to users.
    pub text: String,

    #[serde(rename = "collectionId")]
    pub collection_id: String,

    #[serde(default)]
    pub annotation_sets: Option<Value>,

    #[serde(default)]
    pub preview: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub features: Option<Value>,

    #[serde(default)]
    pub offset_type: Option<String>,

    /// De-anonymized text; embedded instead of `text` when present.
    #[serde(default)]
    pub text_deanonymized: Option<String>,
}

impl ProcessDocumentRequest {
    pub fn new(id: impl Into<String>, text: impl Into<String>, collection_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            collection_id: collection_id.into(),
            annotation_sets: None,
            preview: None,
            name: None,
            features: None,
            offset_type: None,
            text_deanonymized: None,
        }
    }

    /// Text to split and embed.
    pub fn embedding_text(&self) -> &str {
        self.text_deanonymized
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.text)
    }

    /// NER annotations from `annotation_sets.entities_.annotations`.
    ///
    /// Malformed annotations are logged and skipped.
    pub fn annotations(&self) -> Vec<Annotation> {
        let raw = self
            .annotation_sets
            .as_ref()
            .and_then(|sets| sets.get("entities_"))
            .and_then(|entities| entities.get("annotations"))
            .and_then(Value::as_array);

        let Some(raw) = raw else {
            return Vec::new();
        };
        debug!("Processing {} raw annotations for {}", raw.len(), self.id);

        raw.iter()
            .enumerate()
            .filter_map(|(i, ann)| match process_raw_annotation(ann, &self.text, &self.id) {
                Ok(annotation) => Some(annotation),
                Err(e) => {
                    warn!("Skipping annotation {} of {}: {}", i, self.id, e);
                    None
                }
            })
            .collect()
    }

    /// The stored record, without chunks.
    pub fn to_record(&self, annotations: &[Annotation]) -> Result<Map<String, Value>> {
        let mut record = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => return Err(QavError::internal("document did not serialize to an object")),
        };
        record.remove("text_deanonymized");
        record.insert("annotations".to_string(), serde_json::to_value(annotations)?);
        Ok(clean_document(record))
    }
}

/// Drop pipeline-only fields and make sure `metadata` exists.
pub fn clean_document(mut record: Map<String, Value>) -> Map<String, Value> {
    for key in DROPPED_KEYS {
        record.remove(*key);
    }
    record
        .entry("metadata")
        .or_insert_with(|| Value::Array(Vec::new()));
    record
}

/// Map a Mongo-shaped record onto the index document layout.
///
/// Whitelisted `features` become `{type, value}` metadata, and merged entity
/// clusters become annotations with anonymized display names.
pub fn mongo_to_document(doc: &Value) -> Result<Value> {
    let field = |key: &str| {
        doc.get(key)
            .ok_or_else(|| QavError::invalid_argument(format!("mongo document has no '{}'", key)))
    };

    let features = field("features")?
        .as_object()
        .ok_or_else(|| QavError::invalid_argument("mongo document features must be an object"))?;

    let metadata: Vec<Value> = features
        .iter()
        .filter(|(key, _)| METADATA_FEATURES.contains(&key.as_str()))
        .map(|(key, value)| json!({ "type": key, "value": value }))
        .collect();

    let clusters = features
        .get("clusters")
        .and_then(|c| c.get("entities_merged"))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            QavError::invalid_argument("mongo document has no features.clusters.entities_merged")
        })?;

    let annotations = clusters
        .iter()
        .map(cluster_annotation)
        .collect::<Result<Vec<_>>>()?;

    Ok(json!({
        "mongo_id": field("id")?,
        "name": field("name")?,
        "text": field("text")?,
        "metadata": metadata,
        "annotations": annotations,
    }))
}

fn cluster_annotation(cluster: &Value) -> Result<Annotation> {
    let id = cluster
        .get("id")
        .cloned()
        .ok_or_else(|| QavError::invalid_argument("entity cluster has no id"))?;
    let kind = cluster
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| QavError::invalid_argument("entity cluster has no type"))?;
    let title = cluster
        .get("title")
        .and_then(Value::as_str)
        .ok_or_else(|| QavError::invalid_argument("entity cluster has no title"))?;

    let is_linked = match cluster.get("url") {
        Some(Value::String(url)) => !url.is_empty(),
        Some(Value::Bool(linked)) => *linked,
        Some(Value::Null) | None => false,
        Some(_) => true,
    };

    let id_er = match &id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    Ok(Annotation {
        id,
        id_er,
        start: 0,
        end: 0,
        kind: kind.to_string(),
        mention: title.to_string(),
        is_linked,
        display_name: display_name_for(title, kind),
        anonymize: None,
    })
}

/// Nested chunk entries: `chunks[i].vectors`.
///
/// Chunk `i` of the anonymized split is stored beside chunk `i` of the
/// embedded split, falling back to the embedded text when the anonymized
/// split is shorter.
pub fn chunk_vectors(chunks: &[String], anonymized: &[String], embeddings: Vec<Vec<f32>>) -> Result<Value> {
    if embeddings.len() != chunks.len() {
        return Err(QavError::embedding(format!(
            "expected {} embeddings, got {}",
            chunks.len(),
            embeddings.len()
        )));
    }

    let entries: Vec<Value> = chunks
        .iter()
        .zip(embeddings)
        .enumerate()
        .map(|(i, (chunk, embedding))| {
            let text_anonymized = anonymized.get(i).unwrap_or(chunk);
            json!({
                "vectors": {
                    "predicted_value": embedding,
                    "text": chunk,
                    "text_anonymized": text_anonymized,
                    "entities": "",
                }
            })
        })
        .collect();

    Ok(Value::Array(entries))
}
