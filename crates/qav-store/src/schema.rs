//! Index settings and mappings for document collections.

use serde_json::{json, Value};

/// Nested objects allowed per document (chunks × vectors plus annotations).
pub const NESTED_OBJECTS_LIMIT: u64 = 20000;

/// Field holding chunk embeddings.
pub const VECTOR_FIELD: &str = "chunks.vectors.predicted_value";

/// Nested path of chunk vectors.
pub const VECTORS_PATH: &str = "chunks.vectors";

/// Settings and mappings body for a new collection index.
pub fn index_settings(dims: usize) -> Value {
    json!({
        "settings": {
            "index.mapping.nested_objects.limit": NESTED_OBJECTS_LIMIT
        },
        "mappings": {
            "properties": {
                "text": {"type": "text"},
                "name": {"type": "keyword"},
                "preview": {"type": "keyword"},
                "id": {"type": "keyword"},
                "metadata": {
                    "type": "nested",
                    "properties": {
                        "type": {"type": "keyword"},
                        "value": {"type": "keyword"}
                    }
                },
                "annotations": {
                    "type": "nested",
                    "properties": {
                        "mention": {"type": "keyword"},
                        "start": {"type": "integer"},
                        "end": {"type": "integer"},
                        "display_name": {"type": "keyword"},
                        "id": {"type": "integer"},
                        "type": {"type": "keyword"},
                        "is_linked": {"type": "boolean"},
                        "id_ER": {"type": "keyword"}
                    }
                },
                "chunks": {
                    "type": "nested",
                    "properties": {
                        "vectors": {
                            "type": "nested",
                            "properties": {
                                "predicted_value": {
                                    "type": "dense_vector",
                                    "index": true,
                                    "dims": dims,
                                    "similarity": "cosine"
                                },
                                "text": {"type": "text"},
                                "entities": {"type": "text"}
                            }
                        }
                    }
                }
            }
        }
    })
}
