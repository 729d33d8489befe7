//! Chunk ranking and Reciprocal Rank Fusion (RRF).
//!
//! Each search method yields a ranked list of documents, each carrying its
//! matching chunks as inner hits. Ranks are assigned to chunks, not
//! documents: walking hits and their inner hits in engine order, the first
//! chunk seen gets rank 1, the next rank 2, and so on across all documents.
//!
//! The two rank maps are then fused:
//!
//! ```text
//! score(chunk) = 1 / (rrf_k + rank_vector) + 1 / (rrf_k + rank_full_text)
//! ```
//!
//! where a chunk missing from one method contributes nothing for it.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use qav_core::{Hit, SearchResponse};

const TEXT_FIELD: &str = "chunks.vectors.text";
const ANONYMIZED_FIELD: &str = "chunks.vectors.text_anonymized";

/// Position of a chunk within its document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChunkSlot {
    /// Nested offsets reported by the engine, outermost first.
    Position(Vec<usize>),
    /// Chunk text, when the engine reports no position.
    Text(String),
}

/// Identity of a chunk across both rankings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub doc_id: String,
    pub slot: ChunkSlot,
}

/// Chunk content carried beside its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPayload {
    pub text: String,
    pub text_anonymized: String,
}

/// Chunk ranks from one search method.
#[derive(Debug, Clone, Default)]
pub struct RankMap {
    ranks: HashMap<ChunkKey, usize>,
    payloads: HashMap<ChunkKey, ChunkPayload>,
    order: Vec<ChunkKey>,
}

impl RankMap {
    /// Record a chunk; a chunk seen earlier keeps its better rank.
    pub fn insert(&mut self, key: ChunkKey, payload: ChunkPayload) -> Option<usize> {
        if self.ranks.contains_key(&key) {
            return None;
        }
        let rank = self.order.len() + 1;
        self.ranks.insert(key.clone(), rank);
        self.payloads.insert(key.clone(), payload);
        self.order.push(key);
        Some(rank)
    }

    pub fn rank(&self, key: &ChunkKey) -> Option<usize> {
        self.ranks.get(key).copied()
    }

    pub fn payload(&self, key: &ChunkKey) -> Option<&ChunkPayload> {
        self.payloads.get(key)
    }

    /// Chunk identities in rank order.
    pub fn keys(&self) -> impl Iterator<Item = &ChunkKey> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// A chunk with its fused score.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedChunk {
    pub key: ChunkKey,
    pub payload: ChunkPayload,
    pub score: f64,
}

/// Reciprocal-rank term; a missing rank contributes 0.
pub fn rrf_score(rrf_k: usize, rank: Option<usize>) -> f64 {
    match rank {
        Some(rank) => 1.0 / (rrf_k + rank) as f64,
        None => 0.0,
    }
}

/// Assign global chunk ranks from a search response.
pub fn collect_ranks(response: &SearchResponse) -> RankMap {
    let mut ranks = RankMap::default();

    for hit in &response.hits.hits {
        let Some(doc_id) = hit.source_id() else {
            warn!("Skipping hit {:?} without a source id", hit.id);
            continue;
        };

        for section in hit.inner_hits.values() {
            for inner in &section.hits.hits {
                match chunk_from_inner_hit(doc_id, inner) {
                    Some((key, payload)) => {
                        ranks.insert(key, payload);
                    }
                    None => debug!("Inner hit of {} carries no chunk text", doc_id),
                }
            }
        }
    }

    ranks
}

fn chunk_from_inner_hit(doc_id: &str, inner: &Hit) -> Option<(ChunkKey, ChunkPayload)> {
    let text = field_text(inner, TEXT_FIELD)?;
    let text_anonymized = field_text(inner, ANONYMIZED_FIELD).unwrap_or_else(|| text.clone());

    let slot = match &inner.nested {
        Some(nested) => ChunkSlot::Position(nested.offsets()),
        None => ChunkSlot::Text(text.clone()),
    };

    Some((
        ChunkKey {
            doc_id: doc_id.to_string(),
            slot,
        },
        ChunkPayload {
            text,
            text_anonymized,
        },
    ))
}

/// Read a chunk field from an inner hit.
///
/// Engines report requested fields either flat (`"chunks.vectors.text":
/// ["..."]`) or as a nested structure (`"chunks": [{"vectors": [{"text":
/// ["..."]}]}]`); `_source` is used when fields are absent.
fn field_text(inner: &Hit, path: &str) -> Option<String> {
    if let Some(value) = inner.fields.get(path) {
        return first_string(value);
    }

    let segments: Vec<&str> = path.split('.').collect();
    if let Some((head, rest)) = segments.split_first() {
        if let Some(value) = inner.fields.get(*head) {
            if let Some(found) = walk(value, rest) {
                return Some(found);
            }
        }
    }

    // Nested _source is relative to the nested object.
    segments
        .last()
        .and_then(|leaf| inner.source.get(*leaf))
        .and_then(first_string)
}

fn walk(value: &Value, path: &[&str]) -> Option<String> {
    match value {
        Value::Array(items) => items.first().and_then(|v| walk(v, path)),
        Value::Object(map) => {
            let (head, rest) = path.split_first()?;
            walk(map.get(*head)?, rest)
        }
        Value::String(s) if path.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn first_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.first().and_then(first_string),
        _ => None,
    }
}

/// Fuse two rank maps with RRF, best first.
///
/// Every chunk in the union of both maps appears exactly once. Ties keep
/// union order: vector-ranked chunks first, then full-text-only chunks.
pub fn fuse(vector: &RankMap, full_text: &RankMap, rrf_k: usize) -> Vec<FusedChunk> {
    let union = vector
        .keys()
        .chain(full_text.keys().filter(|k| vector.rank(k).is_none()));

    let mut fused: Vec<FusedChunk> = union
        .filter_map(|key| {
            let payload = vector.payload(key).or_else(|| full_text.payload(key))?;
            let score =
                rrf_score(rrf_k, vector.rank(key)) + rrf_score(rrf_k, full_text.rank(key));
            Some(FusedChunk {
                key: key.clone(),
                payload: payload.clone(),
                score,
            })
        })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn key(doc: &str, pos: usize) -> ChunkKey {
        ChunkKey {
            doc_id: doc.to_string(),
            slot: ChunkSlot::Position(vec![pos, 0]),
        }
    }

    fn payload(text: &str) -> ChunkPayload {
        ChunkPayload {
            text: text.to_string(),
            text_anonymized: text.to_string(),
        }
    }

    fn rank_map(keys: &[ChunkKey]) -> RankMap {
        let mut map = RankMap::default();
        for k in keys {
            map.insert(k.clone(), payload("t"));
        }
        map
    }

    fn response(value: serde_json::Value) -> SearchResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_ranks_are_global_across_documents() {
        let resp = response(json!({
            "hits": {"hits": [
                {"_id": "e1", "_source": {"id": "docA"}, "inner_hits": {"chunks.vectors": {"hits": {"hits": [
                    {"_nested": {"field": "chunks", "offset": 3, "_nested": {"field": "vectors", "offset": 0}},
                     "fields": {"chunks.vectors.text": ["a3"], "chunks.vectors.text_anonymized": ["x3"]}},
                    {"_nested": {"field": "chunks", "offset": 1, "_nested": {"field": "vectors", "offset": 0}},
                     "fields": {"chunks.vectors.text": ["a1"]}}
                ]}}}},
                {"_id": "e2", "_source": {"id": "docB"}, "inner_hits": {"chunks.vectors": {"hits": {"hits": [
                    {"_nested": {"field": "chunks", "offset": 0, "_nested": {"field": "vectors", "offset": 0}},
                     "fields": {"chunks.vectors.text": ["b0"]}}
                ]}}}}
            ]}
        }));

        let ranks = collect_ranks(&resp);
        assert_eq!(ranks.len(), 3);
        assert_eq!(ranks.rank(&key("docA", 3)), Some(1));
        assert_eq!(ranks.rank(&key("docA", 1)), Some(2));
        assert_eq!(ranks.rank(&key("docB", 0)), Some(3));

        assert_eq!(ranks.payload(&key("docA", 3)).unwrap().text_anonymized, "x3");
        // anonymized text falls back to text
        assert_eq!(ranks.payload(&key("docA", 1)).unwrap().text_anonymized, "a1");
    }

    #[test]
    fn test_nested_field_layout_and_text_identity() {
        let resp = response(json!({
            "hits": {"hits": [
                {"_source": {"id": "d"}, "inner_hits": {"chunks.vectors": {"hits": {"hits": [
                    {"fields": {"chunks": [{"vectors": [{"text": ["nested text"]}]}]}}
                ]}}}}
            ]}
        }));

        let ranks = collect_ranks(&resp);
        let k = ChunkKey {
            doc_id: "d".to_string(),
            slot: ChunkSlot::Text("nested text".to_string()),
        };
        assert_eq!(ranks.rank(&k), Some(1));
    }

    #[test]
    fn test_hits_without_source_id_or_text_are_skipped() {
        let resp = response(json!({
            "hits": {"hits": [
                {"_id": "e1", "_source": {}, "inner_hits": {"chunks.vectors": {"hits": {"hits": [
                    {"fields": {"chunks.vectors.text": ["orphan"]}}
                ]}}}},
                {"_source": {"id": "d"}, "inner_hits": {"chunks.vectors": {"hits": {"hits": [
                    {"fields": {}}
                ]}}}},
                {"_source": {"id": "d2"}}
            ]}
        }));
        assert!(collect_ranks(&resp).is_empty());
    }

    #[test]
    fn test_duplicate_chunk_keeps_first_rank() {
        let mut map = RankMap::default();
        assert_eq!(map.insert(key("d", 0), payload("a")), Some(1));
        assert_eq!(map.insert(key("d", 0), payload("a")), None);
        assert_eq!(map.insert(key("d", 1), payload("b")), Some(2));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_identical_text_in_different_positions_stays_distinct() {
        let mut map = RankMap::default();
        map.insert(key("d", 0), payload("same"));
        map.insert(key("d", 4), payload("same"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_single_chunk_both_methods_rank_one() {
        let k = key("doc123", 0);
        let fused = fuse(&rank_map(&[k.clone()]), &rank_map(&[k.clone()]), 50);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - 2.0 / 51.0).abs() < 1e-12);
        assert!((fused[0].score - 0.0392).abs() < 1e-4);
    }

    #[test]
    fn test_missing_rank_contributes_nothing() {
        let a = key("d", 0);
        let b = key("d", 1);
        let fused = fuse(&rank_map(&[a.clone()]), &rank_map(&[b.clone()]), 30);
        assert_eq!(fused.len(), 2);
        assert!((fused[0].score - 1.0 / 31.0).abs() < 1e-12);
        assert!((fused[1].score - 1.0 / 31.0).abs() < 1e-12);
        // tie keeps union order
        assert_eq!(fused[0].key, a);
    }

    #[test]
    fn test_agreement_beats_single_method() {
        let a = key("d", 0);
        let b = key("d", 1);
        let c = key("d", 2);
        let vector = rank_map(&[a.clone(), b.clone()]);
        let full_text = rank_map(&[b.clone(), c.clone()]);
        let fused = fuse(&vector, &full_text, 30);
        assert_eq!(fused[0].key, b);
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn test_empty_maps() {
        assert!(fuse(&RankMap::default(), &RankMap::default(), 30).is_empty());
    }

    proptest! {
        #[test]
        fn prop_rrf_monotone_in_rank(rrf_k in 1usize..200, r in 1usize..500, other in proptest::option::of(1usize..500)) {
            let better = rrf_score(rrf_k, Some(r)) + rrf_score(rrf_k, other);
            let worse = rrf_score(rrf_k, Some(r + 1)) + rrf_score(rrf_k, other);
            prop_assert!(better >= worse);
            prop_assert!(rrf_score(rrf_k, Some(r)) > rrf_score(rrf_k, None));
        }

        #[test]
        fn prop_fused_set_is_union(
            v in proptest::collection::vec((0u8..4, 0usize..20), 0..30),
            f in proptest::collection::vec((0u8..4, 0usize..20), 0..30),
        ) {
            let to_keys = |xs: &[(u8, usize)]| -> Vec<ChunkKey> {
                xs.iter().map(|(d, p)| key(&format!("doc{}", d), *p)).collect()
            };
            let vk = to_keys(&v);
            let fk = to_keys(&f);
            let vector = rank_map(&vk);
            let full_text = rank_map(&fk);

            let fused = fuse(&vector, &full_text, 30);

            let expected: std::collections::HashSet<_> = vk.iter().chain(fk.iter()).cloned().collect();
            let got: std::collections::HashSet<_> = fused.iter().map(|c| c.key.clone()).collect();
            prop_assert_eq!(fused.len(), got.len());
            prop_assert_eq!(got, expected);
            prop_assert!(fused.len() <= vector.len() + full_text.len());
            prop_assert!(fused.windows(2).all(|w| w[0].score >= w[1].score));
        }
    }
}
