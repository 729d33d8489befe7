//! Query bodies for the vector and full-text searches.
//!
//! Both queries target chunk vectors nested under `chunks.vectors` and ask
//! for the matching chunks as inner hits, so that ranking happens at chunk
//! level rather than document level.

use serde_json::{json, Value};

use qav_core::{ModeParams, RetrievalMethod, SearchRequest};

/// Chunk fields requested in every inner-hit section.
pub const INNER_HIT_FIELDS: &[&str] = &[
    "chunks.vectors.text",
    "chunks.vectors.text_anonymized",
    "_score",
];

const VECTOR_FIELD: &str = "chunks.vectors.predicted_value";
const VECTORS_PATH: &str = "chunks.vectors";
const COLLECTION_FIELD: &str = "collectionId.keyword";

fn inner_hits(size: usize) -> Value {
    json!({
        "_source": false,
        "fields": INNER_HIT_FIELDS,
        "size": size,
    })
}

fn collection_term(collection_id: &str) -> Value {
    json!({ "term": { COLLECTION_FIELD: collection_id } })
}

/// k-NN query over chunk embeddings.
///
/// With target ids the search is restricted to those documents (and the
/// collection, when given) and draws from `num_candidates` candidates.
pub fn vector_query(
    request: &SearchRequest,
    embedding: &[f32],
    params: &ModeParams,
    num_candidates: usize,
) -> Value {
    let mut knn = json!({
        "inner_hits": inner_hits(params.knn_k),
        "field": VECTOR_FIELD,
        "query_vector": embedding,
        "k": params.knn_k,
    });

    let collection = request.collection_id.as_deref().filter(|c| !c.is_empty());

    if request.filter_ids.is_empty() {
        if let Some(cid) = collection {
            knn["filter"] = collection_term(cid);
        }
    } else {
        let ids = json!({ "terms": { "id": request.filter_ids } });
        knn["num_candidates"] = json!(num_candidates);
        knn["filter"] = match collection {
            Some(cid) => json!({ "bool": { "must": [ids, collection_term(cid)] } }),
            None => ids,
        };
    }

    json!({ "_source": ["id"], "knn": knn })
}

/// Nested full-text query over chunk text (and chunk entities, unless the
/// method excludes entity matching).
pub fn full_text_query(request: &SearchRequest, params: &ModeParams) -> Value {
    let mut should = vec![json!({ "match": { "chunks.vectors.text": request.query } })];
    if request.retrieval_method.matches_entities() {
        should.push(json!({ "match": { "chunks.vectors.entities": request.query } }));
    }

    let nested = json!({
        "nested": {
            "path": VECTORS_PATH,
            "query": { "bool": { "should": should } },
            "inner_hits": inner_hits(params.inner_hits_size),
        }
    });

    let collection = request.collection_id.as_deref().filter(|c| !c.is_empty());

    let mut filters = Vec::new();
    if !request.filter_ids.is_empty() {
        filters.push(json!({ "terms": { "id": request.filter_ids } }));
    }
    if let Some(cid) = collection {
        filters.push(collection_term(cid));
    }

    let query = if filters.is_empty() {
        nested
    } else {
        json!({ "bool": { "filter": filters, "must": nested } })
    };

    json!({ "_source": ["id"], "query": query })
}

/// Whether a method runs no search at all.
pub(crate) fn is_noop(method: &RetrievalMethod) -> bool {
    !method.runs_vector() && !method.runs_full_text()
}

#[cfg(test)]
mod tests {
    use super::*;
    use qav_core::ModeParams;

    fn request(ids: &[&str], collection: Option<&str>, method: RetrievalMethod) -> SearchRequest {
        SearchRequest {
            query: "What is the verdict?".to_string(),
            filter_ids: ids.iter().map(|s| s.to_string()).collect(),
            retrieval_method: method,
            collection_id: collection.map(String::from),
            force_rag: false,
        }
    }

    #[test]
    fn test_filtered_vector_query() {
        let req = request(&["doc123"], None, RetrievalMethod::Full);
        let body = vector_query(&req, &[0.1, 0.2], &ModeParams::SINGLE_DOCUMENT, 1000);

        let knn = &body["knn"];
        assert_eq!(knn["field"], "chunks.vectors.predicted_value");
        assert_eq!(knn["k"], 50);
        assert_eq!(knn["num_candidates"], 1000);
        assert_eq!(knn["inner_hits"]["size"], 50);
        assert_eq!(knn["inner_hits"]["_source"], false);
        assert_eq!(knn["filter"], json!({"terms": {"id": ["doc123"]}}));
        assert_eq!(knn["query_vector"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_filtered_vector_query_with_collection() {
        let req = request(&["a", "b"], Some("c1"), RetrievalMethod::Full);
        let body = vector_query(&req, &[0.0], &ModeParams::MULTI_DOCUMENT, 1000);
        assert_eq!(
            body["knn"]["filter"],
            json!({"bool": {"must": [
                {"terms": {"id": ["a", "b"]}},
                {"term": {"collectionId.keyword": "c1"}}
            ]}})
        );
        assert_eq!(body["knn"]["k"], 25);
    }

    #[test]
    fn test_global_vector_query() {
        let req = request(&[], None, RetrievalMethod::Dense);
        let body = vector_query(&req, &[0.0], &ModeParams::MULTI_DOCUMENT, 1000);
        assert_eq!(body["_source"], json!(["id"]));
        assert!(body["knn"].get("filter").is_none());
        assert!(body["knn"].get("num_candidates").is_none());

        let req = request(&[], Some("c1"), RetrievalMethod::Dense);
        let body = vector_query(&req, &[0.0], &ModeParams::MULTI_DOCUMENT, 1000);
        assert_eq!(body["knn"]["filter"], json!({"term": {"collectionId.keyword": "c1"}}));
    }

    #[test]
    fn test_full_text_should_clause() {
        let req = request(&[], None, RetrievalMethod::Full);
        let body = full_text_query(&req, &ModeParams::MULTI_DOCUMENT);
        let should = &body["query"]["nested"]["query"]["bool"]["should"];
        assert_eq!(should.as_array().unwrap().len(), 2);
        assert_eq!(body["query"]["nested"]["path"], "chunks.vectors");
        assert_eq!(body["query"]["nested"]["inner_hits"]["size"], 30);

        let req = request(&[], None, RetrievalMethod::HybridNoNer);
        let body = full_text_query(&req, &ModeParams::MULTI_DOCUMENT);
        let should = &body["query"]["nested"]["query"]["bool"]["should"];
        assert_eq!(
            should,
            &json!([{"match": {"chunks.vectors.text": "What is the verdict?"}}])
        );
    }

    #[test]
    fn test_filtered_full_text_query() {
        let req = request(&["doc123"], Some("c1"), RetrievalMethod::FullText);
        let body = full_text_query(&req, &ModeParams::SINGLE_DOCUMENT);
        let b = &body["query"]["bool"];
        assert_eq!(
            b["filter"],
            json!([{"terms": {"id": ["doc123"]}}, {"term": {"collectionId.keyword": "c1"}}])
        );
        assert_eq!(b["must"]["nested"]["inner_hits"]["size"], 50);
    }

    #[test]
    fn test_global_full_text_with_collection() {
        let req = request(&[], Some("c1"), RetrievalMethod::Full);
        let body = full_text_query(&req, &ModeParams::MULTI_DOCUMENT);
        assert_eq!(
            body["query"]["bool"]["filter"],
            json!([{"term": {"collectionId.keyword": "c1"}}])
        );
        assert!(body["query"]["bool"]["must"].get("nested").is_some());
    }

    #[test]
    fn test_noop_methods() {
        assert!(is_noop(&RetrievalMethod::Unrecognized("x".into())));
        assert!(!is_noop(&RetrievalMethod::Dense));
    }
}
