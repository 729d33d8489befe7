//! HTTP document retriever.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde_json::Value;
use tracing::{debug, info};

use qav_core::{Document, DocumentRetriever, QavError, Result, RetrieverRegistry, RetrieversConfig};

/// Fetches full documents from a document service at `GET {base_url}/{id}`.
#[derive(Debug, Clone)]
pub struct HttpRetriever {
    http: reqwest::Client,
    base_url: String,
}

impl HttpRetriever {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base_url}/{id}` with the id percent-encoded as a single path segment.
    fn document_url(&self, id: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| QavError::retriever(id, format!("invalid base url {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| QavError::retriever(id, format!("base url {} cannot hold a path", self.base_url)))?
            .pop_if_empty()
            .push(id);
        Ok(url)
    }
}

/// Decode a retriever response body into a document.
///
/// The document service reports failures in-band as `{"error": reason}`.
fn decode_document(id: &str, body: Value) -> Result<Document> {
    if let Some(reason) = body.get("error") {
        let reason = reason
            .as_str()
            .map(String::from)
            .unwrap_or_else(|| reason.to_string());
        return Err(QavError::retriever(id, reason));
    }

    serde_json::from_value(body)
        .map_err(|e| QavError::retriever(id, format!("malformed document: {}", e)))
}

#[async_trait]
impl DocumentRetriever for HttpRetriever {
    async fn retrieve(&self, id: &str) -> Result<Document> {
        let url = self.document_url(id)?;
        debug!("Retrieving document {} from {}", id, url);

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| QavError::retriever(id, e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                return Err(QavError::DocumentNotFound { id: id.to_string() })
            }
            s if !s.is_success() => {
                return Err(QavError::retriever(id, format!("status {}", s)));
            }
            _ => {}
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| QavError::retriever(id, format!("invalid response body: {}", e)))?;

        decode_document(id, body)
    }
}

/// Build the per-collection retriever registry from configuration.
pub fn registry_from_config(config: &RetrieversConfig, timeout: Duration) -> Result<RetrieverRegistry> {
    let http = reqwest::Client::builder()
        .timeout(timeout)
        .gzip(true)
        .build()
        .map_err(|e| QavError::config(format!("Failed to build retriever client: {}", e)))?;

    let mut registry =
        RetrieverRegistry::new(Arc::new(HttpRetriever::new(http.clone(), &config.default_url)));

    for (collection, url) in &config.collections {
        info!("Retriever for collection {}: {}", collection, url);
        registry = registry.with_collection(
            collection.clone(),
            Arc::new(HttpRetriever::new(http.clone(), url)),
        );
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_url() {
        let r = HttpRetriever::new(reqwest::Client::new(), "http://documents:3001/api/document/");
        assert_eq!(r.base_url(), "http://documents:3001/api/document");
        assert_eq!(
            r.document_url("abc").unwrap().as_str(),
            "http://documents:3001/api/document/abc"
        );
    }

    #[test]
    fn test_document_url_encodes_id() {
        let r = HttpRetriever::new(reqwest::Client::new(), "http://documents:3001/api/document");
        assert_eq!(
            r.document_url("a/b c?d#e").unwrap().as_str(),
            "http://documents:3001/api/document/a%2Fb%20c%3Fd%23e"
        );

        let r = HttpRetriever::new(reqwest::Client::new(), "not a url");
        let err = r.document_url("d1").unwrap_err();
        assert!(err.is_document_level());
    }

    #[test]
    fn test_decode_document() {
        let doc = decode_document(
            "d1",
            json!({"id": "d1", "name": "Sentenza", "text": "Il ricorso è respinto.", "preview": "Il ricorso"}),
        )
        .unwrap();
        assert_eq!(doc.id, "d1");
        assert_eq!(doc.name, "Sentenza");
    }

    #[test]
    fn test_decode_in_band_error() {
        let err = decode_document("d1", json!({"error": "document not available"})).unwrap_err();
        assert!(err.is_document_level());
        assert!(err.to_string().contains("document not available"));

        let err = decode_document("d1", json!({"error": {"code": 500}})).unwrap_err();
        assert!(matches!(err, QavError::Retriever { ref id, .. } if id == "d1"));
    }

    #[test]
    fn test_decode_malformed_document() {
        let err = decode_document("d1", json!({"text": "no id"})).unwrap_err();
        assert_eq!(err.error_code(), "RETRIEVER_ERROR");
    }

    #[test]
    fn test_registry_from_config() {
        let mut config = RetrieversConfig::default();
        config
            .collections
            .insert("eu".to_string(), "http://10.0.0.108:3008/api/document".to_string());

        let registry = registry_from_config(&config, Duration::from_secs(5)).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_retriever_is_document_level() {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(500))
            .build()
            .unwrap();
        let r = HttpRetriever::new(http, "http://127.0.0.1:1/api/document");
        let err = r.retrieve("d1").await.unwrap_err();
        assert!(err.is_document_level());
    }
}
