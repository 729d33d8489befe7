//! REST client for an Elasticsearch-compatible search engine.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};

use qav_core::{ElasticConfig, IndexAdmin, QavError, Result, SearchBackend, SearchResponse};

/// Search engine client.
#[derive(Debug, Clone)]
pub struct ElasticClient {
    http: reqwest::Client,
    base_url: String,
}

impl ElasticClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|e| QavError::search(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &ElasticConfig) -> Result<Self> {
        info!("Connecting to search engine at {}", config.url);
        Self::new(
            config.url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, index: &str, endpoint: &[&str]) -> Result<String> {
        check_index_name(index)?;
        let mut url = format!("{}/{}", self.base_url, index);
        for part in endpoint {
            url.push('/');
            url.push_str(part);
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        debug!("{} {}", method, url);
        self.http.request(method, url)
    }

    /// Send a request and decode the JSON body, mapping engine errors.
    async fn send(&self, index: &str, request: RequestBuilder) -> Result<Value> {
        let response = request
            .send()
            .await
            .map_err(|e| QavError::search(format!("Request to search engine failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| QavError::search(format!("Failed to read engine response: {}", e)))?;

        if !status.is_success() {
            return Err(engine_error(status, index, &body));
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }
}

/// Reject index names that would escape the index path segment.
fn check_index_name(index: &str) -> Result<()> {
    if index.is_empty() || index.contains(&['/', '?', '#', ' '][..]) {
        return Err(QavError::invalid_argument(format!(
            "invalid index name {:?}",
            index
        )));
    }
    Ok(())
}

/// Map a failed engine response to an error.
fn engine_error(status: StatusCode, index: &str, body: &str) -> QavError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));
    let kind = error
        .and_then(|e| e.get("type"))
        .and_then(Value::as_str)
        .unwrap_or("");
    let reason = error
        .and_then(|e| e.get("reason").and_then(Value::as_str).or_else(|| e.as_str()))
        .unwrap_or(body);

    if status == StatusCode::NOT_FOUND && kind == "index_not_found_exception" {
        return QavError::IndexNotFound {
            name: index.to_string(),
        };
    }

    if kind.is_empty() {
        QavError::search(format!("{}: {}", status, reason))
    } else {
        QavError::search(format!("{} {}: {}", status, kind, reason))
    }
}

#[async_trait]
impl SearchBackend for ElasticClient {
    async fn search(&self, index: &str, body: &Value) -> Result<SearchResponse> {
        let url = self.url(index, &["_search"])?;
        let value = self.send(index, self.request(Method::POST, &url).json(body)).await?;
        let response: SearchResponse = serde_json::from_value(value)?;
        debug!(
            "Search on {} returned {} hits",
            index,
            response.hits.hits.len()
        );
        Ok(response)
    }
}

#[async_trait]
impl IndexAdmin for ElasticClient {
    async fn index_exists(&self, index: &str) -> Result<bool> {
        let url = self.url(index, &[])?;
        let response = self
            .request(Method::HEAD, &url)
            .send()
            .await
            .map_err(|e| QavError::search(format!("Request to search engine failed: {}", e)))?;

        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(QavError::search(format!(
                "Unexpected status {} checking index {}",
                s, index
            ))),
        }
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<()> {
        let url = self.url(index, &[])?;
        self.send(index, self.request(Method::PUT, &url).json(body))
            .await?;
        info!("Created index {}", index);
        Ok(())
    }

    async fn get_index(&self, index: &str) -> Result<Value> {
        let url = self.url(index, &[])?;
        self.send(index, self.request(Method::GET, &url)).await
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        let url = self.url(index, &[])?;
        self.send(index, self.request(Method::DELETE, &url)).await?;
        info!("Deleted index {}", index);
        Ok(())
    }

    async fn count(&self, index: &str) -> Result<u64> {
        let url = self.url(index, &["_count"])?;
        let value = self.send(index, self.request(Method::GET, &url)).await?;
        value
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| QavError::search("count response has no count"))
    }

    async fn get_mapping(&self, index: &str) -> Result<Value> {
        let url = self.url(index, &["_mapping"])?;
        self.send(index, self.request(Method::GET, &url)).await
    }

    async fn index_document(&self, index: &str, id: Option<&str>, doc: &Value) -> Result<String> {
        let request = match id {
            Some(id) => self.request(Method::PUT, &self.url(index, &["_doc", id])?),
            None => self.request(Method::POST, &self.url(index, &["_doc"])?),
        };
        let value = self.send(index, request.json(doc)).await?;
        Ok(result_field(&value))
    }

    async fn update_document(&self, index: &str, engine_id: &str, partial: &Value) -> Result<String> {
        let url = self.url(index, &["_update", engine_id])?;
        let value = self
            .send(
                index,
                self.request(Method::POST, &url).json(&json!({ "doc": partial })),
            )
            .await?;
        Ok(result_field(&value))
    }

    async fn delete_by_query(&self, index: &str, query: &Value) -> Result<u64> {
        let url = self.url(index, &["_delete_by_query"])?;
        let value = self
            .send(
                index,
                self.request(Method::POST, &url).json(&json!({ "query": query })),
            )
            .await?;
        Ok(value.get("deleted").and_then(Value::as_u64).unwrap_or(0))
    }

    async fn refresh(&self, index: &str) -> Result<()> {
        let url = self.url(index, &["_refresh"])?;
        self.send(index, self.request(Method::POST, &url)).await?;
        Ok(())
    }
}

fn result_field(value: &Value) -> String {
    value
        .get("result")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}
