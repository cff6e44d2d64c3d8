// src/storage/elastic.rs

//! Elasticsearch-compatible document index over its HTTP API.
//!
//! Only the handful of endpoints the crawler needs are used: index
//! existence/creation, single-document reads and writes, `_mget` for batched
//! timestamp lookups, `_bulk` for crawl batches, and `_search` for the max-id
//! aggregation and term lookups.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode, header};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{AppError, Result};
use crate::models::{Collection, DocumentStamps, IndexConfig};
use crate::storage::{BulkAction, BulkOperation, BulkSummary, DocumentIndex};

/// Painless script for update-with-upsert: replace the snapshot, refresh
/// `updated_at`, leave `created_at` untouched.
const UPDATE_SCRIPT: &str =
    "ctx._source.data = params.data; ctx._source.updated_at = params.updated_at";

const NDJSON: &str = "application/x-ndjson";

/// How many item failures are quoted in a bulk error message.
const MAX_REPORTED_FAILURES: usize = 3;

#[derive(Debug, Deserialize)]
struct MgetResponse {
    #[serde(default)]
    docs: Vec<MgetDoc>,
}

#[derive(Debug, Deserialize)]
struct MgetDoc {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source")]
    source: Option<DocumentStamps>,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    #[serde(rename = "_id", default)]
    id: String,
    status: u16,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<Value>,
}

/// Document index backed by an Elasticsearch cluster.
pub struct ElasticIndex {
    http: Client,
    base_url: String,
    config: IndexConfig,
}

impl ElasticIndex {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            config: config.clone(),
        })
    }

    /// Physical index name of a collection.
    pub fn index_name(&self, collection: Collection) -> &str {
        self.config.collection_name(collection)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let builder = self.http.request(method, url);
        match &self.config.username {
            Some(username) => builder.basic_auth(username, self.config.password.as_deref()),
            None => builder,
        }
    }

    /// Send a request with an optional JSON body and return status and body.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<(StatusCode, Vec<u8>)> {
        let mut builder = self.request(method, path);
        if let Some(body) = body {
            builder = builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(serde_json::to_vec(body)?);
        }

        let response = builder.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?.to_vec();
        Ok((status, bytes))
    }

    async fn head(&self, path: &str) -> Result<bool> {
        let (status, _) = self.send(Method::HEAD, path, None).await?;
        match status {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(AppError::index_read(format!("HEAD {path} returned {s}"))),
        }
    }

    fn mappings(collection: Collection) -> Value {
        let mut data = json!({ "id": { "type": "long" } });
        if collection == Collection::Maps {
            data["beatmapset_id"] = json!({ "type": "long" });
            data["checksum"] = json!({ "type": "keyword" });
        }
        json!({
            "mappings": {
                "properties": {
                    "created_at": { "type": "date" },
                    "updated_at": { "type": "date" },
                    "data": { "properties": data }
                }
            }
        })
    }

    /// Render operations as a `_bulk` NDJSON body.
    fn bulk_body(&self, operations: &[BulkOperation]) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        for op in operations {
            let target = json!({
                "_index": self.index_name(op.collection),
                "_id": op.id.to_string(),
            });
            let (action, source) = match op.action {
                BulkAction::Create => (json!({ "create": target }), op.new_document()),
                BulkAction::Upsert => (
                    json!({ "update": target }),
                    json!({
                        "script": {
                            "source": UPDATE_SCRIPT,
                            "lang": "painless",
                            "params": { "data": op.data, "updated_at": op.timestamp }
                        },
                        "upsert": op.new_document(),
                    }),
                ),
            };
            serde_json::to_writer(&mut body, &action)?;
            body.push(b'\n');
            serde_json::to_writer(&mut body, &source)?;
            body.push(b'\n');
        }
        Ok(body)
    }

    fn summarize(response: BulkResponse) -> Result<BulkSummary> {
        let mut summary = BulkSummary::default();
        let mut failures = Vec::new();

        for (action, item) in response.items.iter().flat_map(|entry| entry.iter()) {
            match (action.as_str(), item.status) {
                (_, 200..=299) if item.result.as_deref() == Some("created") => {
                    summary.created += 1
                }
                ("create", 200..=299) => summary.created += 1,
                (_, 200..=299) => summary.updated += 1,
                ("create", 409) => summary.conflicts += 1,
                _ => failures.push(format!(
                    "{action} {} -> {} {}",
                    item.id,
                    item.status,
                    item.error.as_ref().map(Value::to_string).unwrap_or_default()
                )),
            }
        }

        if failures.is_empty() {
            return Ok(summary);
        }
        let total = failures.len();
        failures.truncate(MAX_REPORTED_FAILURES);
        Err(AppError::index_write(format!(
            "{total} bulk item(s) failed: {}",
            failures.join("; ")
        )))
    }
}

#[async_trait]
impl DocumentIndex for ElasticIndex {
    async fn ensure_collection(&self, collection: Collection) -> Result<bool> {
        let name = self.index_name(collection).to_string();
        if self.head(&name).await? {
            return Ok(false);
        }

        let (status, body) = self
            .send(Method::PUT, &name, Some(&Self::mappings(collection)))
            .await?;
        if status.is_success() {
            log::info!("Created index '{}' for {}", name, collection);
            return Ok(true);
        }

        // Another process created it between the HEAD and the PUT.
        if String::from_utf8_lossy(&body).contains("resource_already_exists_exception") {
            return Ok(false);
        }
        Err(AppError::index_write(format!(
            "creating index '{name}' returned {status}"
        )))
    }

    async fn get(&self, collection: Collection, id: u64) -> Result<Option<Value>> {
        let path = format!("{}/_doc/{id}", self.index_name(collection));
        let (status, body) = self.send(Method::GET, &path, None).await?;
        match status {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let mut doc: Value = serde_json::from_slice(&body)?;
                Ok(Some(doc["_source"].take()).filter(|source| !source.is_null()))
            }
            s => Err(AppError::index_read(format!("GET {path} returned {s}"))),
        }
    }

    async fn create(&self, collection: Collection, id: u64, document: &Value) -> Result<bool> {
        let path = format!("{}/_create/{id}", self.index_name(collection));
        let (status, _) = self.send(Method::PUT, &path, Some(document)).await?;
        match status {
            s if s.is_success() => Ok(true),
            StatusCode::CONFLICT => Ok(false),
            s => Err(AppError::index_write(format!("PUT {path} returned {s}"))),
        }
    }

    async fn stamps(
        &self,
        collection: Collection,
        ids: &[u64],
    ) -> Result<HashMap<u64, DocumentStamps>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let path = format!(
            "{}/_mget?_source_includes=created_at,updated_at",
            self.index_name(collection)
        );
        let ids: Vec<String> = ids.iter().map(u64::to_string).collect();
        let (status, body) = self
            .send(Method::POST, &path, Some(&json!({ "ids": ids })))
            .await?;

        match status {
            StatusCode::NOT_FOUND => return Ok(HashMap::new()),
            s if !s.is_success() => {
                return Err(AppError::index_read(format!("POST {path} returned {s}")));
            }
            _ => {}
        }

        let response: MgetResponse = serde_json::from_slice(&body)?;
        Ok(response
            .docs
            .into_iter()
            .filter(|doc| doc.found)
            .filter_map(|doc| Some((doc.id.parse().ok()?, doc.source?)))
            .collect())
    }

    async fn bulk(&self, operations: &[BulkOperation]) -> Result<BulkSummary> {
        if operations.is_empty() {
            return Ok(BulkSummary::default());
        }

        let response = self
            .request(Method::POST, "_bulk")
            .header(header::CONTENT_TYPE, NDJSON)
            .body(self.bulk_body(operations)?)
            .send()
            .await
            .map_err(|e| AppError::index_write(format!("bulk request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::index_write(format!("_bulk returned {status}")));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| AppError::index_write(format!("bulk response unreadable: {e}")))?;

        Self::summarize(serde_json::from_slice(&body)?)
    }

    async fn max_id(&self, collection: Collection) -> Result<Option<u64>> {
        let path = format!("{}/_search", self.index_name(collection));
        let query = json!({
            "size": 0,
            "aggs": { "max_id": { "max": { "field": "data.id" } } }
        });
        let (status, body) = self.send(Method::POST, &path, Some(&query)).await?;
        match status {
            StatusCode::NOT_FOUND => return Ok(None),
            s if !s.is_success() => {
                return Err(AppError::index_read(format!("POST {path} returned {s}")));
            }
            _ => {}
        }

        let response: Value = serde_json::from_slice(&body)?;
        // Aggregations report numbers as floats, null on an empty index.
        Ok(response
            .pointer("/aggregations/max_id/value")
            .and_then(Value::as_f64)
            .map(|v| v as u64))
    }

    async fn find_by_field(
        &self,
        collection: Collection,
        field: &str,
        value: &str,
    ) -> Result<Option<Value>> {
        let path = format!("{}/_search", self.index_name(collection));
        let query = json!({
            "size": 1,
            "query": { "term": { field: value } }
        });
        let (status, body) = self.send(Method::POST, &path, Some(&query)).await?;
        match status {
            StatusCode::NOT_FOUND => return Ok(None),
            s if !s.is_success() => {
                return Err(AppError::index_read(format!("POST {path} returned {s}")));
            }
            _ => {}
        }

        let mut response: Value = serde_json::from_slice(&body)?;
        Ok(response
            .pointer_mut("/hits/hits/0/_source")
            .map(Value::take))
    }
}
