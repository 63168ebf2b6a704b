use crate::document::Document;
use crate::error::StoreError;
use crate::http::{classify_request_error, classify_status};
use crate::store::DocumentStore;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;

/// OpenSearch store that writes batches via the HTTP bulk API.
///
/// The collection name is used as the target index. Items the cluster
/// refuses individually are not retried (unless it refused the whole batch
/// with `429`); the flusher reports the shortfall.
#[derive(Clone)]
pub struct OpenSearchStore {
    client: Client,
    /// Base URL of the OpenSearch cluster, e.g. "http://localhost:9200".
    base_url: String,
}

impl OpenSearchStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        OpenSearchStore {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    fn bulk_body(index: &str, documents: &[Document]) -> Result<String, StoreError> {
        let action = serde_json::json!({ "index": { "_index": index } }).to_string();
        let mut body = String::new();
        for doc in documents {
            let line = serde_json::to_string(doc)
                .map_err(|e| StoreError::permanent("failed to encode document").with_source(e))?;
            body.push_str(&action);
            body.push('\n');
            body.push_str(&line);
            body.push('\n');
        }
        Ok(body)
    }
}

#[derive(Deserialize)]
struct BulkResponse {
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Deserialize)]
struct BulkItem {
    status: u16,
}

impl BulkResponse {
    /// Number of documents the cluster accepted.
    ///
    /// A batch refused entirely with per-item `429` (the cluster's write
    /// queue is full) is a transient error, and resending it cannot
    /// duplicate anything. When only some items got `429` the rest are
    /// already indexed, so those items are counted as rejected instead.
    fn accepted(&self, sent: usize) -> Result<usize, StoreError> {
        if !self.errors {
            return Ok(sent);
        }
        let statuses: Vec<u16> = self
            .items
            .iter()
            .filter_map(|item| item.values().next())
            .map(|item| item.status)
            .collect();
        let ok = statuses.iter().filter(|s| (200..300).contains(*s)).count();
        if ok == 0 && !statuses.is_empty() && statuses.iter().all(|&s| s == 429) {
            return Err(StoreError::transient(format!(
                "OpenSearch rejected all {} documents with 429",
                statuses.len()
            )));
        }
        Ok(ok)
    }
}

#[async_trait]
impl DocumentStore for OpenSearchStore {
    async fn insert_many(&self, collection: &str, documents: &[Document]) -> Result<usize, StoreError> {
        let body = Self::bulk_body(collection, documents)?;
        let url = format!("{}/_bulk", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| classify_request_error(e, "OpenSearch"))?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
        if let Some(err) = classify_status(status, &text, "OpenSearch") {
            return Err(err);
        }

        let parsed: BulkResponse = serde_json::from_str(&text)
            .map_err(|e| StoreError::transient("unreadable bulk response").with_source(e))?;
        parsed.accepted(documents.len())
    }
}
