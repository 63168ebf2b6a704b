use crate::document::Document;
use crate::error::StoreError;
use crate::store::DocumentStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// In-process store keeping documents per collection.
///
/// Besides backing `memory://` destinations it is the fake used by the
/// crate's tests: failures can be scripted with [`fail_next`](Self::fail_next)
/// and every call is counted.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<Document>>>,
    failures: Mutex<VecDeque<StoreError>>,
    batch_sizes: Mutex<Vec<usize>>,
    calls: AtomicUsize,
    per_event: bool,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Report no bulk support so the flusher writes one document at a time.
    pub fn per_event(mut self) -> Self {
        self.per_event = true;
        self
    }

    /// Sleep for `latency` before every insert.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the next insert call fail with `error`. Calls queue up in order.
    pub fn fail_next(&self, error: StoreError) {
        self.failures.lock().push_back(error);
    }

    /// Documents stored in `collection`, in insertion order.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections.lock().get(collection).cloned().unwrap_or_default()
    }

    /// `message` field of every document in `collection`.
    pub fn messages(&self, collection: &str) -> Vec<String> {
        self.documents(collection)
            .iter()
            .filter_map(|d| d.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .collect()
    }

    /// Size of every successful insert call, in order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }

    /// Number of insert calls, successful or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert_many(&self, collection: &str, documents: &[Document]) -> Result<usize, StoreError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }

        self.collections
            .lock()
            .entry(collection.to_string())
            .or_default()
            .extend(documents.iter().cloned());
        self.batch_sizes.lock().push(documents.len());
        Ok(documents.len())
    }

    fn supports_bulk_insert(&self) -> bool {
        !self.per_event
    }
}
