use crate::document::Document;
use crate::error::StoreError;
use async_trait::async_trait;

/// Downstream document store that receives flushed batches.
///
/// Implementations transport documents to a concrete backend (a JSON-lines
/// file, OpenSearch, ClickHouse, etc). The sink calls them from its
/// background worker only, so there is never more than one write in
/// flight per sink.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert `documents` into `collection`.
    ///
    /// **Returns**
    /// - `Ok(n)` with the number of documents accepted by the backend.
    /// - `Err(..)` classified as transient (retried with backoff) or
    ///   permanent (the batch is dropped and reported).
    ///
    /// Stores that report [`supports_bulk_insert`](Self::supports_bulk_insert)
    /// must apply the whole slice or none of it.
    async fn insert_many(&self, collection: &str, documents: &[Document]) -> Result<usize, StoreError>;

    /// Insert a single document. Used when bulk insert is unsupported.
    ///
    /// Default implementation forwards to [`insert_many`](Self::insert_many).
    async fn insert_one(&self, collection: &str, document: &Document) -> Result<(), StoreError> {
        self.insert_many(collection, std::slice::from_ref(document)).await.map(|_| ())
    }

    /// Whether [`insert_many`](Self::insert_many) is atomic for the whole batch.
    ///
    /// When `false` the flusher writes events one at a time and tracks
    /// which ones were delivered. Default is `true`.
    fn supports_bulk_insert(&self) -> bool {
        true
    }
}
