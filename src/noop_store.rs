use crate::document::Document;
use crate::error::StoreError;
use crate::store::DocumentStore;
use async_trait::async_trait;

/// A store that accepts and discards every document.
///
/// Useful for measuring the overhead of the pipeline itself without any
/// external I/O, and for tests that don't care about persistence.
#[derive(Clone, Default)]
pub struct NoopStore;

#[async_trait]
impl DocumentStore for NoopStore {
    async fn insert_many(&self, _collection: &str, documents: &[Document]) -> Result<usize, StoreError> {
        Ok(documents.len())
    }
}
