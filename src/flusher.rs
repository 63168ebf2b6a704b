use crate::batcher::Batch;
use crate::config::RetryPolicy;
use crate::diagnostics::{Diagnostic, Diagnostics, INTERNAL_TARGET};
use crate::document::{to_document, Document, FormatProvider};
use crate::error::{FailureKind, FlushError, StoreError};
use crate::store::DocumentStore;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::time::sleep;

/// Where the flusher is in its retry cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    Idle,
    Flushing,
    Backoff,
}

/// What a successful flush delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    /// Events the store refused without failing the whole batch.
    pub rejected: usize,
    /// Retries performed before the flush completed.
    pub retries: u32,
}

/// Writes batches to a [`DocumentStore`], retrying transient failures
/// with exponential backoff and dropping permanently failed batches.
pub struct Flusher {
    store: Arc<dyn DocumentStore>,
    collection: String,
    retry: RetryPolicy,
    format: Option<Arc<dyn FormatProvider>>,
    diagnostics: Diagnostics,
    state: FlushState,
}

impl Flusher {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
        retry: RetryPolicy,
        format: Option<Arc<dyn FormatProvider>>,
        diagnostics: Diagnostics,
    ) -> Self {
        Flusher {
            store,
            collection: collection.into(),
            retry,
            format,
            diagnostics,
            state: FlushState::Idle,
        }
    }

    pub fn state(&self) -> FlushState {
        self.state
    }

    /// Deliver `batch`. Never panics on store failures; every event that
    /// is not delivered is reported on the diagnostic channel.
    pub async fn flush(&mut self, batch: Batch) -> Result<FlushReport, FlushError> {
        let batch_id = batch.id;
        let (documents, mut rejected) = self.documents(&batch);

        let result = if documents.is_empty() {
            Ok(FlushReport::default())
        } else if self.store.supports_bulk_insert() {
            self.flush_bulk(batch_id, &documents).await
        } else {
            self.flush_per_event(batch_id, &documents).await
        };
        self.state = FlushState::Idle;

        result.map(|mut report| {
            rejected += report.rejected;
            report.rejected = rejected;
            self.diagnostics.stats().batches_flushed.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(
                target: INTERNAL_TARGET,
                batch_id,
                delivered = report.delivered,
                rejected = report.rejected,
                "batch flushed"
            );
            report
        })
    }

    fn documents(&self, batch: &Batch) -> (Vec<Document>, usize) {
        let mut documents = Vec::with_capacity(batch.len());
        let mut rejected = 0;
        for event in &batch.events {
            match to_document(event, self.format.as_deref()) {
                Ok(doc) => documents.push(doc),
                Err(e) => {
                    rejected += 1;
                    self.diagnostics.report(Diagnostic::EventRejected {
                        batch_id: batch.id,
                        error: format!("failed to serialize event: {}", e),
                    });
                }
            }
        }
        (documents, rejected)
    }

    async fn flush_bulk(&mut self, batch_id: u64, documents: &[Document]) -> Result<FlushReport, FlushError> {
        let mut retries = 0;
        loop {
            self.state = FlushState::Flushing;
            match self.store.insert_many(&self.collection, documents).await {
                Ok(accepted) => {
                    let delivered = accepted.min(documents.len());
                    let missing = documents.len() - delivered;
                    self.diagnostics.stats().delivered.fetch_add(delivered as u64, Ordering::Relaxed);
                    if missing > 0 {
                        self.diagnostics.report(Diagnostic::BatchDropped {
                            batch_id,
                            events: missing,
                            kind: FailureKind::Permanent,
                            error: format!("store accepted {} of {} documents", delivered, documents.len()),
                        });
                    }
                    return Ok(FlushReport { delivered, rejected: missing, retries });
                }
                Err(err) => {
                    retries = self.on_failure(batch_id, retries, documents.len(), err).await?;
                }
            }
        }
    }

    async fn flush_per_event(&mut self, batch_id: u64, documents: &[Document]) -> Result<FlushReport, FlushError> {
        let mut retries = 0;
        let mut delivered = 0;
        let mut rejected = 0;
        let mut next = 0;

        while next < documents.len() {
            self.state = FlushState::Flushing;
            match self.store.insert_one(&self.collection, &documents[next]).await {
                Ok(()) => {
                    // Counted immediately: the worker may be aborted mid-batch.
                    self.diagnostics.stats().delivered.fetch_add(1, Ordering::Relaxed);
                    delivered += 1;
                    next += 1;
                }
                Err(err) if !err.is_transient() => {
                    rejected += 1;
                    next += 1;
                    self.diagnostics.report(Diagnostic::EventRejected {
                        batch_id,
                        error: err.to_string(),
                    });
                }
                Err(err) => {
                    // Resume at `next`; everything before it is already stored.
                    let remaining = documents.len() - next;
                    retries = self.on_failure(batch_id, retries, remaining, err).await?;
                }
            }
        }

        Ok(FlushReport { delivered, rejected, retries })
    }

    /// Decide between backing off and giving up. Returns the new retry count
    /// after sleeping, or the error that ends the flush.
    async fn on_failure(
        &mut self,
        batch_id: u64,
        retries: u32,
        pending: usize,
        err: StoreError,
    ) -> Result<u32, FlushError> {
        if !err.is_transient() {
            self.drop_batch(batch_id, pending, &err);
            return Err(FlushError::Permanent { batch_id, source: err });
        }
        if retries >= self.retry.max_retries {
            self.drop_batch(batch_id, pending, &err);
            return Err(FlushError::RetriesExhausted { batch_id, attempts: retries + 1, source: err });
        }

        let retry = retries + 1;
        let delay = self.retry.backoff(retry);
        self.diagnostics.report(Diagnostic::RetryScheduled {
            batch_id,
            attempt: retry,
            delay,
            error: err.to_string(),
        });
        self.state = FlushState::Backoff;
        sleep(delay).await;
        Ok(retry)
    }

    fn drop_batch(&mut self, batch_id: u64, pending: usize, err: &StoreError) {
        self.state = FlushState::Idle;
        self.diagnostics.report(Diagnostic::BatchDropped {
            batch_id,
            events: pending,
            kind: err.kind(),
            error: err.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batcher::BatchTrigger;
    use crate::event::{LogEvent, Severity};
    use crate::memory_store::MemoryStore;
    use std::time::Duration;
    use tokio::time::Instant;

    fn batch(id: u64, messages: &[&str]) -> Batch {
        Batch {
            id,
            events: messages.iter().map(|m| LogEvent::new(Severity::Info, *m)).collect(),
            trigger: BatchTrigger::Limit,
            opened_at: Instant::now(),
        }
    }

    fn flusher(store: Arc<MemoryStore>, diagnostics: Diagnostics) -> Flusher {
        let retry = RetryPolicy {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
        };
        Flusher::new(store, "log", retry, None, diagnostics)
    }

    #[tokio::test(start_paused = true)]
    async fn bulk_flush_delivers_whole_batch() {
        let store = Arc::new(MemoryStore::new());
        let diagnostics = Diagnostics::new();
        let mut flusher = flusher(Arc::clone(&store), diagnostics.clone());

        let report = flusher.flush(batch(1, &["A", "B"])).await.unwrap();
        assert_eq!(report, FlushReport { delivered: 2, rejected: 0, retries: 0 });
        assert_eq!(store.messages("log"), vec!["A", "B"]);
        assert_eq!(store.batch_sizes(), vec![2]);
        assert_eq!(flusher.state(), FlushState::Idle);
        assert_eq!(diagnostics.stats().snapshot().delivered, 2);
        assert_eq!(diagnostics.stats().snapshot().batches_flushed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried_with_backoff() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next(StoreError::transient("connection refused"));
        store.fail_next(StoreError::transient("connection refused"));
        let diagnostics = Diagnostics::new();
        let mut flusher = flusher(Arc::clone(&store), diagnostics.clone());

        let start = Instant::now();
        let report = flusher.flush(batch(1, &["A"])).await.unwrap();

        assert_eq!(report.retries, 2);
        assert_eq!(store.calls(), 3);
        assert_eq!(store.messages("log"), vec!["A"]);
        // 100ms + 200ms of backoff
        assert_eq!(start.elapsed(), Duration::from_millis(300));
        assert_eq!(diagnostics.stats().snapshot().retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_drops_without_retry() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next(StoreError::permanent("unauthorized"));
        let (diagnostics, mut rx) = Diagnostics::channel();
        let mut flusher = flusher(Arc::clone(&store), diagnostics.clone());

        let err = flusher.flush(batch(9, &["A", "B"])).await.unwrap_err();
        assert!(matches!(err, FlushError::Permanent { batch_id: 9, .. }));
        assert_eq!(store.calls(), 1);
        assert!(store.documents("log").is_empty());

        match rx.try_recv() {
            Ok(Diagnostic::BatchDropped { batch_id, events, .. }) => {
                assert_eq!(batch_id, 9);
                assert_eq!(events, 2);
            }
            other => panic!("unexpected diagnostic: {:?}", other),
        }
        assert_eq!(diagnostics.stats().snapshot().retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_drop_batch() {
        let store = Arc::new(MemoryStore::new());
        for _ in 0..4 {
            store.fail_next(StoreError::transient("timeout"));
        }
        let diagnostics = Diagnostics::new();
        let mut flusher = flusher(Arc::clone(&store), diagnostics.clone());

        let err = flusher.flush(batch(3, &["A", "B", "C"])).await.unwrap_err();
        assert!(matches!(err, FlushError::RetriesExhausted { attempts: 4, .. }));
        assert_eq!(store.calls(), 4);

        let stats = diagnostics.stats().snapshot();
        assert_eq!(stats.retries, 3);
        assert_eq!(stats.dropped_failed, 3);
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.batches_flushed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn per_event_retry_resumes_without_duplicates() {
        let store = Arc::new(MemoryStore::new().per_event());
        let diagnostics = Diagnostics::new();
        let mut flusher = flusher(Arc::clone(&store), diagnostics.clone());

        store.fail_next(StoreError::transient("busy"));
        let report = flusher.flush(batch(1, &["A", "B", "C"])).await.unwrap();

        assert_eq!(report.delivered, 3);
        assert_eq!(report.retries, 1);
        assert_eq!(store.messages("log"), vec!["A", "B", "C"]);
        assert_eq!(store.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn per_event_permanent_failure_drops_only_that_event() {
        let store = Arc::new(MemoryStore::new().per_event());
        store.fail_next(StoreError::permanent("document too large"));
        let (diagnostics, mut rx) = Diagnostics::channel();
        let mut flusher = flusher(Arc::clone(&store), diagnostics.clone());

        let report = flusher.flush(batch(1, &["A", "B"])).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.retries, 0);
        assert_eq!(store.messages("log"), vec!["B"]);
        assert!(matches!(rx.try_recv(), Ok(Diagnostic::EventRejected { batch_id: 1, .. })));
    }

    struct PartialStore;

    #[async_trait::async_trait]
    impl DocumentStore for PartialStore {
        async fn insert_many(&self, _collection: &str, documents: &[Document]) -> Result<usize, StoreError> {
            Ok(documents.len() - 1)
        }
    }

    #[tokio::test]
    async fn partial_bulk_acceptance_is_reported() {
        let diagnostics = Diagnostics::new();
        let mut flusher = Flusher::new(Arc::new(PartialStore), "log", RetryPolicy::default(), None, diagnostics.clone());

        let report = flusher.flush(batch(2, &["A", "B", "C"])).await.unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(report.rejected, 1);

        let stats = diagnostics.stats().snapshot();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.dropped_failed, 1);
    }
}
