use crate::backend::make_store_from_destination;
use crate::batcher::Batcher;
use crate::config::SinkConfig;
use crate::diagnostics::{Diagnostic, Diagnostics, DropReason, StatsSnapshot, INTERNAL_TARGET};
use crate::error::{EnqueueError, SinkError};
use crate::event::LogEvent;
use crate::flusher::Flusher;
use crate::queue::EventQueue;
use crate::store::DocumentStore;
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Result of [`DocumentSink::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseReport {
    /// `true` when the worker drained everything within the grace period.
    pub drained: bool,
    /// Events discarded because the grace period expired.
    pub lost: u64,
    pub stats: StatsSnapshot,
}

/// Entry point of the pipeline.
///
/// [`emit`](Self::emit) only touches the in-memory queue; a background
/// tokio task batches queued events and writes them to the store.
pub struct DocumentSink {
    config: Arc<SinkConfig>,
    queue: Arc<EventQueue>,
    diagnostics: Diagnostics,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DocumentSink {
    /// Build the store named by `config.destination` and start the sink.
    pub fn from_config(config: SinkConfig) -> Result<Self, SinkError> {
        config.validate()?;
        let store = make_store_from_destination(&config.destination)?;
        Self::start(config, store)
    }

    /// Start a sink writing to `store`.
    ///
    /// Must be called from within a tokio runtime; the worker task is
    /// spawned on the current runtime.
    pub fn start(config: SinkConfig, store: Arc<dyn DocumentStore>) -> Result<Self, SinkError> {
        Self::start_with_diagnostics(config, store, Diagnostics::new())
    }

    /// Like [`start`](Self::start), reporting through the given diagnostics
    /// handle (see [`Diagnostics::channel`]).
    pub fn start_with_diagnostics(
        config: SinkConfig,
        store: Arc<dyn DocumentStore>,
        diagnostics: Diagnostics,
    ) -> Result<Self, SinkError> {
        config.validate()?;
        let handle = Handle::try_current().map_err(|_| SinkError::NoRuntime)?;

        let config = Arc::new(config);
        let queue = Arc::new(EventQueue::new(
            config.queue_capacity,
            config.overflow,
            diagnostics.clone(),
        ));
        let batcher = Batcher::new(Arc::clone(&queue), config.batch_posting_limit, config.period);
        let flusher = Flusher::new(
            store,
            config.collection_name.clone(),
            config.retry,
            config.format_provider.clone(),
            diagnostics.clone(),
        );

        let worker = handle.spawn(run_worker(batcher, flusher));
        tracing::debug!(
            target: INTERNAL_TARGET,
            collection = %config.collection_name,
            batch_posting_limit = config.batch_posting_limit,
            period = ?config.period,
            "document sink started"
        );

        Ok(DocumentSink {
            config,
            queue,
            diagnostics,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    /// Queue an event for delivery without performing any I/O.
    ///
    /// Events below the configured minimum level are ignored. Events the
    /// queue cannot accept are reported on the diagnostic channel.
    pub fn emit(&self, event: LogEvent) {
        match self.enqueue(event) {
            Ok(()) => {}
            Err(EnqueueError::Full(event)) => {
                self.diagnostics.report(Diagnostic::EventDropped {
                    event,
                    reason: DropReason::Rejected,
                });
            }
            Err(EnqueueError::Closed) => {
                tracing::debug!(target: INTERNAL_TARGET, "sink closed, ignoring event");
            }
        }
    }

    /// Queue an event, handing it back if the queue rejects it.
    pub fn try_emit(&self, event: LogEvent) -> Result<(), EnqueueError> {
        let result = self.enqueue(event);
        if let Err(EnqueueError::Full(_)) = &result {
            self.diagnostics.stats().overflow_rejected.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    fn enqueue(&self, event: LogEvent) -> Result<(), EnqueueError> {
        if !self.config.accepts(event.level) {
            return Ok(());
        }
        self.diagnostics.stats().received.fetch_add(1, Ordering::Relaxed);
        self.queue.enqueue(event)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.diagnostics.stats().snapshot()
    }

    /// Number of events waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Stop accepting events and flush everything already queued.
    ///
    /// Waits at most `shutdown_grace`; after that the worker is aborted and
    /// whatever was not delivered is reported as lost. Calling `close` more
    /// than once is harmless.
    pub async fn close(&self) -> CloseReport {
        self.queue.close();
        let worker = self.worker.lock().take();

        let drained = match worker {
            None => true,
            Some(mut worker) => {
                match tokio::time::timeout(self.config.shutdown_grace, &mut worker).await {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        tracing::error!(target: INTERNAL_TARGET, error = %e, "sink worker failed");
                        false
                    }
                    Err(_) => {
                        worker.abort();
                        false
                    }
                }
            }
        };

        let mut lost = 0;
        if !drained {
            self.queue.clear();
            lost = self.stats().in_flight();
            if lost > 0 {
                self.diagnostics.report(Diagnostic::EventsLost { count: lost });
            }
        }

        let stats = self.stats();
        tracing::debug!(target: INTERNAL_TARGET, drained, lost, delivered = stats.delivered, "document sink closed");
        CloseReport { drained, lost, stats }
    }
}

impl Drop for DocumentSink {
    fn drop(&mut self) {
        // Without an explicit close the worker drains in the background.
        self.queue.close();
    }
}

tokio::task_local! {
    static SINK_WORKER: ();
}

/// Whether the caller runs inside a sink worker's flush. Events emitted
/// by stores (or their HTTP clients) from there must not be captured.
pub(crate) fn in_sink_worker() -> bool {
    SINK_WORKER.try_with(|_| ()).is_ok()
}

async fn run_worker(mut batcher: Batcher, mut flusher: Flusher) {
    while let Some(batch) = batcher.next_batch().await {
        if let Err(e) = SINK_WORKER.scope((), flusher.flush(batch)).await {
            // Already reported on the diagnostic channel.
            tracing::trace!(target: INTERNAL_TARGET, error = %e, "flush failed");
        }
    }
}
