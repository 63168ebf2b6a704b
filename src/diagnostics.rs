//! Side channel for events the pipeline could not deliver.
//!
//! Nothing reported here is ever returned to the code that emitted the
//! event. Reports are counted in [`SinkStats`], logged under the crate's
//! internal target (which [`DocumentSinkLayer`](crate::layer::DocumentSinkLayer)
//! ignores), and optionally forwarded to an unbounded channel.

use crate::error::FailureKind;
use crate::event::LogEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Target used for the crate's own log output.
pub const INTERNAL_TARGET: &str = "tracing_docstore_sink";

/// Why an event was evicted or rejected by the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Evicted to make room for a newer event.
    Evicted,
    /// Rejected because the queue was full.
    Rejected,
}

#[derive(Debug)]
pub enum Diagnostic {
    /// The queue overflowed and this event will never be delivered.
    EventDropped { event: LogEvent, reason: DropReason },
    /// The store permanently refused a single event.
    EventRejected { batch_id: u64, error: String },
    /// A batch failed transiently and will be retried after `delay`.
    RetryScheduled { batch_id: u64, attempt: u32, delay: Duration, error: String },
    /// `events` events of a batch were dropped after a failed flush.
    BatchDropped { batch_id: u64, events: usize, kind: FailureKind, error: String },
    /// The shutdown grace period expired with `count` events undelivered.
    EventsLost { count: u64 },
}

/// Delivery counters shared by the queue, the flusher and the facade.
#[derive(Debug, Default)]
pub struct SinkStats {
    pub received: AtomicU64,
    pub enqueued: AtomicU64,
    pub overflow_evicted: AtomicU64,
    pub overflow_rejected: AtomicU64,
    pub delivered: AtomicU64,
    pub store_rejected: AtomicU64,
    pub dropped_failed: AtomicU64,
    pub lost_on_shutdown: AtomicU64,
    /// Batches whose flush completed; dropped batches are not counted.
    pub batches_flushed: AtomicU64,
    pub retries: AtomicU64,
}

/// Point-in-time copy of [`SinkStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub enqueued: u64,
    pub overflow_evicted: u64,
    pub overflow_rejected: u64,
    pub delivered: u64,
    pub store_rejected: u64,
    pub dropped_failed: u64,
    pub lost_on_shutdown: u64,
    pub batches_flushed: u64,
    pub retries: u64,
}

impl SinkStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            overflow_evicted: self.overflow_evicted.load(Ordering::Relaxed),
            overflow_rejected: self.overflow_rejected.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            store_rejected: self.store_rejected.load(Ordering::Relaxed),
            dropped_failed: self.dropped_failed.load(Ordering::Relaxed),
            lost_on_shutdown: self.lost_on_shutdown.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    /// Events accepted into the queue that have not reached a final state.
    pub fn in_flight(&self) -> u64 {
        self.enqueued.saturating_sub(
            self.delivered
                + self.store_rejected
                + self.dropped_failed
                + self.lost_on_shutdown
                + self.overflow_evicted,
        )
    }

    /// Events that will never reach the store.
    pub fn undelivered(&self) -> u64 {
        self.overflow_evicted
            + self.overflow_rejected
            + self.store_rejected
            + self.dropped_failed
            + self.lost_on_shutdown
    }
}

/// Handle used by pipeline components to report problems.
#[derive(Clone, Debug, Default)]
pub struct Diagnostics {
    stats: Arc<SinkStats>,
    tx: Option<mpsc::UnboundedSender<Diagnostic>>,
}

impl Diagnostics {
    /// Diagnostics that only count and log.
    pub fn new() -> Self {
        Diagnostics::default()
    }

    /// Diagnostics that additionally forward every report to the returned receiver.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Diagnostic>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Diagnostics { stats: Arc::default(), tx: Some(tx) }, rx)
    }

    pub fn stats(&self) -> &Arc<SinkStats> {
        &self.stats
    }

    pub fn report(&self, diagnostic: Diagnostic) {
        match &diagnostic {
            Diagnostic::EventDropped { event, reason } => {
                let counter = match reason {
                    DropReason::Evicted => &self.stats.overflow_evicted,
                    DropReason::Rejected => &self.stats.overflow_rejected,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(target: INTERNAL_TARGET, ?reason, level = %event.level, "log queue full, dropping event");
            }
            Diagnostic::EventRejected { batch_id, error } => {
                self.stats.store_rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(target: INTERNAL_TARGET, batch_id, %error, "store rejected event");
            }
            Diagnostic::RetryScheduled { batch_id, attempt, delay, error } => {
                self.stats.retries.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(target: INTERNAL_TARGET, batch_id, attempt, ?delay, %error, "flush failed, retrying");
            }
            Diagnostic::BatchDropped { batch_id, events, kind, error } => {
                self.stats.dropped_failed.fetch_add(*events as u64, Ordering::Relaxed);
                tracing::error!(target: INTERNAL_TARGET, batch_id, events, ?kind, %error, "dropping log batch");
            }
            Diagnostic::EventsLost { count } => {
                self.stats.lost_on_shutdown.fetch_add(*count, Ordering::Relaxed);
                tracing::error!(target: INTERNAL_TARGET, count, "shutdown grace period expired, events lost");
            }
        }

        if let Some(tx) = &self.tx {
            // A dropped receiver just means nobody is listening any more.
            let _ = tx.send(diagnostic);
        }
    }
}
