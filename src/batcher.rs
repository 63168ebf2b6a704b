use crate::event::LogEvent;
use crate::queue::EventQueue;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// What closed a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchTrigger {
    /// `batch_posting_limit` events were available.
    Limit,
    /// The period elapsed since the first event of the window.
    Period,
    /// The queue is closing; partial batches go out immediately.
    Shutdown,
}

/// An ordered group of events flushed as one unit.
#[derive(Debug)]
pub struct Batch {
    pub id: u64,
    pub events: Vec<LogEvent>,
    pub trigger: BatchTrigger,
    pub opened_at: Instant,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Groups queued events into batches bounded by count and time.
///
/// A window opens with the first event after an empty window and closes
/// `period` after that event was enqueued, or earlier once `limit` events
/// are available.
pub struct Batcher {
    queue: Arc<EventQueue>,
    limit: usize,
    period: Duration,
    next_id: u64,
}

impl Batcher {
    pub fn new(queue: Arc<EventQueue>, limit: usize, period: Duration) -> Self {
        Batcher { queue, limit: limit.max(1), period, next_id: 1 }
    }

    /// Wait for the next batch. Returns `None` once the queue is closed
    /// and fully drained.
    pub async fn next_batch(&mut self) -> Option<Batch> {
        loop {
            if !self.queue.wait_for_events().await {
                return None;
            }

            let opened_at = self.queue.oldest_enqueued_at().unwrap_or_else(Instant::now);
            let events = self
                .queue
                .dequeue_batch_until(self.limit, opened_at + self.period)
                .await;
            if events.is_empty() {
                continue;
            }

            let trigger = if events.len() >= self.limit {
                BatchTrigger::Limit
            } else if self.queue.is_closed() {
                BatchTrigger::Shutdown
            } else {
                BatchTrigger::Period
            };

            let id = self.next_id;
            self.next_id += 1;
            return Some(Batch { id, events, trigger, opened_at });
        }
    }
}
