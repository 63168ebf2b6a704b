use crate::config::OverflowPolicy;
use crate::diagnostics::{Diagnostic, Diagnostics, DropReason};
use crate::error::EnqueueError;
use crate::event::LogEvent;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

struct Queued {
    event: LogEvent,
    enqueued_at: Instant,
}

struct State {
    events: VecDeque<Queued>,
    closed: bool,
}

/// Bounded multi-producer, single-consumer buffer between the logging
/// call path and the background worker.
///
/// Producers are synchronous and may run on any thread; the consumer is
/// the worker task. The mutex is never held across an `.await`.
pub struct EventQueue {
    state: Mutex<State>,
    capacity: usize,
    overflow: OverflowPolicy,
    /// Wakes the consumer when events arrive or the queue closes.
    readable: Notify,
    /// Wakes producers blocked under [`OverflowPolicy::Block`].
    writable: Condvar,
    diagnostics: Diagnostics,
}

impl EventQueue {
    pub fn new(capacity: usize, overflow: OverflowPolicy, diagnostics: Diagnostics) -> Self {
        EventQueue {
            state: Mutex::new(State {
                events: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
            capacity: capacity.max(1),
            overflow,
            readable: Notify::new(),
            writable: Condvar::new(),
            diagnostics,
        }
    }

    /// Add an event, applying the overflow policy when the queue is full.
    ///
    /// Evicted events are reported on the diagnostic channel. A rejected
    /// event is handed back in `Err(EnqueueError::Full)` for the caller to
    /// report; only the drop-newest policy rejects.
    pub fn enqueue(&self, event: LogEvent) -> Result<(), EnqueueError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(EnqueueError::Closed);
        }

        if state.events.len() >= self.capacity {
            match self.overflow {
                OverflowPolicy::DropNewest => return Err(EnqueueError::Full(event)),
                OverflowPolicy::DropOldest => {
                    let evicted = state.events.pop_front();
                    self.push(&mut state, event);
                    drop(state);
                    self.report_evicted(evicted);
                    return Ok(());
                }
                OverflowPolicy::Block { timeout } => {
                    let deadline = std::time::Instant::now() + timeout;
                    while state.events.len() >= self.capacity && !state.closed {
                        if self.writable.wait_until(&mut state, deadline).timed_out() {
                            break;
                        }
                    }
                    if state.closed {
                        return Err(EnqueueError::Closed);
                    }
                    if state.events.len() >= self.capacity {
                        let evicted = state.events.pop_front();
                        self.push(&mut state, event);
                        drop(state);
                        self.report_evicted(evicted);
                        return Ok(());
                    }
                }
            }
        }

        self.push(&mut state, event);
        Ok(())
    }

    fn push(&self, state: &mut State, event: LogEvent) {
        state.events.push_back(Queued { event, enqueued_at: Instant::now() });
        self.diagnostics.stats().enqueued.fetch_add(1, Ordering::Relaxed);
        self.readable.notify_one();
    }

    fn report_evicted(&self, evicted: Option<Queued>) {
        if let Some(queued) = evicted {
            self.diagnostics.report(Diagnostic::EventDropped {
                event: queued.event,
                reason: DropReason::Evicted,
            });
        }
    }

    /// Wait until the queue holds at least one event.
    ///
    /// Returns `false` once the queue is closed and empty.
    pub async fn wait_for_events(&self) -> bool {
        loop {
            {
                let state = self.state.lock();
                if !state.events.is_empty() {
                    return true;
                }
                if state.closed {
                    return false;
                }
            }
            self.readable.notified().await;
        }
    }

    /// Take up to `max_count` events, waiting at most `max_wait` for the
    /// count to be reached. Returns early when the queue is closing.
    pub async fn dequeue_batch(&self, max_count: usize, max_wait: Duration) -> Vec<LogEvent> {
        self.dequeue_batch_until(max_count, Instant::now() + max_wait).await
    }

    /// Like [`dequeue_batch`](Self::dequeue_batch) with an absolute deadline.
    pub async fn dequeue_batch_until(&self, max_count: usize, deadline: Instant) -> Vec<LogEvent> {
        let max_count = max_count.max(1);
        loop {
            {
                let mut state = self.state.lock();
                if state.events.len() >= max_count || state.closed || Instant::now() >= deadline {
                    return self.take(&mut state, max_count);
                }
            }
            // Timing out just means the deadline passed; the next loop
            // iteration takes whatever is available.
            let _ = timeout_at(deadline, self.readable.notified()).await;
        }
    }

    fn take(&self, state: &mut State, max_count: usize) -> Vec<LogEvent> {
        let n = max_count.min(state.events.len());
        let batch: Vec<LogEvent> = state.events.drain(..n).map(|q| q.event).collect();
        if n > 0 {
            self.writable.notify_all();
        }
        batch
    }

    /// Enqueue time of the event at the head of the queue.
    pub fn oldest_enqueued_at(&self) -> Option<Instant> {
        self.state.lock().events.front().map(|q| q.enqueued_at)
    }

    /// Stop accepting events and wake the consumer and any blocked producers.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);
        self.readable.notify_one();
        self.writable.notify_all();
    }

    /// Remove every queued event, returning how many were discarded.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let n = state.events.len();
        state.events.clear();
        self.writable.notify_all();
        n
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
