use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing_docstore_sink::diagnostics::{Diagnostic, Diagnostics, DropReason};
use tracing_docstore_sink::memory_store::MemoryStore;
use tracing_docstore_sink::{
    DocumentSink, LogEvent, OverflowPolicy, RetryPolicy, Severity, SinkConfig, StoreError,
};

fn event(msg: &str) -> LogEvent {
    LogEvent::new(Severity::Info, msg)
}

#[tokio::test(start_paused = true)]
async fn limit_then_period_batches() {
    let store = Arc::new(MemoryStore::new());
    let config = SinkConfig::new("memory://")
        .with_queue_capacity(3)
        .with_batch_posting_limit(2)
        .with_period(Duration::from_secs(5));
    let sink = DocumentSink::start(config, store.clone()).unwrap();

    for m in ["A", "B", "C"] {
        sink.emit(event(m));
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.messages("log"), vec!["A", "B"]);

    tokio::time::sleep(Duration::from_millis(4_900)).await;
    assert_eq!(store.batch_sizes(), vec![2]);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(store.batch_sizes(), vec![2, 1]);
    assert_eq!(store.messages("log"), vec!["A", "B", "C"]);

    sink.close().await;
}

#[tokio::test]
async fn drop_oldest_overflow_never_delivers_evicted_event() {
    let store = Arc::new(MemoryStore::new());
    let (diagnostics, mut rx) = Diagnostics::channel();
    let config = SinkConfig::new("memory://")
        .with_queue_capacity(2)
        .with_overflow(OverflowPolicy::DropOldest);
    let sink = DocumentSink::start_with_diagnostics(config, store.clone(), diagnostics).unwrap();

    // The worker shares this current-thread runtime and cannot run until
    // the test yields, so all three land in the queue back to back.
    for m in ["A", "B", "C"] {
        sink.emit(event(m));
    }
    assert_eq!(sink.queued(), 2);

    match rx.try_recv() {
        Ok(Diagnostic::EventDropped { event, reason }) => {
            assert_eq!(event.message, "A");
            assert_eq!(reason, DropReason::Evicted);
        }
        other => panic!("unexpected diagnostic: {:?}", other),
    }

    let report = sink.close().await;
    assert!(report.drained);
    assert_eq!(store.messages("log"), vec!["B", "C"]);
    assert_eq!(report.stats.overflow_evicted, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_producers_deliver_exactly_once_in_order() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 500;

    let store = Arc::new(MemoryStore::new());
    let config = SinkConfig::new("memory://")
        .with_queue_capacity(PRODUCERS * PER_PRODUCER)
        .with_batch_posting_limit(64)
        .with_period(Duration::from_millis(20));
    let sink = Arc::new(DocumentSink::start(config, store.clone()).unwrap());

    let handles: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let sink = Arc::clone(&sink);
            std::thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    sink.emit(
                        LogEvent::new(Severity::Info, "tick")
                            .with_property("producer", p)
                            .with_property("seq", seq),
                    );
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let report = sink.close().await;
    assert!(report.drained);
    assert_eq!(report.stats.delivered as usize, PRODUCERS * PER_PRODUCER);
    assert!(store.batch_sizes().iter().all(|&n| n <= 64));

    let mut last_seen: HashMap<u64, i64> = HashMap::new();
    for doc in store.documents("log") {
        let producer = doc["properties"]["producer"].as_u64().unwrap();
        let seq = doc["properties"]["seq"].as_i64().unwrap();
        let last = last_seen.entry(producer).or_insert(-1);
        assert_eq!(seq, *last + 1, "producer {} out of order", producer);
        *last = seq;
    }
    assert_eq!(last_seen.len(), PRODUCERS);
    assert!(last_seen.values().all(|&last| last == PER_PRODUCER as i64 - 1));
}

#[tokio::test(start_paused = true)]
async fn transient_failures_retry_and_permanent_failures_do_not() {
    let store = Arc::new(MemoryStore::new());
    let config = SinkConfig::new("memory://")
        .with_batch_posting_limit(1)
        .with_retry(RetryPolicy {
            max_retries: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
        });
    let sink = DocumentSink::start(config, store.clone()).unwrap();

    store.fail_next(StoreError::transient("connection refused"));
    sink.emit(event("retried"));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(sink.stats().retries, 1);
    assert_eq!(store.messages("log"), vec!["retried"]);

    store.fail_next(StoreError::permanent("malformed document"));
    sink.emit(event("dropped"));
    tokio::time::sleep(Duration::from_secs(1)).await;

    let report = sink.close().await;
    assert_eq!(report.stats.retries, 1);
    assert_eq!(report.stats.dropped_failed, 1);
    assert_eq!(store.messages("log"), vec!["retried"]);
    assert_eq!(store.calls(), 3);
}

#[tokio::test]
async fn file_destination_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let config = SinkConfig::new(format!("file://{}", dir.path().display())).with_collection("audit");
    let sink = DocumentSink::from_config(config).unwrap();

    sink.emit(event("first").with_property("user", "ada"));
    sink.emit(LogEvent::new(Severity::Error, "second"));
    let report = sink.close().await;
    assert!(report.drained);

    let content = std::fs::read_to_string(dir.path().join("audit.jsonl")).unwrap();
    let docs: Vec<serde_json::Value> = content.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0]["properties"]["user"], "ada");
    assert_eq!(docs[1]["level"], "ERROR");
}

#[tokio::test]
async fn unknown_destination_fails_at_construction() {
    let err = DocumentSink::from_config(SinkConfig::new("litedb://app.db")).err().unwrap();
    assert!(err.to_string().contains("litedb"));
}
