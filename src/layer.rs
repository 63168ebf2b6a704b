use crate::diagnostics::INTERNAL_TARGET;
use crate::event::{ExceptionInfo, LogEvent, Severity};
use crate::sink::{in_sink_worker, DocumentSink};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Targets of the HTTP stack used by the network stores. Connection tasks
/// are spawned outside the sink worker, so they are filtered by name.
const TRANSPORT_TARGETS: &[&str] = &["hyper", "h2", "reqwest", "rustls", "want", "mio"];

fn is_transport_target(target: &str) -> bool {
    TRANSPORT_TARGETS.iter().any(|prefix| {
        target
            .strip_prefix(prefix)
            .map_or(false, |rest| rest.is_empty() || rest.starts_with("::"))
    })
}

/// `tracing_subscriber` layer that turns events into [`LogEvent`]s and
/// hands them to a [`DocumentSink`].
///
/// The layer only enqueues; network and disk I/O happen on the sink's
/// background task. Events below the sink's minimum level are skipped
/// before any fields are recorded. The sink's own diagnostics, anything
/// logged while its worker is flushing, and HTTP transport chatter are
/// never fed back into it.
pub struct DocumentSinkLayer {
    sink: Arc<DocumentSink>,
}

impl DocumentSinkLayer {
    pub fn new(sink: Arc<DocumentSink>) -> Self {
        DocumentSinkLayer { sink }
    }

    pub fn sink(&self) -> &Arc<DocumentSink> {
        &self.sink
    }
}

impl<S> Layer<S> for DocumentSinkLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if meta.target().starts_with(INTERNAL_TARGET)
            || is_transport_target(meta.target())
            || in_sink_worker()
        {
            return;
        }
        let level = Severity::from(*meta.level());
        if !self.sink.config().accepts(level) {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        self.sink.emit(LogEvent {
            timestamp: Utc::now(),
            level,
            message: visitor.message.unwrap_or_default(),
            target: meta.target().to_string(),
            module_path: meta.module_path().map(|s| s.to_string()),
            file: meta.file().map(|s| s.to_string()),
            line: meta.line(),
            properties: visitor.fields,
            exception: visitor.exception,
        });
    }
}

/// Collects an event's fields into properties, message and exception.
#[derive(Default)]
pub struct FieldVisitor {
    pub fields: BTreeMap<String, serde_json::Value>,
    pub message: Option<String>,
    pub exception: Option<ExceptionInfo>,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        let info = ExceptionInfo::from_error(value);
        self.fields.insert(field.name().to_string(), serde_json::Value::String(info.message.clone()));
        if self.exception.is_none() {
            self.exception = Some(info);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        } else {
            self.fields.insert(field.name().to_string(), serde_json::Value::String(format!("{:?}", value)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SinkConfig;
    use crate::document::Document;
    use crate::error::StoreError;
    use crate::memory_store::MemoryStore;
    use crate::store::DocumentStore;
    use std::time::Duration;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    #[derive(Debug, thiserror::Error)]
    #[error("connection reset")]
    struct ResetError;

    #[tokio::test(start_paused = true)]
    async fn layer_forwards_events_with_fields() {
        let store = Arc::new(MemoryStore::new());
        let config = SinkConfig::new("memory://")
            .with_minimum_level(Severity::Info)
            .with_period(Duration::from_secs(1));
        let sink = Arc::new(DocumentSink::start(config, store.clone()).unwrap());
        let subscriber = Registry::default().with(DocumentSinkLayer::new(Arc::clone(&sink)));

        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!("filtered out");
            tracing::info!(order_id = 7, ratio = 0.5, "order placed");
            let err = ResetError;
            tracing::error!(error = &err as &(dyn std::error::Error + 'static), "payment failed");
            tracing::warn!(target: "tracing_docstore_sink::diagnostics", "internal");
        });
        sink.close().await;

        let docs = store.documents("log");
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["message"], "order placed");
        assert_eq!(docs[0]["level"], "INFO");
        assert_eq!(docs[0]["properties"]["order_id"], 7);
        assert_eq!(docs[0]["properties"]["ratio"], 0.5);
        assert_eq!(docs[1]["level"], "ERROR");
        assert_eq!(docs[1]["exception"]["message"], "connection reset");
    }

    /// Store that logs from inside `insert_many`, like an HTTP client does.
    struct ChattyStore {
        inner: MemoryStore,
    }

    #[async_trait::async_trait]
    impl DocumentStore for ChattyStore {
        async fn insert_many(&self, collection: &str, documents: &[Document]) -> Result<usize, StoreError> {
            tracing::trace!(target: "my_store::wire", bytes = 123, "flushed batch");
            self.inner.insert_many(collection, documents).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn events_logged_while_flushing_are_not_captured() {
        let store = Arc::new(ChattyStore { inner: MemoryStore::new() });
        let sink = Arc::new(
            DocumentSink::start(
                SinkConfig::new("memory://").with_period(Duration::from_millis(100)),
                store.clone(),
            )
            .unwrap(),
        );
        let subscriber = Registry::default().with(DocumentSinkLayer::new(Arc::clone(&sink)));
        let _guard = tracing::subscriber::set_default(subscriber);

        tracing::error!("one application event");
        tracing::debug!(target: "hyper::proto::h1::conn", "flushed 123 bytes");
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(store.inner.batch_sizes(), vec![1]);
        assert_eq!(store.inner.messages("log"), vec!["one application event"]);
        sink.close().await;
    }

    #[test]
    fn transport_targets_match_whole_crate_names() {
        assert!(is_transport_target("hyper"));
        assert!(is_transport_target("hyper::client::pool"));
        assert!(is_transport_target("h2::codec"));
        assert!(!is_transport_target("hyperion::api"));
        assert!(!is_transport_target("my_app"));
    }
}
