use std::time::Duration;

use tracing_docstore_sink::diagnostics::{Diagnostic, Diagnostics};
use tracing_docstore_sink::file_store::FileStore;
use tracing_docstore_sink::{DocumentSink, LogEvent, Severity, SinkConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = std::env::temp_dir().join("docstore-sink-example");
    let config = SinkConfig::new(format!("file://{}", dir.display()))
        .with_batch_posting_limit(10)
        .with_period(Duration::from_millis(500));

    // Print anything the sink could not deliver.
    let (diagnostics, mut reports) = Diagnostics::channel();
    tokio::spawn(async move {
        while let Some(report) = reports.recv().await {
            if !matches!(report, Diagnostic::RetryScheduled { .. }) {
                eprintln!("sink diagnostic: {:?}", report);
            }
        }
    });

    let store = std::sync::Arc::new(FileStore::new(&dir));
    let sink = DocumentSink::start_with_diagnostics(config, store, diagnostics)?;

    sink.emit(LogEvent::new(Severity::Info, "service started").with_target("example"));
    for i in 0..25 {
        sink.emit(LogEvent::new(Severity::Warn, "slow request").with_property("request", i));
    }

    let report = sink.close().await;
    println!(
        "wrote {} events to {} (drained: {}, lost: {})",
        report.stats.delivered,
        dir.join("log.jsonl").display(),
        report.drained,
        report.lost
    );
    Ok(())
}
