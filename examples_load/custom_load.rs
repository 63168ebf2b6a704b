use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::error;

use tracing_docstore_sink::init::{init_tracing_with_config, LayerConfig};
use tracing_docstore_sink::noop_store::NoopStore;
use tracing_docstore_sink::{OverflowPolicy, SinkConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(NoopStore);

    let layer_config = LayerConfig {
        sink: SinkConfig::new("noop://")
            .with_queue_capacity(50_000)
            .with_batch_posting_limit(1_000)
            .with_period(Duration::from_millis(200))
            .with_overflow(OverflowPolicy::DropOldest),
        enable_stdout: false,
    };

    let guard = init_tracing_with_config(store, layer_config)?;

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "custom load test error");
    }

    let elapsed = start.elapsed();
    println!("custom config: emitted {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    let report = guard.close().await;
    println!("{:?}", report.stats);
    Ok(())
}
