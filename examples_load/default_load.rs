use std::sync::Arc;
use std::time::Instant;
use tracing::error;

use tracing_docstore_sink::init::init_tracing;
use tracing_docstore_sink::noop_store::NoopStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(NoopStore);
    let guard = init_tracing(store)?;

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "default load test error");
    }

    let elapsed = start.elapsed();
    println!("default config: emitted {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    let report = guard.close().await;
    println!("delivered {}, undelivered {}", report.stats.delivered, report.stats.undelivered());
    Ok(())
}
