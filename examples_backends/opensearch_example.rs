use tracing::{error, info};
use tracing_docstore_sink::init::{init_tracing_from_config, LayerConfig};
use tracing_docstore_sink::{Severity, SinkConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Point this at your OpenSearch node; documents land in the `app-logs` index.
    let destination = std::env::var("OPENSEARCH_URL")
        .unwrap_or_else(|_| "opensearch://127.0.0.1:9200".to_string());

    let config = SinkConfig::new(destination)
        .with_collection("app-logs")
        .with_minimum_level(Severity::Info);
    let guard = init_tracing_from_config(LayerConfig::new(config))?;

    info!("opensearch example started");
    error!(user_id = 42, "failed to load profile");

    let report = guard.close().await;
    println!("delivered {} events", report.stats.delivered);
    Ok(())
}
