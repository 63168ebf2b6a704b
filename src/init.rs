use crate::config::SinkConfig;
use crate::error::{InitError, SinkError};
use crate::layer::DocumentSinkLayer;
use crate::sink::{CloseReport, DocumentSink};
use crate::store::DocumentStore;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Options for installing the global subscriber.
///
/// **Fields**
/// - `sink`: [`SinkConfig`] controlling batching, overflow and shutdown.
/// - `enable_stdout`: if `true`, a `tracing_subscriber::fmt::Layer` is
///   installed next to [`DocumentSinkLayer`] so events are also printed
///   to the console.
#[derive(Clone, Debug)]
pub struct LayerConfig {
    pub sink: SinkConfig,
    pub enable_stdout: bool,
}

impl LayerConfig {
    pub fn new(sink: SinkConfig) -> Self {
        LayerConfig { sink, enable_stdout: true }
    }
}

/// Keeps the sink reachable after the subscriber is installed.
///
/// Call [`close`](Self::close) before the runtime shuts down to flush
/// buffered events.
#[must_use = "dropping the guard without close() may lose buffered events"]
pub struct SinkGuard {
    sink: Arc<DocumentSink>,
}

impl SinkGuard {
    pub fn sink(&self) -> &Arc<DocumentSink> {
        &self.sink
    }

    pub async fn close(self) -> CloseReport {
        self.sink.close().await
    }
}

/// Initialize the global `tracing` subscriber with a sink writing to `store`.
///
/// **Effects**
///
/// Installs a [`Registry`] combined with [`DocumentSinkLayer`] (and a
/// `fmt` layer when `enable_stdout` is set) as the global default
/// subscriber, so all `tracing` events in the process are observed.
pub fn init_tracing_with_config(
    store: Arc<dyn DocumentStore>,
    config: LayerConfig,
) -> Result<SinkGuard, InitError> {
    let sink = Arc::new(DocumentSink::start(config.sink, store)?);
    install(Arc::clone(&sink), config.enable_stdout)?;
    Ok(SinkGuard { sink })
}

/// Initialize tracing with the store named by `config.destination`.
pub fn init_tracing_from_config(config: LayerConfig) -> Result<SinkGuard, InitError> {
    let sink = Arc::new(DocumentSink::from_config(config.sink)?);
    install(Arc::clone(&sink), config.enable_stdout)?;
    Ok(SinkGuard { sink })
}

/// Initialize tracing from `LOG_SINK_*` environment variables, with
/// console output enabled.
pub fn init_tracing_from_env() -> Result<SinkGuard, InitError> {
    let sink = SinkConfig::from_env().map_err(SinkError::from)?;
    init_tracing_from_config(LayerConfig::new(sink))
}

/// Initialize tracing with default batching settings.
///
/// Equivalent to [`init_tracing_with_config`] with a default
/// [`SinkConfig`] whose destination is only used for identification.
pub fn init_tracing(store: Arc<dyn DocumentStore>) -> Result<SinkGuard, InitError> {
    init_tracing_with_config(store, LayerConfig::new(SinkConfig::new("custom://")))
}

fn install(sink: Arc<DocumentSink>, enable_stdout: bool) -> Result<(), InitError> {
    let layer = DocumentSinkLayer::new(sink);

    // The two subscriber shapes have different types, so each branch
    // installs its own.
    if enable_stdout {
        let fmt_layer = tracing_subscriber::fmt::layer();
        let subscriber = Registry::default().with(layer).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}
