//! Batched, non-blocking delivery of log events to document stores.
//!
//! Events go through a bounded [`queue::EventQueue`], are grouped by a
//! [`batcher::Batcher`] and written by a [`flusher::Flusher`] running on a
//! background tokio task. [`sink::DocumentSink`] ties them together, and
//! [`layer::DocumentSinkLayer`] feeds it from `tracing`.

pub mod event;
pub mod error;
pub mod config;
pub mod env;
pub mod diagnostics;
pub mod document;
pub mod queue;
pub mod batcher;
pub mod flusher;
pub mod store;
pub mod sink;
pub mod layer;
pub mod init;
pub mod backend;

pub mod memory_store;
pub mod noop_store;
pub mod file_store;

#[cfg(any(feature = "opensearch", feature = "clickhouse"))]
mod http;

#[cfg(feature = "opensearch")]
pub mod opensearch;

#[cfg(feature = "clickhouse")]
pub mod clickhouse;

pub use config::{OverflowPolicy, RetryPolicy, SinkConfig};
pub use error::{ConfigError, EnqueueError, FlushError, SinkError, StoreError};
pub use event::{ExceptionInfo, LogEvent, Severity};
pub use sink::{CloseReport, DocumentSink};
pub use store::DocumentStore;
