use crate::event::LogEvent;
use std::error::Error;
use std::fmt;

/// Invalid sink configuration, reported when the sink is built.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("destination must not be empty")]
    MissingDestination,

    #[error("collection name must not be empty")]
    MissingCollection,

    #[error("batch posting limit must be at least 1")]
    ZeroBatchLimit,

    #[error("queue capacity must be at least 1")]
    ZeroQueueCapacity,

    #[error("flush period must be greater than zero")]
    ZeroPeriod,

    #[error("unknown or unsupported destination scheme: {0}")]
    UnknownScheme(String),

    #[error("destination {destination:?} is invalid: {reason}")]
    InvalidDestination { destination: String, reason: String },

    #[error("{0} feature is not enabled")]
    FeatureDisabled(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },
}

/// Why an event could not be queued.
#[derive(thiserror::Error)]
pub enum EnqueueError {
    /// The queue was full and the overflow policy rejected this event.
    #[error("queue is full")]
    Full(LogEvent),

    /// The sink is closing and no longer accepts events.
    #[error("queue is closed")]
    Closed,
}

impl fmt::Debug for EnqueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnqueueError::Full(_) => f.write_str("Full(..)"),
            EnqueueError::Closed => f.write_str("Closed"),
        }
    }
}

/// Whether a store failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connectivity, timeouts, overloaded backend.
    Transient,
    /// Malformed document, auth failure, missing collection.
    Permanent,
}

/// Error returned by a [`DocumentStore`](crate::store::DocumentStore).
#[derive(Debug)]
pub struct StoreError {
    kind: FailureKind,
    message: String,
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl StoreError {
    pub fn transient(message: impl Into<String>) -> Self {
        StoreError { kind: FailureKind::Transient, message: message.into(), source: None }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        StoreError { kind: FailureKind::Permanent, message: message.into(), source: None }
    }

    pub fn with_source(mut self, source: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            FailureKind::Transient => "transient",
            FailureKind::Permanent => "permanent",
        };
        write!(f, "{} store error: {}", kind, self.message)
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn Error + 'static))
    }
}

/// Outcome of a flush that did not deliver the whole batch.
#[derive(thiserror::Error, Debug)]
pub enum FlushError {
    #[error("batch {batch_id} dropped after permanent failure")]
    Permanent {
        batch_id: u64,
        #[source]
        source: StoreError,
    },

    #[error("batch {batch_id} dropped after {attempts} attempts")]
    RetriesExhausted {
        batch_id: u64,
        attempts: u32,
        #[source]
        source: StoreError,
    },
}

/// Failure to build a [`DocumentSink`](crate::sink::DocumentSink).
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("a tokio runtime is required to start the sink worker")]
    NoRuntime,
}

/// Failure to install the global tracing subscriber.
#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("failed to set global subscriber: {0}")]
    SetGlobalDefault(#[from] tracing::subscriber::SetGlobalDefaultError),
}
