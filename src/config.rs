use crate::document::FormatProvider;
use crate::env;
use crate::error::ConfigError;
use crate::event::Severity;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Collection used when none is configured.
pub const DEFAULT_COLLECTION_NAME: &str = "log";

/// Maximum number of events in a single batch.
pub const DEFAULT_BATCH_POSTING_LIMIT: usize = 50;

/// Maximum time the first event of a batch waits before the batch is flushed.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(2);

/// Number of events buffered before the overflow policy applies.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// How long a producer may wait for space under [`OverflowPolicy::Block`].
pub const DEFAULT_BLOCK_TIMEOUT: Duration = Duration::from_millis(10);

/// How long `close()` waits for buffered events to be flushed.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// What the queue does with a new event when it is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Evict the oldest queued event to make room.
    DropOldest,
    /// Reject the new event.
    DropNewest,
    /// Wait up to `timeout` for space, then evict the oldest queued event.
    Block { timeout: Duration },
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::Block { timeout: DEFAULT_BLOCK_TIMEOUT }
    }
}

/// Exponential backoff applied to transient store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; zero disables retrying.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

/// Sink configuration.
///
/// Built once, validated, and shared read-only by the queue, batcher and
/// flusher for the lifetime of the sink.
#[derive(Clone)]
pub struct SinkConfig {
    /// Destination URL, e.g. `file:///var/log/app` or `opensearch://127.0.0.1:9200`.
    pub destination: String,
    pub collection_name: String,
    pub minimum_level: Severity,
    pub batch_posting_limit: usize,
    pub period: Duration,
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    pub shutdown_grace: Duration,
    pub retry: RetryPolicy,
    pub format_provider: Option<Arc<dyn FormatProvider>>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig {
            destination: String::new(),
            collection_name: DEFAULT_COLLECTION_NAME.to_string(),
            minimum_level: Severity::MINIMUM,
            batch_posting_limit: DEFAULT_BATCH_POSTING_LIMIT,
            period: DEFAULT_PERIOD,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow: OverflowPolicy::default(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            retry: RetryPolicy::default(),
            format_provider: None,
        }
    }
}

impl fmt::Debug for SinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkConfig")
            .field("destination", &self.destination)
            .field("collection_name", &self.collection_name)
            .field("minimum_level", &self.minimum_level)
            .field("batch_posting_limit", &self.batch_posting_limit)
            .field("period", &self.period)
            .field("queue_capacity", &self.queue_capacity)
            .field("overflow", &self.overflow)
            .field("shutdown_grace", &self.shutdown_grace)
            .field("retry", &self.retry)
            .field("format_provider", &self.format_provider.is_some())
            .finish()
    }
}

impl SinkConfig {
    pub fn new(destination: impl Into<String>) -> Self {
        SinkConfig { destination: destination.into(), ..Default::default() }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection_name = collection.into();
        self
    }

    pub fn with_minimum_level(mut self, level: Severity) -> Self {
        self.minimum_level = level;
        self
    }

    pub fn with_batch_posting_limit(mut self, limit: usize) -> Self {
        self.batch_posting_limit = limit;
        self
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_format_provider(mut self, provider: Arc<dyn FormatProvider>) -> Self {
        self.format_provider = Some(provider);
        self
    }

    /// Whether an event of `level` should reach the queue.
    pub fn accepts(&self, level: Severity) -> bool {
        level.passes(self.minimum_level)
    }

    /// Check the invariants the pipeline relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.destination.trim().is_empty() {
            return Err(ConfigError::MissingDestination);
        }
        if self.collection_name.trim().is_empty() {
            return Err(ConfigError::MissingCollection);
        }
        if self.batch_posting_limit == 0 {
            return Err(ConfigError::ZeroBatchLimit);
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.period.is_zero() {
            return Err(ConfigError::ZeroPeriod);
        }
        Ok(())
    }

    /// Build a configuration from `LOG_SINK_*` environment variables.
    ///
    /// Unset variables keep their defaults; set but unparsable ones are
    /// reported as [`ConfigError::InvalidEnv`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = SinkConfig::new(env::env_or(env::LOG_SINK_DESTINATION_ENV, ""));

        if let Some(collection) = env::env_opt(env::LOG_SINK_COLLECTION_ENV) {
            config.collection_name = collection;
        }
        if let Some(level) = env::env_parse(env::LOG_SINK_MIN_LEVEL_ENV)? {
            config.minimum_level = level;
        }
        if let Some(limit) = env::env_parse(env::LOG_SINK_BATCH_LIMIT_ENV)? {
            config.batch_posting_limit = limit;
        }
        if let Some(ms) = env::env_parse(env::LOG_SINK_PERIOD_MS_ENV)? {
            config.period = Duration::from_millis(ms);
        }
        if let Some(capacity) = env::env_parse(env::LOG_SINK_QUEUE_CAPACITY_ENV)? {
            config.queue_capacity = capacity;
        }
        if let Some(ms) = env::env_parse(env::LOG_SINK_SHUTDOWN_GRACE_MS_ENV)? {
            config.shutdown_grace = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let config = SinkConfig::new("memory://");
        assert_eq!(config.collection_name, "log");
        assert_eq!(config.batch_posting_limit, 50);
        assert_eq!(config.period, Duration::from_secs(2));
        assert_eq!(config.minimum_level, Severity::Trace);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn blank_destination_fails_fast() {
        let err = SinkConfig::new("   ").validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingDestination));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let base = SinkConfig::new("memory://");
        assert!(matches!(
            base.clone().with_batch_posting_limit(0).validate(),
            Err(ConfigError::ZeroBatchLimit)
        ));
        assert!(matches!(
            base.clone().with_queue_capacity(0).validate(),
            Err(ConfigError::ZeroQueueCapacity)
        ));
        assert!(matches!(
            base.clone().with_period(Duration::ZERO).validate(),
            Err(ConfigError::ZeroPeriod)
        ));
        assert!(matches!(
            base.with_collection("").validate(),
            Err(ConfigError::MissingCollection)
        ));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = RetryPolicy {
            max_retries: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        };
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(3), Duration::from_millis(400));
        assert_eq!(retry.backoff(4), Duration::from_millis(500));
        assert_eq!(retry.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn minimum_level_predicate() {
        let config = SinkConfig::new("memory://").with_minimum_level(Severity::Warn);
        assert!(config.accepts(Severity::Error));
        assert!(!config.accepts(Severity::Debug));
    }
}
