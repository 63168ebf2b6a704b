//! Environment variable names used by [`SinkConfig::from_env`].
//!
//! These are purely helpers; the core pipeline types remain decoupled from
//! environment access.
//!
//! [`SinkConfig::from_env`]: crate::config::SinkConfig::from_env

use crate::error::ConfigError;
use std::str::FromStr;

/// Destination URL, e.g. `file:///var/log/app` or `opensearch://127.0.0.1:9200`.
pub const LOG_SINK_DESTINATION_ENV: &str = "LOG_SINK_DESTINATION";

/// Target collection (index / table) name.
pub const LOG_SINK_COLLECTION_ENV: &str = "LOG_SINK_COLLECTION";

/// Minimum severity, e.g. `info` or `warning`.
pub const LOG_SINK_MIN_LEVEL_ENV: &str = "LOG_SINK_MIN_LEVEL";

/// Maximum events per batch.
pub const LOG_SINK_BATCH_LIMIT_ENV: &str = "LOG_SINK_BATCH_LIMIT";

/// Flush period in milliseconds.
pub const LOG_SINK_PERIOD_MS_ENV: &str = "LOG_SINK_PERIOD_MS";

/// In-memory queue capacity.
pub const LOG_SINK_QUEUE_CAPACITY_ENV: &str = "LOG_SINK_QUEUE_CAPACITY";

/// Shutdown grace period in milliseconds.
pub const LOG_SINK_SHUTDOWN_GRACE_MS_ENV: &str = "LOG_SINK_SHUTDOWN_GRACE_MS";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read a non-empty environment variable.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Read and parse an environment variable, if set.
pub fn env_parse<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match env_opt(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { key, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parse_reports_bad_values() {
        std::env::set_var("LOG_SINK_TEST_PARSE_OK", " 42 ");
        std::env::set_var("LOG_SINK_TEST_PARSE_BAD", "lots");

        assert_eq!(env_parse::<usize>("LOG_SINK_TEST_PARSE_OK").unwrap(), Some(42));
        assert_eq!(env_parse::<usize>("LOG_SINK_TEST_PARSE_UNSET").unwrap(), None);
        assert!(matches!(
            env_parse::<usize>("LOG_SINK_TEST_PARSE_BAD"),
            Err(ConfigError::InvalidEnv { key: "LOG_SINK_TEST_PARSE_BAD", .. })
        ));
    }
}
