use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Severity of a [`LogEvent`], ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    /// Lowest severity; a sink configured with it accepts every event.
    pub const MINIMUM: Severity = Severity::Trace;

    /// Minimum-level predicate applied before an event reaches the queue.
    pub fn passes(self, minimum: Severity) -> bool {
        self >= minimum
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<tracing::Level> for Severity {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Severity::Trace,
            tracing::Level::DEBUG => Severity::Debug,
            tracing::Level::INFO => Severity::Info,
            tracing::Level::WARN => Severity::Warn,
            tracing::Level::ERROR => Severity::Error,
        }
    }
}

/// Error returned when a severity name cannot be parsed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown severity level: {0:?}")]
pub struct ParseSeverityError(pub String);

impl FromStr for Severity {
    type Err = ParseSeverityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" | "verbose" => Ok(Severity::Trace),
            "debug" => Ok(Severity::Debug),
            "info" | "information" => Ok(Severity::Info),
            "warn" | "warning" => Ok(Severity::Warn),
            "error" => Ok(Severity::Error),
            "fatal" | "critical" => Ok(Severity::Fatal),
            _ => Err(ParseSeverityError(s.to_string())),
        }
    }
}

/// Error details attached to a [`LogEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    pub message: String,
    pub type_name: Option<String>,
    /// Messages of the `source()` chain, outermost first.
    pub sources: Vec<String>,
}

impl ExceptionInfo {
    pub fn new(message: impl Into<String>) -> Self {
        ExceptionInfo {
            message: message.into(),
            type_name: None,
            sources: Vec::new(),
        }
    }

    /// Capture an error together with its `source()` chain.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut sources = Vec::new();
        let mut current = err.source();
        while let Some(source) = current {
            sources.push(source.to_string());
            current = source.source();
        }
        ExceptionInfo {
            message: err.to_string(),
            type_name: None,
            sources,
        }
    }

    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }
}

/// A single log event as handed to the sink.
///
/// Events are treated as read-only once emitted; the pipeline moves them
/// from the queue into a batch and drops them after the flush attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: Severity,
    pub message: String,
    pub target: String,
    pub module_path: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub properties: BTreeMap<String, serde_json::Value>,
    pub exception: Option<ExceptionInfo>,
}

impl LogEvent {
    /// Create an event stamped with the current time and an empty target.
    pub fn new(level: Severity, message: impl Into<String>) -> Self {
        LogEvent {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            target: String::new(),
            module_path: None,
            file: None,
            line: None,
            properties: BTreeMap::new(),
            exception: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_exception(mut self, exception: ExceptionInfo) -> Self {
        self.exception = Some(exception);
        self
    }
}
