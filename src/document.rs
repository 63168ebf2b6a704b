use crate::event::{ExceptionInfo, LogEvent};
use serde::Serialize;
use std::collections::BTreeMap;

/// A document as written to a [`DocumentStore`](crate::store::DocumentStore).
pub type Document = serde_json::Value;

/// Hook for rendering the human-readable message stored with each document.
pub trait FormatProvider: Send + Sync {
    fn render(&self, event: &LogEvent) -> String;
}

/// Renders `message` followed by `key=value` pairs for every property.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyValueFormat;

impl FormatProvider for KeyValueFormat {
    fn render(&self, event: &LogEvent) -> String {
        let mut out = event.message.clone();
        for (key, value) in &event.properties {
            match value {
                serde_json::Value::String(s) => out.push_str(&format!(" {}={}", key, s)),
                other => out.push_str(&format!(" {}={}", key, other)),
            }
        }
        out
    }
}

#[derive(Serialize)]
struct LogDocument<'a> {
    timestamp: String,
    level: &'static str,
    message: &'a str,
    rendered_message: String,
    target: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    module_path: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<u32>,
    properties: &'a BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exception: Option<&'a ExceptionInfo>,
}

/// Map an event to the document persisted for it.
pub fn to_document(
    event: &LogEvent,
    format: Option<&dyn FormatProvider>,
) -> Result<Document, serde_json::Error> {
    let rendered_message = match format {
        Some(provider) => provider.render(event),
        None => event.message.clone(),
    };

    serde_json::to_value(LogDocument {
        timestamp: event.timestamp.to_rfc3339(),
        level: event.level.as_str(),
        message: &event.message,
        rendered_message,
        target: &event.target,
        module_path: event.module_path.as_deref(),
        file: event.file.as_deref(),
        line: event.line,
        properties: &event.properties,
        exception: event.exception.as_ref(),
    })
}
