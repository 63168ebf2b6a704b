//! Error classification shared by the HTTP-based stores.

use crate::error::StoreError;
use reqwest::StatusCode;

/// Map an HTTP status to a store error; `None` for success.
pub(crate) fn classify_status(status: StatusCode, body: &str, backend: &str) -> Option<StoreError> {
    if status.is_success() {
        return None;
    }
    let message = format!("{} insert failed with status {}: {}", backend, status, body);
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::REQUEST_TIMEOUT {
        Some(StoreError::transient(message))
    } else {
        Some(StoreError::permanent(message))
    }
}

/// Map a transport-level failure to a store error.
pub(crate) fn classify_request_error(err: reqwest::Error, backend: &str) -> StoreError {
    let message = format!("{} request failed: {}", backend, err);
    if err.is_builder() {
        StoreError::permanent(message).with_source(err)
    } else {
        // Connect, timeout and body errors are all worth another attempt.
        StoreError::transient(message).with_source(err)
    }
}
