//! Error taxonomy for instrumented operations
//!
//! Every error that crosses an operation boundary is normalized into an
//! [`McpError`] before it is recorded. Normalization is for telemetry only:
//! callers always receive the error value the handler produced.
//!
//! ```rust
//! use mcp_instrument::taxonomy::{ErrorHandler, ErrorType};
//!
//! let handler = ErrorHandler::new();
//! let normalized = handler.normalize_message("Connection refused by upstream");
//! assert_eq!(normalized.error_type, ErrorType::ConnectionError);
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default window for storm detection
pub const DEFAULT_STORM_WINDOW: Duration = Duration::from_secs(60);

/// Default number of same-type errors inside the window that counts as a storm
pub const DEFAULT_STORM_THRESHOLD: u32 = 10;

/// Fixed classification of operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorType {
    /// Malformed request
    InvalidRequest,
    /// Unknown method
    MethodNotFound,
    /// Parameters failed validation
    InvalidParams,
    /// Unclassified server failure
    InternalError,
    /// Caller could not be authenticated
    AuthenticationFailed,
    /// Caller lacks permission
    AuthorizationFailed,
    /// Target resource does not exist
    ResourceNotFound,
    /// Quota or capacity exhausted
    ResourceExhausted,
    /// Operation exceeded its deadline
    Timeout,
    /// Operation was cancelled
    Cancelled,
    /// Network or upstream connection failure
    ConnectionError,
    /// Protocol violation
    ProtocolError,
}

impl ErrorType {
    /// Kebab-case name, also used as the default error code
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid-request",
            Self::MethodNotFound => "method-not-found",
            Self::InvalidParams => "invalid-params",
            Self::InternalError => "internal-error",
            Self::AuthenticationFailed => "authentication-failed",
            Self::AuthorizationFailed => "authorization-failed",
            Self::ResourceNotFound => "resource-not-found",
            Self::ResourceExhausted => "resource-exhausted",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::ConnectionError => "connection-error",
            Self::ProtocolError => "protocol-error",
        }
    }

    /// Map a JSON-RPC error code onto the taxonomy
    #[must_use]
    pub const fn from_jsonrpc_code(code: i64) -> Option<Self> {
        match code {
            -32700 => Some(Self::ProtocolError),
            -32600 => Some(Self::InvalidRequest),
            -32601 => Some(Self::MethodNotFound),
            -32602 => Some(Self::InvalidParams),
            -32603 => Some(Self::InternalError),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical error shape recorded for failed operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct McpError {
    /// Classification
    pub error_type: ErrorType,
    /// Error code, defaults to the type name
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Opaque structured details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// Whether retrying may succeed
    pub retryable: bool,
    /// When the error was created
    pub timestamp: DateTime<Utc>,
}

impl McpError {
    /// Create an error of the given type
    #[must_use]
    pub fn new(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            code: error_type.as_str().to_string(),
            message: message.into(),
            details: None,
            retryable: false,
            timestamp: Utc::now(),
        }
    }

    /// Invalid request
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorType::InvalidRequest, message)
    }

    /// Method not found
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(ErrorType::MethodNotFound, format!("Method not found: {method}"))
    }

    /// Invalid parameters
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorType::InvalidParams, message)
    }

    /// Internal error
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorType::InternalError, message)
    }

    /// Authentication failure
    #[must_use]
    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorType::AuthenticationFailed, message)
    }

    /// Authorization failure
    #[must_use]
    pub fn authorization_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorType::AuthorizationFailed, message)
    }

    /// Resource not found
    #[must_use]
    pub fn resource_not_found(resource: impl Into<String>) -> Self {
        Self::new(ErrorType::ResourceNotFound, resource)
    }

    /// Resource exhausted (retryable)
    #[must_use]
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorType::ResourceExhausted, message).with_retryable(true)
    }

    /// Timeout
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorType::Timeout, message)
    }

    /// Cancelled operation
    #[must_use]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorType::Cancelled, message)
    }

    /// Connection failure (retryable)
    #[must_use]
    pub fn connection_error(message: impl Into<String>) -> Self {
        Self::new(ErrorType::ConnectionError, message).with_retryable(true)
    }

    /// Protocol violation
    #[must_use]
    pub fn protocol_error(message: impl Into<String>) -> Self {
        Self::new(ErrorType::ProtocolError, message)
    }

    /// Build from a JSON-RPC error object (`{"code": .., "message": .., "data": ..}`)
    #[must_use]
    pub fn from_jsonrpc(error: &Value) -> Self {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_string();
        let code = error.get("code").and_then(Value::as_i64);

        let mut normalized = match code.and_then(ErrorType::from_jsonrpc_code) {
            Some(error_type) => Self::new(error_type, message),
            None => classify_message(&message),
        };
        if let Some(code) = code {
            normalized.code = code.to_string();
        }
        normalized.details = error.get("data").cloned();
        normalized
    }

    /// Override the error code
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    /// Attach structured details
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Override the retryable flag
    #[must_use]
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Fixed, non-technical message suitable for end users
    #[must_use]
    pub fn to_user_message(&self) -> String {
        let mapped = match self.error_type {
            ErrorType::InvalidRequest => "The request was invalid. Please check your input and try again.",
            ErrorType::MethodNotFound => "The requested operation is not supported.",
            ErrorType::InvalidParams => "Some of the provided parameters are invalid.",
            ErrorType::InternalError => "An internal error occurred. Please try again later.",
            ErrorType::AuthenticationFailed => "Authentication failed. Please check your credentials.",
            ErrorType::AuthorizationFailed => "You do not have permission to perform this action.",
            ErrorType::ResourceNotFound => "The requested resource was not found.",
            ErrorType::ResourceExhausted => "The service is busy right now. Please try again later.",
            ErrorType::Timeout => "The operation took too long to complete. Please try again.",
            ErrorType::Cancelled => "The operation was cancelled.",
            ErrorType::ConnectionError => "A connection problem occurred. Please check your network and try again.",
            ErrorType::ProtocolError => "",
        };

        if !mapped.is_empty() {
            mapped.to_string()
        } else if self.message.is_empty() {
            "An unexpected error occurred.".to_string()
        } else {
            self.message.clone()
        }
    }
}

/// Classify a free-text error message
///
/// Keyword matching is ordered and case-insensitive; the first match wins.
#[must_use]
pub fn classify_message(message: &str) -> McpError {
    let lower = message.to_lowercase();
    let error_type = if lower.contains("timeout") {
        ErrorType::Timeout
    } else if lower.contains("connection") || lower.contains("econnrefused") {
        ErrorType::ConnectionError
    } else if lower.contains("authentication") || lower.contains("unauthorized") {
        ErrorType::AuthenticationFailed
    } else if lower.contains("permission") || lower.contains("forbidden") {
        ErrorType::AuthorizationFailed
    } else if lower.contains("not found") {
        ErrorType::ResourceNotFound
    } else {
        ErrorType::InternalError
    };

    match error_type {
        ErrorType::ConnectionError => McpError::connection_error(message),
        other => McpError::new(other, message),
    }
}

#[derive(Debug, Clone, Copy)]
struct ErrorFrequency {
    count: u32,
    last_seen: Instant,
}

/// Normalizes errors and watches for error storms
///
/// A storm is `threshold` errors of the same type with no gap longer than
/// `window` between consecutive occurrences.
#[derive(Debug)]
pub struct ErrorHandler {
    window: Duration,
    threshold: u32,
    frequencies: Mutex<HashMap<ErrorType, ErrorFrequency>>,
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorHandler {
    /// Handler with the default window and threshold
    #[must_use]
    pub fn new() -> Self {
        Self::with_storm_detection(DEFAULT_STORM_WINDOW, DEFAULT_STORM_THRESHOLD)
    }

    /// Handler with a custom storm window and threshold
    #[must_use]
    pub fn with_storm_detection(window: Duration, threshold: u32) -> Self {
        Self {
            window,
            threshold: threshold.max(1),
            frequencies: Mutex::new(HashMap::new()),
        }
    }

    /// Normalize an arbitrary error and record it for storm detection
    pub fn normalize(&self, error: &(dyn std::error::Error + 'static)) -> McpError {
        let normalized = match error.downcast_ref::<McpError>() {
            Some(canonical) => canonical.clone(),
            None => classify_message(&error.to_string()),
        };
        self.track(normalized.error_type);
        normalized
    }

    /// Normalize an error known only by its message
    pub fn normalize_message(&self, message: &str) -> McpError {
        let normalized = classify_message(message);
        self.track(normalized.error_type);
        normalized
    }

    /// Record an already-canonical error
    pub fn record(&self, error: &McpError) {
        self.track(error.error_type);
    }

    /// Current count for an error type inside its window
    #[must_use]
    pub fn frequency(&self, error_type: ErrorType) -> u32 {
        self.frequencies
            .lock()
            .get(&error_type)
            .map_or(0, |f| f.count)
    }

    /// Forget every recorded frequency
    pub fn reset(&self) {
        self.frequencies.lock().clear();
    }

    fn track(&self, error_type: ErrorType) {
        if self.record_at(error_type, Instant::now()) {
            warn!(
                error_type = %error_type,
                threshold = self.threshold,
                window_secs = self.window.as_secs(),
                "Error storm detected"
            );
            #[cfg(feature = "prometheus")]
            crate::metrics::record_error_storm(error_type.as_str());
        }
    }

    /// Returns true exactly when this occurrence reaches the threshold
    fn record_at(&self, error_type: ErrorType, now: Instant) -> bool {
        let mut frequencies = self.frequencies.lock();
        let entry = frequencies.entry(error_type).or_insert(ErrorFrequency {
            count: 0,
            last_seen: now,
        });

        if now.saturating_duration_since(entry.last_seen) > self.window {
            entry.count = 1;
        } else {
            entry.count = entry.count.saturating_add(1);
        }
        entry.last_seen = now;

        debug!(error_type = %error_type, count = entry.count, "Recorded operation error");
        entry.count == self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_order() {
        let cases = [
            ("Request timeout after 30s", ErrorType::Timeout),
            ("connection reset", ErrorType::ConnectionError),
            ("ECONNREFUSED 127.0.0.1:80", ErrorType::ConnectionError),
            ("Unauthorized", ErrorType::AuthenticationFailed),
            ("authentication required", ErrorType::AuthenticationFailed),
            ("Forbidden", ErrorType::AuthorizationFailed),
            ("permission denied", ErrorType::AuthorizationFailed),
            ("not found: widget", ErrorType::ResourceNotFound),
            ("something odd", ErrorType::InternalError),
            // First match wins
            ("connection timeout", ErrorType::Timeout),
        ];

        for (message, expected) in cases {
            let classified = classify_message(message);
            assert_eq!(classified.error_type, expected, "{message}");
            assert_eq!(classified.message, message);
        }
    }

    #[test]
    fn test_default_code_and_retryable() {
        let err = McpError::timeout("slow");
        assert_eq!(err.code, "timeout");
        assert!(!err.retryable);

        assert!(McpError::resource_exhausted("quota").retryable);
        assert!(McpError::connection_error("down").retryable);
        assert_eq!(McpError::internal("x").with_code("E42").code, "E42");
    }

    #[test]
    fn test_canonical_errors_pass_through() {
        let handler = ErrorHandler::new();
        let original = McpError::invalid_params("missing 'query'").with_details(serde_json::json!({"field": "query"}));
        let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(original.clone());

        let normalized = handler.normalize(boxed.as_ref());
        assert_eq!(normalized, original);
    }

    #[test]
    fn test_normalize_foreign_error() {
        let handler = ErrorHandler::new();
        let io = std::io::Error::other("permission denied on /etc/shadow");
        let normalized = handler.normalize(&io);

        assert_eq!(normalized.error_type, ErrorType::AuthorizationFailed);
        assert_eq!(normalized.message, "permission denied on /etc/shadow");
        assert_eq!(handler.frequency(ErrorType::AuthorizationFailed), 1);
    }

    #[test]
    fn test_from_jsonrpc() {
        let err = McpError::from_jsonrpc(&serde_json::json!({
            "code": -32601,
            "message": "no such method",
            "data": {"method": "tools/frobnicate"}
        }));
        assert_eq!(err.error_type, ErrorType::MethodNotFound);
        assert_eq!(err.code, "-32601");
        assert!(err.details.is_some());

        let err = McpError::from_jsonrpc(&serde_json::json!({"code": 42, "message": "upstream timeout"}));
        assert_eq!(err.error_type, ErrorType::Timeout);
    }

    #[test]
    fn test_storm_warns_once_per_burst() {
        let handler = ErrorHandler::with_storm_detection(Duration::from_secs(60), 10);
        let start = Instant::now();

        let hits: Vec<bool> = (0..15)
            .map(|i| handler.record_at(ErrorType::Timeout, start + Duration::from_secs(i)))
            .collect();

        assert_eq!(hits.iter().filter(|hit| **hit).count(), 1);
        assert!(hits[9]);
        assert_eq!(handler.frequency(ErrorType::Timeout), 15);
    }

    #[test]
    fn test_storm_window_resets_count() {
        let handler = ErrorHandler::with_storm_detection(Duration::from_secs(60), 3);
        let start = Instant::now();

        assert!(!handler.record_at(ErrorType::InternalError, start));
        assert!(!handler.record_at(ErrorType::InternalError, start + Duration::from_secs(10)));
        // Gap longer than the window starts a new burst
        assert!(!handler.record_at(ErrorType::InternalError, start + Duration::from_secs(100)));
        assert_eq!(handler.frequency(ErrorType::InternalError), 1);

        assert!(!handler.record_at(ErrorType::InternalError, start + Duration::from_secs(101)));
        assert!(handler.record_at(ErrorType::InternalError, start + Duration::from_secs(102)));
    }

    #[test]
    fn test_storm_counts_are_per_type() {
        let handler = ErrorHandler::with_storm_detection(Duration::from_secs(60), 2);
        let now = Instant::now();

        assert!(!handler.record_at(ErrorType::Timeout, now));
        assert!(!handler.record_at(ErrorType::Cancelled, now));
        assert!(handler.record_at(ErrorType::Timeout, now));
    }

    #[test]
    fn test_user_messages() {
        assert_eq!(
            McpError::resource_not_found("widget").to_user_message(),
            "The requested resource was not found."
        );
        assert_eq!(
            McpError::protocol_error("bad frame").to_user_message(),
            "bad frame"
        );
        assert_eq!(
            McpError::protocol_error("").to_user_message(),
            "An unexpected error occurred."
        );
    }

    #[test]
    fn test_error_type_serialization() {
        let json = serde_json::to_value(ErrorType::ResourceNotFound).unwrap();
        assert_eq!(json, serde_json::json!("resource-not-found"));
        assert_eq!(ErrorType::AuthenticationFailed.to_string(), "authentication-failed");
    }
}
