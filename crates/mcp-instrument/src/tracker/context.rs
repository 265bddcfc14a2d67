//! Per-operation records passed between the facade, hooks and tracker

use crate::taxonomy::McpError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Request-level metadata captured when an operation starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationMetadata {
    /// Protocol method name
    pub method: String,
    /// Caller-supplied request id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Original call parameters, before any argument stripping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Intent extracted from the tool arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_context: Option<String>,
}

/// Correlation record for one in-flight request
///
/// Created when handling starts and read-only afterwards.
#[derive(Debug, Clone)]
pub struct OperationContext {
    /// Unique id keying the operation's open span
    pub operation_id: String,
    /// Monotonic start, used for durations
    pub start_time: Instant,
    /// Wall-clock start, used in event payloads
    pub started_at: DateTime<Utc>,
    /// Request metadata
    pub metadata: OperationMetadata,
}

impl OperationContext {
    /// Create a context with a fresh operation id
    #[must_use]
    pub fn new(method: impl Into<String>, request_id: Option<String>, params: Option<Value>) -> Self {
        Self {
            operation_id: Uuid::new_v4().to_string(),
            start_time: Instant::now(),
            started_at: Utc::now(),
            metadata: OperationMetadata {
                method: method.into(),
                request_id,
                params,
                ai_context: None,
            },
        }
    }

    /// Attach the caller's intent
    #[must_use]
    pub fn with_ai_context(mut self, context: impl Into<String>) -> Self {
        self.metadata.ai_context = Some(context.into());
        self
    }

    /// Time since the operation started
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Error details of a failed operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodError {
    /// Error code
    pub code: String,
    /// Error message
    pub message: String,
    /// Structured details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl MethodError {
    /// Create an error with no details
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }
}

impl From<&McpError> for MethodError {
    fn from(error: &McpError) -> Self {
        Self {
            code: error.code.clone(),
            message: error.message.clone(),
            details: error.details.clone(),
        }
    }
}

impl From<McpError> for MethodError {
    fn from(error: McpError) -> Self {
        Self {
            code: error.code,
            message: error.message,
            details: error.details,
        }
    }
}

/// Outcome of an operation, handed to the tracker when its span ends
#[derive(Debug, Clone, PartialEq)]
pub struct MethodResult {
    /// Whether the handler succeeded
    pub success: bool,
    /// Handler result on success
    pub data: Option<Value>,
    /// Error on failure
    pub error: Option<MethodError>,
    /// Caller-measured duration
    pub duration: Duration,
    /// Completion time
    pub timestamp: DateTime<Utc>,
}

impl MethodResult {
    /// Successful outcome
    #[must_use]
    pub fn success(data: Value, duration: Duration) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            duration,
            timestamp: Utc::now(),
        }
    }

    /// Failed outcome
    #[must_use]
    pub fn failure(error: impl Into<MethodError>, duration: Duration) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            duration,
            timestamp: Utc::now(),
        }
    }

    /// Duration in fractional milliseconds
    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }
}

/// Handle describing a span opened by the tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanRef {
    /// Operation the span belongs to
    pub operation_id: String,
    /// Hex trace id (all zeros for non-recording spans)
    pub trace_id: String,
    /// Hex span id (all zeros for non-recording spans)
    pub span_id: String,
    /// Whether the backend is recording the span
    pub recording: bool,
}
