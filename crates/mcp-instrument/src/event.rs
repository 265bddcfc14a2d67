//! Telemetry events and derived metrics

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;

/// Trailing window used for the request rate
pub const RATE_WINDOW_SECS: i64 = 60;

/// Data key carrying the operation id on every event
pub const OPERATION_ID_KEY: &str = "operationId";

/// Kind of telemetry event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TelemetryEventType {
    /// An operation started
    RequestStart,
    /// An operation finished
    RequestEnd,
    /// A standalone error report
    Error,
    /// A client session opened
    SessionStart,
    /// A client session closed
    SessionEnd,
    /// A metric value changed
    MetricUpdate,
}

impl TelemetryEventType {
    /// Kebab-case name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RequestStart => "request-start",
            Self::RequestEnd => "request-end",
            Self::Error => "error",
            Self::SessionStart => "session-start",
            Self::SessionEnd => "session-end",
            Self::MetricUpdate => "metric-update",
        }
    }
}

impl fmt::Display for TelemetryEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trace and span ids of the span an event belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanContextInfo {
    /// Hex trace id
    pub trace_id: String,
    /// Hex span id
    pub span_id: String,
}

/// Immutable record of something that happened to an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    /// Event kind
    #[serde(rename = "type")]
    pub event_type: TelemetryEventType,
    /// When the event was recorded
    pub timestamp: DateTime<Utc>,
    /// Payload; always includes `operationId`
    pub data: Map<String, Value>,
    /// Span the event belongs to, when one was recording
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_context: Option<SpanContextInfo>,
}

impl TelemetryEvent {
    /// Create an event stamped with the current time
    #[must_use]
    pub fn new(event_type: TelemetryEventType, operation_id: &str, data: Map<String, Value>) -> Self {
        Self::at(Utc::now(), event_type, operation_id, data)
    }

    /// Create an event with an explicit timestamp
    #[must_use]
    pub fn at(
        timestamp: DateTime<Utc>,
        event_type: TelemetryEventType,
        operation_id: &str,
        mut data: Map<String, Value>,
    ) -> Self {
        data.insert(OPERATION_ID_KEY.to_string(), Value::from(operation_id));
        Self {
            event_type,
            timestamp,
            data,
            span_context: None,
        }
    }

    /// Attach span ids
    #[must_use]
    pub fn with_span_context(mut self, span_context: Option<SpanContextInfo>) -> Self {
        self.span_context = span_context;
        self
    }

    /// Operation id carried in the payload
    #[must_use]
    pub fn operation_id(&self) -> Option<&str> {
        self.data.get(OPERATION_ID_KEY).and_then(Value::as_str)
    }

    /// Success flag of a request-end event
    #[must_use]
    pub fn success(&self) -> Option<bool> {
        self.data.get("success").and_then(Value::as_bool)
    }

    /// Duration in milliseconds of a request-end event
    #[must_use]
    pub fn duration_ms(&self) -> Option<f64> {
        self.data.get("duration").and_then(Value::as_f64)
    }
}

/// Aggregate counters derived from an event log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Completed operations
    pub total_requests: u64,
    /// Completed operations that succeeded
    pub successful_requests: u64,
    /// Completed operations that failed
    pub failed_requests: u64,
    /// Mean duration of completed operations in milliseconds
    pub average_duration_ms: f64,
    /// Completions per second over the trailing minute
    pub requests_per_second: f64,
    /// Operations started but not yet finished
    pub active_operations: u64,
}

impl MetricsSnapshot {
    /// Derive a snapshot from events, measuring the rate window back from `now`
    ///
    /// Active operations are request-start events whose operation id has no
    /// request-end event in the same log.
    #[must_use]
    pub fn from_events<'a, I>(events: I, now: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = &'a TelemetryEvent>,
    {
        let window_start = now - ChronoDuration::seconds(RATE_WINDOW_SECS);
        let mut snapshot = Self::default();
        let mut duration_total = 0.0;
        let mut duration_samples = 0u64;
        let mut recent = 0u64;
        let mut started: HashSet<&str> = HashSet::new();
        let mut finished: HashSet<&str> = HashSet::new();

        for event in events {
            match event.event_type {
                TelemetryEventType::RequestStart => {
                    if let Some(id) = event.operation_id() {
                        started.insert(id);
                    }
                }
                TelemetryEventType::RequestEnd => {
                    snapshot.total_requests += 1;
                    if event.success().unwrap_or(false) {
                        snapshot.successful_requests += 1;
                    } else {
                        snapshot.failed_requests += 1;
                    }
                    if let Some(duration) = event.duration_ms() {
                        duration_total += duration;
                        duration_samples += 1;
                    }
                    if event.timestamp >= window_start {
                        recent += 1;
                    }
                    if let Some(id) = event.operation_id() {
                        finished.insert(id);
                    }
                }
                _ => {}
            }
        }

        if duration_samples > 0 {
            snapshot.average_duration_ms = duration_total / duration_samples as f64;
        }
        snapshot.requests_per_second = recent as f64 / RATE_WINDOW_SECS as f64;
        snapshot.active_operations = started.difference(&finished).count() as u64;
        snapshot
    }
}
