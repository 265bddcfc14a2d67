//! Crate-level error types
//!
//! These cover failures of the instrumentation machinery itself (setup, export,
//! configuration). Errors raised by instrumented handlers are never converted into
//! this type; see [`crate::taxonomy`] for how those are classified.

use thiserror::Error;

/// Errors that can occur while setting up or operating the instrumentation
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to initialize telemetry
    #[error("Failed to initialize telemetry: {0}")]
    InitializationFailed(String),

    /// Invalid configuration
    #[error("Invalid telemetry configuration: {0}")]
    InvalidConfiguration(String),

    /// Export to a sink or collector failed
    #[error("Failed to export telemetry data: {0}")]
    ExportFailed(String),

    /// Tracing subscriber error
    #[error("Tracing subscriber error: {0}")]
    TracingError(String),

    /// A sink rejected an event
    #[error("Sink '{sink}' failed: {message}")]
    SinkFailed {
        /// Name of the failing sink
        sink: String,
        /// Failure description
        message: String,
    },

    /// OpenTelemetry pipeline error
    #[cfg(feature = "otlp")]
    #[error("OpenTelemetry error: {0}")]
    OpenTelemetryError(String),

    /// Metrics error
    #[cfg(feature = "prometheus")]
    #[error("Metrics error: {0}")]
    MetricsError(String),
}

impl From<reqwest::Error> for TelemetryError {
    fn from(err: reqwest::Error) -> Self {
        Self::ExportFailed(err.to_string())
    }
}

/// Result type for telemetry operations
pub type TelemetryResult<T> = Result<T, TelemetryError>;
