//! Operation tracking and telemetry for MCP servers
//!
//! This crate instruments the request handlers of an MCP server:
//!
//! - **Operation Tracking**: one OpenTelemetry span and one start/end event pair per request
//! - **Intent Capture**: an optional `context` argument on tool schemas, extracted and stripped before the tool runs
//! - **Error Taxonomy**: failures classified into a fixed set of types, with error-storm detection
//! - **Telemetry Sinks**: console, in-memory, remote HTTP and composite event sinks
//! - **Tower Middleware**: the same lifecycle for any `tower::Service<serde_json::Value>`
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use mcp_instrument::{MethodRegistry, TrackingConfig, track};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TrackingConfig::builder()
//!         .service_name("my-mcp-server")
//!         .otlp_endpoint("http://localhost:4318")
//!         .build();
//!
//!     // Logging and OTLP export; keep the guard alive
//!     let _guard = config.clone().init()?;
//!
//!     let mut server = track(MethodRegistry::new(), config);
//!     // server.set_request_handler(...) as usual
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - `otlp` - OTLP/HTTP trace export and the tracing-opentelemetry bridge
//! - `prometheus` - Prometheus metrics with a scrape endpoint
//! - `tower` - Tower middleware (enabled by default)
//! - `full` - All features enabled
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       MCP Server                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TrackedServer / TrackingLayer                              │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐ │
//! │  │   Intent    │  │  Operation  │  │   Error Taxonomy    │ │
//! │  │  Injection  │  │   Tracker   │  │   + Storm Detect    │ │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘ │
//! ├─────────────────────────────────────────────────────────────┤
//! │                    Telemetry Sinks                           │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐ │
//! │  │   Console   │  │   Memory    │  │  Remote / OTLP      │ │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

mod config;
mod error;
mod init;

pub mod attributes;
pub mod context_injection;
pub mod event;
pub mod performance;
pub mod registry;
pub mod server;
pub mod sink;
pub mod taxonomy;
pub mod tracker;

#[cfg(feature = "tower")]
#[cfg_attr(docsrs, doc(cfg(feature = "tower")))]
pub mod tower;

#[cfg(feature = "prometheus")]
#[cfg_attr(docsrs, doc(cfg(feature = "prometheus")))]
pub mod metrics;

// Re-exports
pub use config::{TrackingConfig, TrackingConfigBuilder};
pub use context_injection::{
    ContextInjectionConfig, ContextInjector, ProcessedArguments, PropertySchema, ToolInputSchema,
};
pub use error::{TelemetryError, TelemetryResult};
pub use event::{MetricsSnapshot, TelemetryEvent, TelemetryEventType};
pub use init::TelemetryGuard;
pub use performance::{PerformanceMonitor, PerformanceThresholds};
pub use registry::MethodRegistry;
pub use server::{
    HandlerRegistry, Instrumentation, TrackedServer, get_context_injector, get_instrumentation,
    get_tracker, track, track_with,
};
pub use sink::{
    CompositeSink, ConsoleSink, MemorySink, RemoteSink, RemoteSinkConfig, TelemetryManager,
    TelemetrySink,
};
pub use taxonomy::{ErrorHandler, ErrorType, McpError};
pub use tracker::{
    MethodError, MethodResult, OperationContext, OperationHook, OperationTracker, SpanRef,
};

// Re-export tracing macros for convenience
pub use tracing::{Instrument, instrument};
pub use tracing::{debug, error, info, trace, warn};
pub use tracing::{debug_span, error_span, info_span, trace_span, warn_span};

/// MCP span attribute keys following OpenTelemetry semantic conventions
pub mod span_attributes {
    /// Operation id, unique per request
    pub const MCP_OPERATION_ID: &str = "mcp.operation.id";
    /// MCP method name (e.g., "tools/call", "resources/read")
    pub const MCP_METHOD: &str = "mcp.method.name";
    /// Operation start time, RFC 3339
    pub const MCP_START_TIME: &str = "mcp.operation.start_time";
    /// Project id from configuration
    pub const MCP_PROJECT_ID: &str = "mcp.project.id";
    /// JSON-RPC request ID
    pub const MCP_REQUEST_ID: &str = "mcp.request.id";
    /// Caller-supplied intent, truncated
    pub const MCP_AI_CONTEXT: &str = "mcp.ai.context";
    /// Length of the untruncated intent in characters
    pub const MCP_AI_CONTEXT_LENGTH: &str = "mcp.ai.context.length";
    /// Configured request timeout in milliseconds
    pub const MCP_REQUEST_TIMEOUT_MS: &str = "mcp.request.timeout_ms";
    /// Whether the operation succeeded
    pub const MCP_SUCCESS: &str = "mcp.success";
    /// Request duration in milliseconds
    pub const MCP_DURATION_MS: &str = "mcp.duration_ms";
    /// Error code if request failed
    pub const MCP_ERROR_CODE: &str = "mcp.error.code";
    /// Error message if request failed
    pub const MCP_ERROR_MESSAGE: &str = "mcp.error.message";
    /// Tool name for tools/call requests
    pub const MCP_TOOL_NAME: &str = "mcp.tool.name";
    /// Resource URI for resources/read requests
    pub const MCP_RESOURCE_URI: &str = "mcp.resource.uri";
    /// Prompt name for prompts/get requests
    pub const MCP_PROMPT_NAME: &str = "mcp.prompt.name";
    /// Number of items returned by a list method
    pub const MCP_RESULT_COUNT: &str = "mcp.result.count";
    /// Set on spans force-ended by tracker shutdown
    pub const MCP_SHUTDOWN: &str = "mcp.shutdown";
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use super::config::{TrackingConfig, TrackingConfigBuilder};
    pub use super::error::{TelemetryError, TelemetryResult};
    pub use super::init::TelemetryGuard;
    pub use super::server::{HandlerRegistry, TrackedServer, get_tracker, track};
    pub use super::sink::{TelemetryManager, TelemetrySink};
    pub use super::span_attributes;
    pub use super::taxonomy::{ErrorType, McpError};
    pub use super::tracker::{MethodResult, OperationHook, OperationTracker};
    pub use tracing::{Instrument, debug, error, info, instrument, trace, warn};

    #[cfg(feature = "tower")]
    pub use super::tower::TrackingLayer;
}
