//! Prometheus metrics for tracked operations
//!
//! The tracker records these on every completed operation when
//! `metrics_enabled` is set. Without an installed recorder the calls are no-ops.
//!
//! ```rust,ignore
//! use mcp_instrument::metrics::{init_metrics, record_operation};
//! use std::time::Duration;
//!
//! init_metrics();
//! record_operation("tools/call", Some("search"), true, Duration::from_millis(15));
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::Once;
use std::time::Duration;

static INIT: Once = Once::new();

/// Register metric descriptions; safe to call repeatedly
pub fn init_metrics() {
    INIT.call_once(|| {
        describe_counter!(
            "mcp_operations_total",
            "Total number of tracked MCP operations"
        );
        describe_histogram!(
            "mcp_operation_duration_seconds",
            "Duration of tracked MCP operations in seconds"
        );
        describe_gauge!("mcp_active_operations", "Number of operations in flight");
        describe_counter!("mcp_tool_calls_total", "Total number of tool calls");
        describe_histogram!(
            "mcp_tool_duration_seconds",
            "Duration of tool execution in seconds"
        );
        describe_counter!(
            "mcp_errors_total",
            "Total number of failed operations by error code"
        );
        describe_counter!(
            "mcp_error_storms_total",
            "Number of detected error storms by error type"
        );
    });
}

fn status(success: bool) -> &'static str {
    if success { "success" } else { "error" }
}

/// Record one completed operation
pub fn record_operation(method: &str, tool: Option<&str>, success: bool, duration: Duration) {
    let seconds = duration.as_secs_f64();
    counter!(
        "mcp_operations_total",
        "method" => method.to_string(),
        "status" => status(success)
    )
    .increment(1);
    histogram!(
        "mcp_operation_duration_seconds",
        "method" => method.to_string()
    )
    .record(seconds);

    if let Some(tool) = tool {
        counter!(
            "mcp_tool_calls_total",
            "tool" => tool.to_string(),
            "status" => status(success)
        )
        .increment(1);
        histogram!(
            "mcp_tool_duration_seconds",
            "tool" => tool.to_string()
        )
        .record(seconds);
    }
}

/// Record a failed operation by error code
pub fn record_error(code: &str, method: &str) {
    counter!(
        "mcp_errors_total",
        "code" => code.to_string(),
        "method" => method.to_string()
    )
    .increment(1);
}

/// Record a detected error storm
pub fn record_error_storm(error_type: &str) {
    counter!(
        "mcp_error_storms_total",
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Update the in-flight operation gauge
pub fn set_active_operations(count: usize) {
    gauge!("mcp_active_operations").set(count as f64);
}
