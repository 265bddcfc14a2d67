//! Operation tracker
//!
//! The tracker owns one span per in-flight operation, keyed by the operation id
//! generated for its [`OperationContext`], plus a bounded log of the telemetry
//! events those operations produced. Metrics are derived from the log on demand.
//!
//! Nothing here can fail a request: an unavailable backend yields non-recording
//! spans, unknown operation ids are ignored, and hook or sink failures are
//! logged and dropped.
//!
//! ```rust
//! use mcp_instrument::{MethodResult, OperationTracker, TrackingConfig};
//! use std::time::Duration;
//!
//! let tracker = OperationTracker::new(&TrackingConfig::default());
//! let context = tracker.create_operation_context("tools/list", Some("1".into()), None);
//!
//! tracker.start_span("tools/list", &context);
//! tracker.end_span(
//!     &context.operation_id,
//!     &MethodResult::success(serde_json::json!({"tools": []}), Duration::from_millis(3)),
//! );
//!
//! assert_eq!(tracker.current_metrics().total_requests, 1);
//! assert_eq!(tracker.active_span_count(), 0);
//! ```

mod context;
mod hooks;

pub use context::{MethodError, MethodResult, OperationContext, OperationMetadata, SpanRef};
pub use hooks::OperationHook;

use crate::attributes::{to_key_values, to_otel_value, truncate_value};
use crate::config::TrackingConfig;
use crate::event::{MetricsSnapshot, SpanContextInfo, TelemetryEvent, TelemetryEventType};
use crate::sink::TelemetryManager;
use crate::span_attributes::*;
use chrono::Utc;
use opentelemetry::KeyValue;
use opentelemetry::global::{self, BoxedSpan, BoxedTracer};
use opentelemetry::trace::{Span as _, SpanKind, Status, Tracer as _, noop::NoopTracer};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Intent length stored on spans and events
pub const MAX_AI_CONTEXT_LENGTH: usize = 200;

const ELLIPSIS_LENGTH: usize = 3;

/// At most [`MAX_AI_CONTEXT_LENGTH`] characters, ellipsis included
fn truncate_intent(intent: &str) -> String {
    if intent.chars().count() <= MAX_AI_CONTEXT_LENGTH {
        intent.to_string()
    } else {
        truncate_value(intent, MAX_AI_CONTEXT_LENGTH - ELLIPSIS_LENGTH)
    }
}

struct LiveOperation {
    span: BoxedSpan,
    method: String,
    params: Option<Value>,
    request_id: Option<String>,
    ai_context: Option<String>,
    span_context: Option<SpanContextInfo>,
}

/// Tracks spans, events and hooks for instrumented operations
pub struct OperationTracker {
    tracer: BoxedTracer,
    noop_tracer: BoxedTracer,
    tracing_enabled: bool,
    sampling_rate: f64,
    metrics_enabled: bool,
    project_id: Option<String>,
    default_attributes: Map<String, Value>,
    request_timeout: Option<Duration>,
    max_events: usize,
    live: Mutex<HashMap<String, LiveOperation>>,
    events: Mutex<VecDeque<TelemetryEvent>>,
    hooks: RwLock<Vec<Arc<dyn OperationHook>>>,
    manager: Option<Arc<TelemetryManager>>,
}

impl fmt::Debug for OperationTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationTracker")
            .field("tracing_enabled", &self.tracing_enabled)
            .field("sampling_rate", &self.sampling_rate)
            .field("metrics_enabled", &self.metrics_enabled)
            .field("project_id", &self.project_id)
            .field("active_spans", &self.active_span_count())
            .field("events", &self.events.lock().len())
            .field("hooks", &self.hooks.read().len())
            .field("manager", &self.manager.is_some())
            .finish()
    }
}

impl OperationTracker {
    /// Tracker using the globally registered tracer provider
    ///
    /// Without a registered provider every span is a no-op, but events and
    /// metrics are still recorded.
    #[must_use]
    pub fn new(config: &TrackingConfig) -> Self {
        Self::with_tracer(config, global::tracer(config.service_name.clone()))
    }

    /// Tracker using an explicit tracer
    #[must_use]
    pub fn with_tracer(config: &TrackingConfig, tracer: BoxedTracer) -> Self {
        Self {
            tracer,
            noop_tracer: BoxedTracer::new(Box::new(NoopTracer::new())),
            tracing_enabled: config.tracing_enabled,
            sampling_rate: config.sampling_rate,
            metrics_enabled: config.metrics_enabled,
            project_id: config.project_id.clone(),
            default_attributes: config.default_attributes.clone(),
            request_timeout: config.request_timeout,
            max_events: config.max_events.max(1),
            live: Mutex::new(HashMap::new()),
            events: Mutex::new(VecDeque::new()),
            hooks: RwLock::new(Vec::new()),
            manager: None,
        }
    }

    /// Forward every recorded event to `manager`
    #[must_use]
    pub fn with_manager(mut self, manager: Arc<TelemetryManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    /// The telemetry manager events are forwarded to
    #[must_use]
    pub fn manager(&self) -> Option<&Arc<TelemetryManager>> {
        self.manager.as_ref()
    }

    /// Create the correlation record for a new request
    #[must_use]
    pub fn create_operation_context(
        &self,
        method: &str,
        request_id: Option<String>,
        params: Option<Value>,
    ) -> OperationContext {
        OperationContext::new(method, request_id, params)
    }

    fn should_sample(&self) -> bool {
        self.tracing_enabled && (self.sampling_rate >= 1.0 || fastrand::f64() < self.sampling_rate)
    }

    /// Open a span for `context` and record a request-start event
    pub fn start_span(&self, method: &str, context: &OperationContext) -> SpanRef {
        let tracer = if self.should_sample() {
            &self.tracer
        } else {
            &self.noop_tracer
        };

        let mut attributes = vec![
            KeyValue::new(MCP_OPERATION_ID, context.operation_id.clone()),
            KeyValue::new(MCP_METHOD, method.to_string()),
            KeyValue::new(MCP_START_TIME, context.started_at.to_rfc3339()),
        ];
        if let Some(ref project_id) = self.project_id {
            attributes.push(KeyValue::new(MCP_PROJECT_ID, project_id.clone()));
        }
        if let Some(ref request_id) = context.metadata.request_id {
            attributes.push(KeyValue::new(MCP_REQUEST_ID, request_id.clone()));
        }
        if let Some(ref intent) = context.metadata.ai_context {
            attributes.push(KeyValue::new(
                MCP_AI_CONTEXT,
                truncate_intent(intent),
            ));
            attributes.push(KeyValue::new(
                MCP_AI_CONTEXT_LENGTH,
                intent.chars().count() as i64,
            ));
        }
        if let Some(timeout) = self.request_timeout {
            attributes.push(KeyValue::new(
                MCP_REQUEST_TIMEOUT_MS,
                timeout.as_millis() as i64,
            ));
        }
        attributes.extend(to_key_values(&self.default_attributes));

        let span = tracer
            .span_builder(method.to_string())
            .with_kind(SpanKind::Server)
            .with_attributes(attributes)
            .start(tracer);

        let span_ref = span_ref(&context.operation_id, &span);
        let span_context = span_ref.recording.then(|| SpanContextInfo {
            trace_id: span_ref.trace_id.clone(),
            span_id: span_ref.span_id.clone(),
        });

        let mut data = Map::new();
        data.insert("method".into(), Value::from(method));
        data.insert("startTime".into(), Value::from(context.started_at.to_rfc3339()));
        if let Some(ref request_id) = context.metadata.request_id {
            data.insert("requestId".into(), Value::from(request_id.as_str()));
        }
        if let Some(ref intent) = context.metadata.ai_context {
            data.insert(
                "aiContext".into(),
                Value::from(truncate_intent(intent)),
            );
        }

        let live = LiveOperation {
            span,
            method: method.to_string(),
            params: context.metadata.params.clone(),
            request_id: context.metadata.request_id.clone(),
            ai_context: context
                .metadata
                .ai_context
                .as_deref()
                .map(truncate_intent),
            span_context: span_context.clone(),
        };

        let (replaced, active) = {
            let mut spans = self.live.lock();
            let replaced = spans.insert(context.operation_id.clone(), live);
            (replaced, spans.len())
        };
        if let Some(mut stale) = replaced {
            warn!(operation_id = %context.operation_id, "Span started twice for one operation");
            stale.span.set_status(Status::error("superseded by a newer span"));
            stale.span.end();
        }

        #[cfg(feature = "prometheus")]
        if self.metrics_enabled {
            crate::metrics::set_active_operations(active);
        }

        debug!(
            operation_id = %context.operation_id,
            method,
            recording = span_ref.recording,
            active_spans = active,
            "Operation span started"
        );

        self.record(
            TelemetryEvent::new(TelemetryEventType::RequestStart, &context.operation_id, data)
                .with_span_context(span_context),
        );

        span_ref
    }

    /// Attach extra attributes to a live span; unknown ids are ignored
    pub fn set_span_attributes(&self, operation_id: &str, attributes: &Map<String, Value>) {
        let key_values = to_key_values(attributes);
        let mut spans = self.live.lock();
        if let Some(live) = spans.get_mut(operation_id) {
            live.span.set_attributes(key_values);
        }
    }

    /// Close the span for `operation_id` and record a request-end event
    ///
    /// The span is removed before it is ended, so a second call for the same id
    /// is a silent no-op.
    pub fn end_span(&self, operation_id: &str, result: &MethodResult) {
        let (removed, active) = {
            let mut spans = self.live.lock();
            let removed = spans.remove(operation_id);
            (removed, spans.len())
        };
        let Some(mut live) = removed else {
            debug!(operation_id, "Ignoring end for unknown operation");
            return;
        };

        let duration_ms = result.duration_ms();
        live.span.set_attribute(KeyValue::new(MCP_METHOD, live.method.clone()));
        live.span.set_attribute(KeyValue::new(MCP_SUCCESS, result.success));
        live.span.set_attribute(KeyValue::new(MCP_DURATION_MS, duration_ms));

        let mut data = Map::new();
        data.insert("method".into(), Value::from(live.method.as_str()));
        data.insert("success".into(), Value::from(result.success));
        data.insert("duration".into(), Value::from(duration_ms));
        data.insert("endTime".into(), Value::from(result.timestamp.to_rfc3339()));
        if let Some(ref request_id) = live.request_id {
            data.insert("requestId".into(), Value::from(request_id.as_str()));
        }
        if let Some(intent) = live.ai_context.take() {
            data.insert("aiContext".into(), Value::from(intent));
        }

        if result.success {
            live.span.set_status(Status::Ok);
        } else {
            let (code, message) = result
                .error
                .as_ref()
                .map_or(("unknown", "operation failed"), |e| {
                    (e.code.as_str(), e.message.as_str())
                });
            live.span.set_status(Status::error(message.to_string()));
            live.span.set_attribute(KeyValue::new(MCP_ERROR_CODE, code.to_string()));
            live.span.set_attribute(KeyValue::new(MCP_ERROR_MESSAGE, message.to_string()));
            if let Some(ref error) = result.error
                && let Ok(value) = serde_json::to_value(error)
            {
                data.insert("error".into(), value);
            }
        }

        for (attribute, event_key, value) in
            enrichment(&live.method, live.params.as_ref(), result.data.as_ref())
        {
            if let Some(otel_value) = to_otel_value(&value) {
                live.span.set_attribute(KeyValue::new(attribute, otel_value));
            }
            data.insert(event_key.into(), value);
        }

        live.span.end();

        #[cfg(feature = "prometheus")]
        if self.metrics_enabled {
            let tool = data.get("toolName").and_then(Value::as_str);
            crate::metrics::record_operation(&live.method, tool, result.success, result.duration);
            if let Some(ref error) = result.error {
                crate::metrics::record_error(&error.code, &live.method);
            }
            crate::metrics::set_active_operations(active);
        }

        debug!(
            operation_id,
            method = %live.method,
            success = result.success,
            duration_ms,
            active_spans = active,
            "Operation span ended"
        );

        self.record(
            TelemetryEvent::new(TelemetryEventType::RequestEnd, operation_id, data)
                .with_span_context(live.span_context),
        );
    }

    /// Register a hook; hooks run in registration order
    pub fn add_hook(&self, hook: Arc<dyn OperationHook>) {
        debug!(hook = hook.name(), "Operation hook added");
        self.hooks.write().push(hook);
    }

    /// Remove a previously added hook by identity
    ///
    /// Returns whether the hook was registered.
    pub fn remove_hook(&self, hook: &Arc<dyn OperationHook>) -> bool {
        let mut hooks = self.hooks.write();
        let before = hooks.len();
        hooks.retain(|registered| !Arc::ptr_eq(registered, hook));
        before != hooks.len()
    }

    /// Number of registered hooks
    #[must_use]
    pub fn hook_count(&self) -> usize {
        self.hooks.read().len()
    }

    fn hooks_snapshot(&self) -> Vec<Arc<dyn OperationHook>> {
        self.hooks.read().clone()
    }

    /// Run every `before_method` hook
    pub async fn execute_before_hooks(&self, context: &OperationContext) {
        for hook in self.hooks_snapshot() {
            if let Err(e) = hook.before_method(context).await {
                warn!(
                    hook = hook.name(),
                    operation_id = %context.operation_id,
                    error = %e,
                    "before_method hook failed"
                );
            }
        }
    }

    /// Run every `after_method` hook
    pub async fn execute_after_hooks(&self, context: &OperationContext, result: &MethodResult) {
        for hook in self.hooks_snapshot() {
            if let Err(e) = hook.after_method(context, result).await {
                warn!(
                    hook = hook.name(),
                    operation_id = %context.operation_id,
                    error = %e,
                    "after_method hook failed"
                );
            }
        }
    }

    /// Run every `on_error` hook
    pub async fn execute_error_hooks(&self, context: &OperationContext, error: &MethodError) {
        for hook in self.hooks_snapshot() {
            if let Err(e) = hook.on_error(context, error).await {
                warn!(
                    hook = hook.name(),
                    operation_id = %context.operation_id,
                    error = %e,
                    "on_error hook failed"
                );
            }
        }
    }

    /// Append a custom event (session, metric or error reports)
    pub fn record_event(
        &self,
        event_type: TelemetryEventType,
        operation_id: &str,
        data: Map<String, Value>,
    ) {
        self.record(TelemetryEvent::new(event_type, operation_id, data));
    }

    fn record(&self, event: TelemetryEvent) {
        {
            let mut events = self.events.lock();
            events.push_back(event.clone());
            while events.len() > self.max_events {
                events.pop_front();
            }
        }

        if let Some(ref manager) = self.manager {
            manager.record_event(&event);
        }
    }

    /// Metrics derived from the current event log
    #[must_use]
    pub fn current_metrics(&self) -> MetricsSnapshot {
        let mut snapshot = {
            let events = self.events.lock();
            MetricsSnapshot::from_events(events.iter(), Utc::now())
        };
        snapshot.active_operations = self.active_span_count() as u64;
        snapshot
    }

    /// Copy of the event log, oldest first
    #[must_use]
    pub fn telemetry_events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Number of spans currently open
    #[must_use]
    pub fn active_span_count(&self) -> usize {
        self.live.lock().len()
    }

    /// End every open span with an error status and clear the event log
    ///
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        let drained: Vec<(String, LiveOperation)> = self.live.lock().drain().collect();
        let terminated = drained.len();

        for (operation_id, mut live) in drained {
            live.span
                .set_status(Status::error("operation terminated by tracker shutdown"));
            live.span.set_attribute(KeyValue::new(MCP_SHUTDOWN, true));
            live.span.end();
            debug!(operation_id = %operation_id, method = %live.method, "Span terminated by shutdown");
        }

        self.events.lock().clear();

        if terminated > 0 {
            info!(terminated, "Operation tracker shut down with open spans");
        }
    }
}

fn span_ref(operation_id: &str, span: &BoxedSpan) -> SpanRef {
    let span_context = span.span_context();
    SpanRef {
        operation_id: operation_id.to_string(),
        trace_id: span_context.trace_id().to_string(),
        span_id: span_context.span_id().to_string(),
        recording: span.is_recording() && span_context.is_valid(),
    }
}

/// Method-specific attributes: `(span attribute, event key, value)`
fn enrichment(
    method: &str,
    params: Option<&Value>,
    data: Option<&Value>,
) -> Vec<(&'static str, &'static str, Value)> {
    let param = |key: &str| {
        params
            .and_then(|p| p.get(key))
            .and_then(Value::as_str)
            .map(Value::from)
    };
    // Handlers return the bare result; tower services return the JSON-RPC envelope.
    let count = |key: &str| {
        data.and_then(|d| d.get(key).or_else(|| d.get("result")?.get(key)))
            .and_then(Value::as_array)
            .map(|items| Value::from(items.len()))
    };

    let entry = match method {
        "tools/call" => param("name").map(|v| (MCP_TOOL_NAME, "toolName", v)),
        "resources/read" => param("uri").map(|v| (MCP_RESOURCE_URI, "resourceUri", v)),
        "prompts/get" => param("name").map(|v| (MCP_PROMPT_NAME, "promptName", v)),
        "tools/list" => count("tools").map(|v| (MCP_RESULT_COUNT, "resultCount", v)),
        "resources/list" => count("resources").map(|v| (MCP_RESULT_COUNT, "resultCount", v)),
        "prompts/list" => count("prompts").map(|v| (MCP_RESULT_COUNT, "resultCount", v)),
        _ => None,
    };

    entry.into_iter().collect()
}
