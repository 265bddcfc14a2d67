//! Server-wrapping facade
//!
//! [`track`] moves a protocol server into a [`TrackedServer`]. Every handler
//! registered through the wrapper afterwards is replaced by one that extracts the
//! caller's intent, strips it from the tool arguments, opens a span, runs the hooks
//! and records the outcome. Results and errors reach the caller exactly as the
//! original handler produced them.
//!
//! ```rust
//! use mcp_instrument::server::{BoxError, HandlerRegistry, McpRequest, RequestExtra, handler_fn, track};
//! use mcp_instrument::{MethodRegistry, TrackingConfig, get_tracker};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let mut server = track(MethodRegistry::new(), TrackingConfig::default());
//! server.set_request_handler(
//!     "ping".into(),
//!     handler_fn(|_request, _extra| async { Ok::<_, BoxError>(json!({})) }),
//! );
//!
//! let result = server
//!     .dispatch(McpRequest::new("ping", None), RequestExtra::default())
//!     .await;
//! assert!(result.is_ok());
//!
//! let tracker = get_tracker(&server).expect("tracked server");
//! assert_eq!(tracker.current_metrics().total_requests, 1);
//! # });
//! ```

use crate::attributes::request_span;
use crate::config::TrackingConfig;
use crate::context_injection::ContextInjector;
use crate::sink::TelemetryManager;
use crate::taxonomy::{ErrorHandler, McpError};
use crate::tracker::{MethodError, MethodResult, OperationContext, OperationTracker};
use futures::FutureExt;
use futures::future::BoxFuture;
use opentelemetry::global::BoxedTracer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, debug};
use uuid::Uuid;

/// Error type returned by request handlers
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Type-erased request handler
pub type RequestHandler =
    Arc<dyn Fn(McpRequest, RequestExtra) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>;

/// Adapt an async closure into a [`RequestHandler`]
pub fn handler_fn<F, Fut>(handler: F) -> RequestHandler
where
    F: Fn(McpRequest, RequestExtra) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
{
    Arc::new(move |request, extra| handler(request, extra).boxed())
}

/// An inbound JSON-RPC request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpRequest {
    /// Request id; absent for notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Method name
    pub method: String,
    /// Call parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl McpRequest {
    /// Request without an id
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: None,
            method: method.into(),
            params,
        }
    }

    /// Set the request id
    #[must_use]
    pub fn with_id(mut self, id: impl Into<Value>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// The id as a string, if it is a string or a number
    #[must_use]
    pub fn id_string(&self) -> Option<String> {
        match self.id.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Transport-level data accompanying a request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestExtra {
    /// Request id assigned by the transport
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Session the request belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Anything else the transport attaches
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

/// How a handler registration names its method
#[derive(Debug, Clone, PartialEq)]
pub enum MethodDescriptor {
    /// A plain method name
    Name(String),
    /// A request schema the method name is read from
    Schema(Value),
}

impl MethodDescriptor {
    /// The method this descriptor registers, or `"unknown"`
    ///
    /// Schemas are searched at `method`, `properties.method.const` and
    /// `shape.method.value`, in that order.
    #[must_use]
    pub fn method_name(&self) -> String {
        match self {
            Self::Name(name) => name.clone(),
            Self::Schema(schema) => ["/method", "/properties/method/const", "/shape/method/value"]
                .iter()
                .find_map(|pointer| schema.pointer(pointer).and_then(Value::as_str))
                .unwrap_or("unknown")
                .to_string(),
        }
    }
}

impl From<&str> for MethodDescriptor {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for MethodDescriptor {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<Value> for MethodDescriptor {
    fn from(schema: Value) -> Self {
        Self::Schema(schema)
    }
}

/// A protocol server that accepts request handler registrations
pub trait HandlerRegistry: Send + Sync {
    /// Register `handler` for the method named by `descriptor`
    fn set_request_handler(&mut self, descriptor: MethodDescriptor, handler: RequestHandler);

    /// Instrumentation bound to this server, if it is tracked
    fn instrumentation(&self) -> Option<&Arc<Instrumentation>> {
        None
    }
}

/// Everything one tracked server uses to observe its requests
pub struct Instrumentation {
    config: TrackingConfig,
    tracker: Arc<OperationTracker>,
    context_injector: Arc<ContextInjector>,
    error_handler: Arc<ErrorHandler>,
    manager: Arc<TelemetryManager>,
}

impl fmt::Debug for Instrumentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrumentation")
            .field("service_name", &self.config.service_name)
            .field("tracker", &self.tracker)
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

impl Instrumentation {
    /// Instrumentation using the global tracer provider
    #[must_use]
    pub fn new(config: TrackingConfig) -> Self {
        let manager = Arc::new(TelemetryManager::from_config(&config));
        let tracer = opentelemetry::global::tracer(config.service_name.clone());
        Self::with_parts(config, tracer, manager)
    }

    /// Instrumentation with an explicit tracer and telemetry manager
    #[must_use]
    pub fn with_parts(config: TrackingConfig, tracer: BoxedTracer, manager: Arc<TelemetryManager>) -> Self {
        let tracker = OperationTracker::with_tracer(&config, tracer).with_manager(Arc::clone(&manager));
        Self {
            context_injector: Arc::new(ContextInjector::new(config.context_injection.clone())),
            error_handler: Arc::new(ErrorHandler::new()),
            tracker: Arc::new(tracker),
            manager,
            config,
        }
    }

    /// Configuration this instrumentation was built from
    #[must_use]
    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    /// Operation tracker
    #[must_use]
    pub fn tracker(&self) -> &Arc<OperationTracker> {
        &self.tracker
    }

    /// Context injector
    #[must_use]
    pub fn context_injector(&self) -> &Arc<ContextInjector> {
        &self.context_injector
    }

    /// Error handler
    #[must_use]
    pub fn error_handler(&self) -> &Arc<ErrorHandler> {
        &self.error_handler
    }

    /// Telemetry manager events are forwarded to
    #[must_use]
    pub fn manager(&self) -> &Arc<TelemetryManager> {
        &self.manager
    }

    /// Wrap `handler` so each invocation is observed as `method`
    #[must_use]
    pub fn wrap(self: &Arc<Self>, method: impl Into<String>, handler: RequestHandler) -> RequestHandler {
        let instrumentation = Arc::clone(self);
        let method: Arc<str> = Arc::from(method.into());
        Arc::new(move |request, extra| {
            let instrumentation = Arc::clone(&instrumentation);
            let handler = Arc::clone(&handler);
            let method = Arc::clone(&method);
            async move { instrumentation.observe(&method, request, extra, handler).await }.boxed()
        })
    }

    /// Run `handler` for one request, recording the operation around it
    ///
    /// # Errors
    ///
    /// Returns the handler's error value unchanged.
    pub async fn observe(
        &self,
        method: &str,
        mut request: McpRequest,
        extra: RequestExtra,
        handler: RequestHandler,
    ) -> Result<Value, BoxError> {
        let request_id = request
            .id_string()
            .or_else(|| extra.request_id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let original_params = request.params.clone();
        let intent = self.strip_intent(method, request.params.as_mut());

        self.run_operation(
            method,
            request_id,
            original_params,
            intent,
            handler(request, extra),
            |outcome| {
                outcome
                    .as_ref()
                    .err()
                    .map(|error| self.error_handler.normalize(&**error))
            },
        )
        .await
    }

    /// Operation lifecycle shared by the facade and the tower service
    ///
    /// `failure_of` decides whether an outcome is a failure and how it is
    /// classified; the outcome itself is returned untouched.
    pub(crate) async fn run_operation<E, Fut, C>(
        &self,
        method: &str,
        request_id: String,
        params: Option<Value>,
        intent: Option<String>,
        invoke: Fut,
        failure_of: C,
    ) -> Result<Value, E>
    where
        Fut: Future<Output = Result<Value, E>>,
        C: FnOnce(&Result<Value, E>) -> Option<McpError>,
    {
        let mut context = self
            .tracker
            .create_operation_context(method, Some(request_id), params);
        if let Some(intent) = intent {
            context = context.with_ai_context(intent);
        }

        self.tracker.start_span(method, &context);
        let mut guard = OperationGuard::new(Arc::clone(&self.tracker), &context);
        self.tracker.execute_before_hooks(&context).await;

        let outcome = invoke.instrument(request_span(&context)).await;
        let duration = context.elapsed();
        let failure = failure_of(&outcome);
        guard.disarm();

        match (outcome, failure) {
            (Ok(data), None) => {
                let result = MethodResult::success(data, duration);
                self.tracker.end_span(&context.operation_id, &result);
                self.tracker.execute_after_hooks(&context, &result).await;
                Ok(result.data.unwrap_or(Value::Null))
            }
            (outcome, failure) => {
                let error = failure.unwrap_or_else(|| McpError::internal("operation failed"));
                let method_error = MethodError::from(error);
                self.tracker.end_span(
                    &context.operation_id,
                    &MethodResult::failure(method_error.clone(), duration),
                );
                self.tracker.execute_error_hooks(&context, &method_error).await;
                outcome
            }
        }
    }

    /// For `tools/call`, replace the arguments with their cleaned form and return the intent
    pub(crate) fn strip_intent(&self, method: &str, params: Option<&mut Value>) -> Option<String> {
        if method != "tools/call" {
            return None;
        }
        let params = params?.as_object_mut()?;
        let tool_name = params
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let arguments = params.get("arguments")?;

        let processed = self
            .context_injector
            .process_tool_arguments(&tool_name, arguments);
        params.insert("arguments".into(), processed.cleaned_args);
        processed.context
    }
}

/// Ends the operation's span as cancelled if the request future is dropped
/// before the handler returns
struct OperationGuard {
    tracker: Arc<OperationTracker>,
    operation_id: String,
    start_time: Instant,
    armed: bool,
}

impl OperationGuard {
    fn new(tracker: Arc<OperationTracker>, context: &OperationContext) -> Self {
        Self {
            tracker,
            operation_id: context.operation_id.clone(),
            start_time: context.start_time,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        debug!(operation_id = %self.operation_id, "Request dropped before completion");
        self.tracker.end_span(
            &self.operation_id,
            &MethodResult::failure(
                McpError::cancelled("request dropped before completion"),
                self.start_time.elapsed(),
            ),
        );
    }
}

/// A server whose handler registrations are instrumented
///
/// Dereferences to the wrapped server, so its own API stays available.
pub struct TrackedServer<S> {
    inner: S,
    instrumentation: Arc<Instrumentation>,
}

impl<S: fmt::Debug> fmt::Debug for TrackedServer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedServer")
            .field("inner", &self.inner)
            .field("instrumentation", &self.instrumentation)
            .finish()
    }
}

impl<S> TrackedServer<S> {
    /// Give back the wrapped server
    ///
    /// Handlers registered while tracked stay instrumented.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S> Deref for TrackedServer<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.inner
    }
}

impl<S: HandlerRegistry> HandlerRegistry for TrackedServer<S> {
    fn set_request_handler(&mut self, descriptor: MethodDescriptor, handler: RequestHandler) {
        let method = descriptor.method_name();
        if !self.instrumentation.config().should_instrument(&method) {
            debug!(method = %method, "Registering excluded method without instrumentation");
            self.inner.set_request_handler(descriptor, handler);
            return;
        }

        debug!(method = %method, "Registering instrumented handler");
        let wrapped = self.instrumentation.wrap(method, handler);
        self.inner.set_request_handler(descriptor, wrapped);
    }

    fn instrumentation(&self) -> Option<&Arc<Instrumentation>> {
        Some(&self.instrumentation)
    }
}

/// Instrument `server` with a fresh [`Instrumentation`] built from `config`
pub fn track<S: HandlerRegistry>(server: S, config: TrackingConfig) -> TrackedServer<S> {
    track_with(server, Arc::new(Instrumentation::new(config)))
}

/// Instrument `server` with existing instrumentation
pub fn track_with<S: HandlerRegistry>(server: S, instrumentation: Arc<Instrumentation>) -> TrackedServer<S> {
    debug!(
        service = %instrumentation.config().service_name,
        "Server tracking enabled"
    );
    TrackedServer {
        inner: server,
        instrumentation,
    }
}

/// The instrumentation bound to a tracked server
#[must_use]
pub fn get_instrumentation<S: HandlerRegistry + ?Sized>(server: &S) -> Option<Arc<Instrumentation>> {
    server.instrumentation().cloned()
}

/// The operation tracker bound to a tracked server
#[must_use]
pub fn get_tracker<S: HandlerRegistry + ?Sized>(server: &S) -> Option<Arc<OperationTracker>> {
    server.instrumentation().map(|i| Arc::clone(i.tracker()))
}

/// The context injector bound to a tracked server
#[must_use]
pub fn get_context_injector<S: HandlerRegistry + ?Sized>(server: &S) -> Option<Arc<ContextInjector>> {
    server
        .instrumentation()
        .map(|i| Arc::clone(i.context_injector()))
}
