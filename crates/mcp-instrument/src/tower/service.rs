//! Tower Service implementation for operation tracking

use crate::server::Instrumentation;
use crate::taxonomy::McpError;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::debug;
use uuid::Uuid;

/// Tower Service that tracks each JSON-RPC request as one operation
#[derive(Debug, Clone)]
pub struct TrackingService<S> {
    inner: S,
    instrumentation: Arc<Instrumentation>,
}

impl<S> TrackingService<S> {
    /// Wrap `inner`
    pub fn new(inner: S, instrumentation: Arc<Instrumentation>) -> Self {
        Self {
            inner,
            instrumentation,
        }
    }

    /// Get a reference to the inner service
    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Get a mutable reference to the inner service
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Instrumentation this service records into
    #[must_use]
    pub fn instrumentation(&self) -> &Arc<Instrumentation> {
        &self.instrumentation
    }
}

/// Future type for tracking service responses
pub type TrackingServiceFuture<T, E> = BoxFuture<'static, Result<T, E>>;

impl<S> Service<Value> for TrackingService<S>
where
    S: Service<Value, Response = Value> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: std::fmt::Display + Send,
{
    type Response = Value;
    type Error = S::Error;
    type Future = TrackingServiceFuture<Value, S::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Value) -> Self::Future {
        // Drive the clone that was polled ready; leave a fresh one behind.
        let inner = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, inner);

        let method = req
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        let instrumentation = Arc::clone(&self.instrumentation);
        if !instrumentation.config().should_instrument(&method) {
            debug!(method = %method, "Passing excluded method through");
            return Box::pin(async move { inner.call(req).await });
        }

        let request_id = match req.get("id") {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) => s.clone(),
            _ => Uuid::new_v4().to_string(),
        };
        let original_params = req.get("params").cloned();
        let intent = instrumentation.strip_intent(&method, req.get_mut("params"));

        Box::pin(async move {
            let error_handler = Arc::clone(instrumentation.error_handler());
            instrumentation
                .run_operation(
                    &method,
                    request_id,
                    original_params,
                    intent,
                    inner.call(req),
                    |outcome| match outcome {
                        Ok(response) => response.get("error").map(|error| {
                            let canonical = McpError::from_jsonrpc(error);
                            error_handler.record(&canonical);
                            canonical
                        }),
                        Err(e) => Some(error_handler.normalize_message(&e.to_string())),
                    },
                )
                .await
        })
    }
}
