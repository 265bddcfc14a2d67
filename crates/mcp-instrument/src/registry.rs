//! In-process method registry
//!
//! The smallest [`HandlerRegistry`]: a map from method name to handler with a
//! `dispatch` entry point. Useful for embedding, tests and as a reference for
//! adapting a real server to [`track`](crate::server::track).

use crate::server::{BoxError, HandlerRegistry, McpRequest, MethodDescriptor, RequestExtra, RequestHandler};
use crate::taxonomy::McpError;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tracing::trace;

/// Handlers keyed by method name
#[derive(Default)]
pub struct MethodRegistry {
    handlers: HashMap<String, RequestHandler>,
}

impl fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.methods())
            .finish()
    }
}

impl MethodRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered method names, sorted
    #[must_use]
    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        methods.sort_unstable();
        methods
    }

    /// Whether a handler is registered for `method`
    #[must_use]
    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Route `request` to its handler
    ///
    /// # Errors
    ///
    /// Fails with a method-not-found [`McpError`] for unregistered methods, and
    /// otherwise returns whatever the handler returns.
    pub async fn dispatch(&self, request: McpRequest, extra: RequestExtra) -> Result<Value, BoxError> {
        let Some(handler) = self.handlers.get(&request.method).cloned() else {
            return Err(Box::new(McpError::method_not_found(&request.method)));
        };
        trace!(method = %request.method, "Dispatching request");
        handler(request, extra).await
    }
}

impl HandlerRegistry for MethodRegistry {
    fn set_request_handler(&mut self, descriptor: MethodDescriptor, handler: RequestHandler) {
        self.handlers.insert(descriptor.method_name(), handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::handler_fn;
    use crate::taxonomy::ErrorType;
    use serde_json::json;

    #[tokio::test]
    async fn test_dispatch_routes_by_method() {
        let mut registry = MethodRegistry::new();
        registry.set_request_handler(
            "echo".into(),
            handler_fn(|request, _extra| async move { Ok::<_, BoxError>(request.params.unwrap_or_default()) }),
        );
        registry.set_request_handler(
            json!({"properties": {"method": {"const": "ping"}}}).into(),
            handler_fn(|_request, _extra| async { Ok::<_, BoxError>(json!({})) }),
        );

        assert_eq!(registry.methods(), vec!["echo", "ping"]);
        let result = registry
            .dispatch(McpRequest::new("echo", Some(json!({"a": 1}))), RequestExtra::default())
            .await
            .unwrap();
        assert_eq!(result, json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_unknown_method_is_method_not_found() {
        let registry = MethodRegistry::new();
        let error = registry
            .dispatch(McpRequest::new("nope", None), RequestExtra::default())
            .await
            .unwrap_err();

        let canonical = error.downcast_ref::<McpError>().unwrap();
        assert_eq!(canonical.error_type, ErrorType::MethodNotFound);
        assert!(canonical.message.contains("nope"));
    }
}
