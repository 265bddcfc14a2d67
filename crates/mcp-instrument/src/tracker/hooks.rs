//! Operation hooks
//!
//! Hooks observe instrumented calls. They run sequentially in registration
//! order, and a failing hook is logged without affecting the request or the
//! remaining hooks.

use super::context::{MethodError, MethodResult, OperationContext};
use crate::error::TelemetryResult;
use async_trait::async_trait;

/// Callbacks run around an instrumented call
///
/// Every callback defaults to doing nothing, so implementors override only what
/// they need.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use mcp_instrument::{OperationContext, OperationHook, TelemetryResult};
///
/// struct AuditHook;
///
/// #[async_trait]
/// impl OperationHook for AuditHook {
///     async fn before_method(&self, context: &OperationContext) -> TelemetryResult<()> {
///         tracing::info!(method = %context.metadata.method, "audit");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait OperationHook: Send + Sync {
    /// Hook name used in logs
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Called after the span opens and before the handler runs
    async fn before_method(&self, _context: &OperationContext) -> TelemetryResult<()> {
        Ok(())
    }

    /// Called after the handler succeeds
    async fn after_method(
        &self,
        _context: &OperationContext,
        _result: &MethodResult,
    ) -> TelemetryResult<()> {
        Ok(())
    }

    /// Called after the handler fails
    async fn on_error(&self, _context: &OperationContext, _error: &MethodError) -> TelemetryResult<()> {
        Ok(())
    }
}
