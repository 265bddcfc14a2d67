//! Tower Layer implementation for operation tracking

use super::TrackingService;
use crate::TrackingConfig;
use crate::server::Instrumentation;
use std::sync::Arc;
use tower::Layer;

/// Tower Layer that tracks every JSON-RPC request passing through it
///
/// Services produced by one layer share its [`Instrumentation`], so metrics
/// and events accumulate across clones.
///
/// ```rust,ignore
/// use tower::ServiceBuilder;
/// use mcp_instrument::{TrackingConfig, tower::TrackingLayer};
///
/// let config = TrackingConfig::builder()
///     .service_name("my-mcp-server")
///     .exclude_method("ping")
///     .build();
///
/// let service = ServiceBuilder::new()
///     .layer(TrackingLayer::new(config))
///     .service(inner_service);
/// ```
#[derive(Debug, Clone)]
pub struct TrackingLayer {
    instrumentation: Arc<Instrumentation>,
}

impl TrackingLayer {
    /// Layer with fresh instrumentation built from `config`
    #[must_use]
    pub fn new(config: TrackingConfig) -> Self {
        Self::with_instrumentation(Arc::new(Instrumentation::new(config)))
    }

    /// Layer sharing existing instrumentation, e.g. that of a tracked server
    #[must_use]
    pub fn with_instrumentation(instrumentation: Arc<Instrumentation>) -> Self {
        Self { instrumentation }
    }

    /// Instrumentation used by wrapped services
    #[must_use]
    pub fn instrumentation(&self) -> &Arc<Instrumentation> {
        &self.instrumentation
    }
}

impl Default for TrackingLayer {
    fn default() -> Self {
        Self::new(TrackingConfig::default())
    }
}

impl<S> Layer<S> for TrackingLayer {
    type Service = TrackingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TrackingService::new(inner, Arc::clone(&self.instrumentation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_shares_instrumentation() {
        let layer = TrackingLayer::new(TrackingConfig::builder().service_name("svc").build());
        assert_eq!(layer.instrumentation().config().service_name, "svc");

        let a = layer.layer(());
        let b = layer.layer(());
        assert!(Arc::ptr_eq(a.instrumentation(), b.instrumentation()));
    }
}
