//! Tower middleware for JSON-RPC services
//!
//! [`TrackingLayer`] applies the same operation lifecycle as
//! [`track`](crate::server::track) to any `tower::Service<serde_json::Value>`:
//! intent stripping for `tools/call`, one span and one start/end event pair per
//! request, hooks, and error classification. JSON-RPC error responses are recorded
//! as failures but passed through unchanged.
//!
//! # Example
//!
//! ```rust
//! use mcp_instrument::TrackingConfig;
//! use mcp_instrument::tower::TrackingLayer;
//! use serde_json::{Value, json};
//! use tower::{ServiceBuilder, ServiceExt, service_fn};
//!
//! # tokio_test::block_on(async {
//! let layer = TrackingLayer::new(TrackingConfig::default());
//! let tracker = layer.instrumentation().tracker().clone();
//!
//! let service = ServiceBuilder::new()
//!     .layer(layer)
//!     .service(service_fn(|request: Value| async move {
//!         Ok::<_, std::convert::Infallible>(json!({"jsonrpc": "2.0", "id": request["id"], "result": {}}))
//!     }));
//!
//! let response = service
//!     .oneshot(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
//!     .await
//!     .unwrap();
//! assert_eq!(response["id"], 1);
//! assert_eq!(tracker.current_metrics().total_requests, 1);
//! # });
//! ```

mod layer;
mod service;

pub use layer::TrackingLayer;
pub use service::{TrackingService, TrackingServiceFuture};
