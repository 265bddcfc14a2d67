//! Tower middleware integration.

#![cfg(feature = "tower")]

use mcp_instrument::tower::TrackingLayer;
use mcp_instrument::{TelemetryEventType, TrackingConfig};
use serde_json::{Value, json};
use std::convert::Infallible;
use tower::{Service, ServiceBuilder, ServiceExt, service_fn};

async fn json_rpc(request: Value) -> Result<Value, Infallible> {
    let response = match request["method"].as_str() {
        Some("tools/list") => json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "result": {"tools": [{"name": "a"}, {"name": "b"}, {"name": "c"}]}
        }),
        Some("tools/call") => json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "result": {"echo": request["params"]["arguments"]}
        }),
        _ => json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "error": {"code": -32601, "message": "Method not found"}
        }),
    };
    Ok(response)
}

#[tokio::test]
async fn test_layer_tracks_each_request() {
    let layer = TrackingLayer::new(TrackingConfig::builder().exclude_method("ping").build());
    let tracker = layer.instrumentation().tracker().clone();
    let mut service = ServiceBuilder::new().layer(layer).service(service_fn(json_rpc));

    let listed = service
        .ready()
        .await
        .unwrap()
        .call(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
        .await
        .unwrap();
    assert_eq!(listed["result"]["tools"].as_array().map(Vec::len), Some(3));

    let echoed = service
        .ready()
        .await
        .unwrap()
        .call(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": {"name": "echo", "arguments": {"text": "hi", "context": "greeting the user"}}
        }))
        .await
        .unwrap();
    assert_eq!(echoed["result"]["echo"], json!({"text": "hi"}));

    let missing = service
        .ready()
        .await
        .unwrap()
        .call(json!({"jsonrpc": "2.0", "id": 3, "method": "sampling/unknown"}))
        .await
        .unwrap();
    assert_eq!(missing["error"]["message"], "Method not found");

    service
        .ready()
        .await
        .unwrap()
        .call(json!({"jsonrpc": "2.0", "id": 4, "method": "ping"}))
        .await
        .unwrap();

    let metrics = tracker.current_metrics();
    assert_eq!(metrics.total_requests, 3);
    assert_eq!(metrics.successful_requests, 2);
    assert_eq!(metrics.failed_requests, 1);

    let ends: Vec<_> = tracker
        .telemetry_events()
        .into_iter()
        .filter(|event| event.event_type == TelemetryEventType::RequestEnd)
        .collect();
    assert_eq!(ends[0].data["resultCount"], 3);
    assert_eq!(ends[1].data["aiContext"], "greeting the user");
    assert_eq!(ends[2].data["requestId"], "3");
}

#[tokio::test]
async fn test_layer_without_request_id_generates_one() {
    let layer = TrackingLayer::default();
    let tracker = layer.instrumentation().tracker().clone();
    let service = ServiceBuilder::new().layer(layer).service(service_fn(json_rpc));

    service
        .oneshot(json!({"jsonrpc": "2.0", "method": "tools/list"}))
        .await
        .unwrap();

    let events = tracker.telemetry_events();
    let request_id = events[0].data["requestId"].as_str().unwrap();
    assert_eq!(request_id.len(), 36);
}
