//! Sink composition and remote export.

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use mcp_instrument::{
    CompositeSink, MemorySink, RemoteSink, RemoteSinkConfig, TelemetryError, TelemetryEvent,
    TelemetryEventType, TelemetrySink,
};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn end_data(success: bool, duration_ms: f64) -> Map<String, Value> {
    match json!({"success": success, "duration": duration_ms}) {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

#[test]
fn test_composite_dedups_and_respects_child_caps() {
    let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let late = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

    // One operation recorded twice, plus one session event.
    let small = Arc::new(MemorySink::new());
    for _ in 0..2 {
        small
            .record_event(&TelemetryEvent::at(early, TelemetryEventType::RequestStart, "op-1", Map::new()))
            .unwrap();
        small
            .record_event(&TelemetryEvent::at(
                early + ChronoDuration::milliseconds(5),
                TelemetryEventType::RequestEnd,
                "op-1",
                end_data(true, 5.0),
            ))
            .unwrap();
    }
    small
        .record_event(&TelemetryEvent::at(
            early + ChronoDuration::seconds(1),
            TelemetryEventType::SessionEnd,
            "session",
            Map::new(),
        ))
        .unwrap();

    let capped = Arc::new(MemorySink::with_capacity(5_000));
    for i in 0..5_200 {
        let event = TelemetryEvent::at(
            late + ChronoDuration::milliseconds(i),
            TelemetryEventType::MetricUpdate,
            &format!("op-{i}"),
            Map::new(),
        );
        capped.record_event(&event).unwrap();
    }

    assert_eq!(small.len(), 5);
    assert_eq!(capped.len(), 5_000);
    assert_eq!(capped.events()[0].operation_id(), Some("op-200"));

    let composite = CompositeSink::new(vec![
        small.clone() as Arc<dyn TelemetrySink>,
        capped.clone() as Arc<dyn TelemetrySink>,
    ]);
    let merged = composite.events();
    assert_eq!(merged.len(), 3 + 5_000);
    assert!(merged.windows(2).all(|pair| pair[0].timestamp <= pair[1].timestamp));
    assert_eq!(merged[0].event_type, TelemetryEventType::RequestStart);
    assert_eq!(merged.last().and_then(TelemetryEvent::operation_id), Some("op-5199"));
}

#[test]
fn test_composite_metrics_sum_counts_and_average_rates() {
    let now = Utc::now();
    let fast = Arc::new(MemorySink::new());
    let slow = Arc::new(MemorySink::new());
    for (sink, duration) in [(&fast, 10.0), (&slow, 30.0)] {
        sink.record_event(&TelemetryEvent::at(now, TelemetryEventType::RequestEnd, "op", end_data(true, duration)))
            .unwrap();
    }
    slow.record_event(&TelemetryEvent::at(now, TelemetryEventType::RequestEnd, "op-2", end_data(false, 50.0)))
        .unwrap();

    let composite = CompositeSink::new(vec![fast as Arc<dyn TelemetrySink>, slow as Arc<dyn TelemetrySink>]);
    let metrics = composite.metrics().unwrap();
    assert_eq!(metrics.total_requests, 3);
    assert_eq!(metrics.failed_requests, 1);
    // Mean of the per-sink means: (10 + 40) / 2
    assert!((metrics.average_duration_ms - 25.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_remote_sink_posts_queued_events() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/events"))
        .and(header("x-api-key", "secret"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = RemoteSinkConfig {
        endpoint: Some(format!("{}/events", server.uri())),
        service_name: "remote-test".into(),
        timeout: Duration::from_secs(5),
        ..RemoteSinkConfig::default()
    };
    config.headers.insert("x-api-key".into(), "secret".into());
    let sink = RemoteSink::new(config).unwrap();

    sink.record_event(&TelemetryEvent::new(TelemetryEventType::RequestStart, "op-1", Map::new()))
        .unwrap();
    sink.record_event(&TelemetryEvent::new(TelemetryEventType::RequestEnd, "op-1", end_data(true, 2.0)))
        .unwrap();
    assert_eq!(sink.pending_count(), 2);

    sink.export_traces().await.unwrap();
    assert_eq!(sink.pending_count(), 0);
    // Nothing queued: no second request
    sink.export_traces().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: Value = requests[0].body_json().unwrap();
    assert_eq!(body["service"], "remote-test");
    assert_eq!(body["events"].as_array().map(Vec::len), Some(2));
    assert_eq!(body["events"][0]["type"], "request-start");
    assert_eq!(body["events"][1]["data"]["operationId"], "op-1");
}

#[tokio::test]
async fn test_remote_sink_surfaces_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let sink = RemoteSink::new(RemoteSinkConfig {
        endpoint: Some(server.uri()),
        ..RemoteSinkConfig::default()
    })
    .unwrap();
    sink.record_event(&TelemetryEvent::new(TelemetryEventType::Error, "op-1", Map::new()))
        .unwrap();

    let result = sink.export_traces().await;
    assert!(matches!(result, Err(TelemetryError::ExportFailed(_))));
}
