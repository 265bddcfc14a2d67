//! Console sink

use super::TelemetrySink;
use crate::TelemetryResult;
use crate::event::{MetricsSnapshot, TelemetryEvent};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::info;

/// Default number of events a console sink retains
pub const DEFAULT_CONSOLE_CAPACITY: usize = 1_000;

/// Writes one log line per event and keeps a short history for metrics
///
/// When the buffer overflows, the older half is discarded in one step.
#[derive(Debug)]
pub struct ConsoleSink {
    capacity: usize,
    buffer: Mutex<VecDeque<TelemetryEvent>>,
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleSink {
    /// Sink with the default capacity
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CONSOLE_CAPACITY)
    }

    /// Sink retaining at most `capacity` events
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(2),
            buffer: Mutex::new(VecDeque::new()),
        }
    }

    fn describe(event: &TelemetryEvent) -> String {
        let method = event
            .data
            .get("method")
            .and_then(|m| m.as_str())
            .unwrap_or("-");
        match (event.success(), event.duration_ms()) {
            (Some(success), Some(duration)) => format!(
                "[{}] {} {} ({}, {:.1}ms)",
                event.timestamp.format("%H:%M:%S%.3f"),
                event.event_type,
                method,
                if success { "ok" } else { "error" },
                duration
            ),
            _ => format!(
                "[{}] {} {}",
                event.timestamp.format("%H:%M:%S%.3f"),
                event.event_type,
                method
            ),
        }
    }
}

#[async_trait]
impl TelemetrySink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    fn record_event(&self, event: &TelemetryEvent) -> TelemetryResult<()> {
        info!(
            target: "mcp_instrument::console",
            event_type = %event.event_type,
            operation_id = event.operation_id().unwrap_or_default(),
            "{}",
            Self::describe(event)
        );

        let mut buffer = self.buffer.lock();
        buffer.push_back(event.clone());
        if buffer.len() > self.capacity {
            let excess = buffer.len() - self.capacity / 2;
            buffer.drain(..excess);
        }
        Ok(())
    }

    fn metrics(&self) -> Option<MetricsSnapshot> {
        let buffer = self.buffer.lock();
        Some(MetricsSnapshot::from_events(buffer.iter(), Utc::now()))
    }

    fn events(&self) -> Vec<TelemetryEvent> {
        self.buffer.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TelemetryEventType;
    use serde_json::Map;

    #[test]
    fn test_overflow_keeps_recent_half() {
        let sink = ConsoleSink::with_capacity(10);
        for i in 0..11 {
            let event = TelemetryEvent::new(TelemetryEventType::RequestStart, &format!("op-{i}"), Map::new());
            sink.record_event(&event).unwrap();
        }

        let events = sink.events();
        assert_eq!(events.len(), 5);
        assert_eq!(events[0].operation_id(), Some("op-6"));
        assert_eq!(events[4].operation_id(), Some("op-10"));
    }

    #[test]
    fn test_metrics_are_derived() {
        let sink = ConsoleSink::new();
        let mut data = Map::new();
        data.insert("success".into(), true.into());
        data.insert("duration".into(), 5.0.into());
        sink.record_event(&TelemetryEvent::new(TelemetryEventType::RequestEnd, "op", data))
            .unwrap();

        let metrics = sink.metrics().unwrap_or_default();
        assert_eq!(metrics.total_requests, 1);
        assert_eq!(metrics.successful_requests, 1);
    }

    #[test]
    fn test_describe() {
        let mut data = Map::new();
        data.insert("method".into(), "tools/call".into());
        data.insert("success".into(), false.into());
        data.insert("duration".into(), 12.5.into());
        let line = ConsoleSink::describe(&TelemetryEvent::new(TelemetryEventType::RequestEnd, "op", data));
        assert!(line.ends_with("request-end tools/call (error, 12.5ms)"), "{line}");
    }
}
