//! Fan-out sink

use super::{TelemetrySink, aggregate_metrics, merge_events};
use crate::TelemetryResult;
use crate::event::{MetricsSnapshot, TelemetryEvent};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Forwards every event to a set of child sinks
///
/// Child failures are logged and never surface to the caller of
/// [`record_event`](TelemetrySink::record_event).
#[derive(Default)]
pub struct CompositeSink {
    sinks: RwLock<Vec<Arc<dyn TelemetrySink>>>,
}

impl fmt::Debug for CompositeSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.sinks.read().iter().map(|s| s.name().to_string()).collect();
        f.debug_struct("CompositeSink").field("sinks", &names).finish()
    }
}

impl CompositeSink {
    /// Composite over `sinks`
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn TelemetrySink>>) -> Self {
        Self {
            sinks: RwLock::new(sinks),
        }
    }

    /// Attach another child
    pub fn add(&self, sink: Arc<dyn TelemetrySink>) {
        self.sinks.write().push(sink);
    }

    /// Number of children
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.read().len()
    }

    /// Whether there are no children
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn TelemetrySink>> {
        self.sinks.read().clone()
    }
}

#[async_trait]
impl TelemetrySink for CompositeSink {
    fn name(&self) -> &str {
        "composite"
    }

    fn record_event(&self, event: &TelemetryEvent) -> TelemetryResult<()> {
        for sink in self.snapshot() {
            if let Err(e) = sink.record_event(event) {
                warn!(sink = sink.name(), error = %e, "Sink rejected telemetry event");
            }
        }
        Ok(())
    }

    fn metrics(&self) -> Option<MetricsSnapshot> {
        let snapshots: Vec<MetricsSnapshot> =
            self.snapshot().iter().filter_map(|s| s.metrics()).collect();
        if snapshots.is_empty() {
            None
        } else {
            Some(aggregate_metrics(snapshots))
        }
    }

    fn events(&self) -> Vec<TelemetryEvent> {
        merge_events(self.snapshot().iter().map(|s| s.events()))
    }

    /// Exports every child, then reports the first failure
    async fn export_traces(&self) -> TelemetryResult<()> {
        let mut first_error = None;
        for sink in self.snapshot() {
            if let Err(e) = sink.export_traces().await {
                warn!(sink = sink.name(), error = %e, "Sink export failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn shutdown(&self) -> TelemetryResult<()> {
        let mut first_error = None;
        for sink in self.snapshot() {
            if let Err(e) = sink.shutdown().await {
                warn!(sink = sink.name(), error = %e, "Sink shutdown failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TelemetryError;
    use crate::event::TelemetryEventType;
    use crate::sink::MemorySink;
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RejectingSink {
        exports: AtomicUsize,
    }

    #[async_trait]
    impl TelemetrySink for RejectingSink {
        fn name(&self) -> &str {
            "rejecting"
        }

        fn record_event(&self, _event: &TelemetryEvent) -> TelemetryResult<()> {
            Err(TelemetryError::SinkFailed {
                sink: "rejecting".into(),
                message: "full".into(),
            })
        }

        fn metrics(&self) -> Option<MetricsSnapshot> {
            None
        }

        fn events(&self) -> Vec<TelemetryEvent> {
            Vec::new()
        }

        async fn export_traces(&self) -> TelemetryResult<()> {
            self.exports.fetch_add(1, Ordering::SeqCst);
            Err(TelemetryError::ExportFailed("offline".into()))
        }
    }

    #[tokio::test]
    async fn test_child_failures_are_isolated() {
        let memory = Arc::new(MemorySink::new());
        let rejecting = Arc::new(RejectingSink {
            exports: AtomicUsize::new(0),
        });
        let composite = CompositeSink::new(vec![
            rejecting.clone() as Arc<dyn TelemetrySink>,
            memory.clone(),
        ]);

        let event = TelemetryEvent::new(TelemetryEventType::SessionStart, "s-1", Map::new());
        assert!(composite.record_event(&event).is_ok());
        assert_eq!(memory.len(), 1);

        let result = composite.export_traces().await;
        assert!(matches!(result, Err(TelemetryError::ExportFailed(_))));
        assert_eq!(rejecting.exports.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_metrics_skip_children_without_metrics() {
        let rejecting: Arc<dyn TelemetrySink> = Arc::new(RejectingSink {
            exports: AtomicUsize::new(0),
        });
        let composite = CompositeSink::new(vec![rejecting]);
        assert!(composite.metrics().is_none());

        composite.add(Arc::new(MemorySink::new()));
        assert_eq!(composite.len(), 2);
        assert_eq!(composite.metrics(), Some(MetricsSnapshot::default()));
    }
}
