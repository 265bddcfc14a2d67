//! Telemetry sinks
//!
//! A sink consumes the events produced by an [`OperationTracker`](crate::OperationTracker).
//! Recording is synchronous and must stay cheap; anything that talks to the
//! network happens in [`TelemetrySink::export_traces`].
//!
//! | Sink | Retains events | Metrics |
//! |------|----------------|---------|
//! | [`ConsoleSink`] | most recent 1,000 | derived |
//! | [`MemorySink`] | most recent 10,000 | derived |
//! | [`RemoteSink`] | until the next export | none |
//! | [`CompositeSink`] | via children | aggregated |

mod composite;
mod console;
mod manager;
mod memory;
mod remote;

pub use composite::CompositeSink;
pub use console::ConsoleSink;
pub use manager::{TelemetryManager, global_manager, reset_global_manager, set_global_manager};
pub use memory::MemorySink;
pub use remote::{RemoteSink, RemoteSinkConfig};

use crate::TelemetryResult;
use crate::event::{MetricsSnapshot, TelemetryEvent, TelemetryEventType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Consumer of telemetry events
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Sink name used in logs
    fn name(&self) -> &str;

    /// Accept one event
    ///
    /// # Errors
    ///
    /// Implementations may reject events; callers log and continue.
    fn record_event(&self, event: &TelemetryEvent) -> TelemetryResult<()>;

    /// Metrics derived from retained events, if the sink keeps any
    fn metrics(&self) -> Option<MetricsSnapshot>;

    /// Retained events, oldest first
    fn events(&self) -> Vec<TelemetryEvent>;

    /// Push buffered data to its destination
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::ExportFailed`](crate::TelemetryError::ExportFailed)
    /// when the destination rejects the data.
    async fn export_traces(&self) -> TelemetryResult<()> {
        Ok(())
    }

    /// Flush and release resources
    ///
    /// # Errors
    ///
    /// Propagates a failed final flush.
    async fn shutdown(&self) -> TelemetryResult<()> {
        self.export_traces().await
    }
}

/// Combine per-sink snapshots
///
/// Count fields are summed. Rate-like fields (`average_duration_ms`,
/// `requests_per_second`) are the plain mean of the per-sink values, not a
/// weighted average.
#[must_use]
pub fn aggregate_metrics<I>(snapshots: I) -> MetricsSnapshot
where
    I: IntoIterator<Item = MetricsSnapshot>,
{
    let mut aggregate = MetricsSnapshot::default();
    let mut contributors = 0u32;

    for snapshot in snapshots {
        aggregate.total_requests += snapshot.total_requests;
        aggregate.successful_requests += snapshot.successful_requests;
        aggregate.failed_requests += snapshot.failed_requests;
        aggregate.active_operations += snapshot.active_operations;
        aggregate.average_duration_ms += snapshot.average_duration_ms;
        aggregate.requests_per_second += snapshot.requests_per_second;
        contributors += 1;
    }

    if contributors > 0 {
        aggregate.average_duration_ms /= f64::from(contributors);
        aggregate.requests_per_second /= f64::from(contributors);
    }
    aggregate
}

/// Merge event lists, dropping events that share a timestamp and type, sorted by time
#[must_use]
pub fn merge_events<I>(lists: I) -> Vec<TelemetryEvent>
where
    I: IntoIterator<Item = Vec<TelemetryEvent>>,
{
    let mut seen: HashSet<(DateTime<Utc>, TelemetryEventType)> = HashSet::new();
    let mut merged: Vec<TelemetryEvent> = lists
        .into_iter()
        .flatten()
        .filter(|event| seen.insert((event.timestamp, event.event_type)))
        .collect();
    merged.sort_by_key(|event| event.timestamp);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::Map;

    #[test]
    fn test_aggregate_sums_counts_and_averages_rates() {
        let a = MetricsSnapshot {
            total_requests: 10,
            successful_requests: 9,
            failed_requests: 1,
            average_duration_ms: 100.0,
            requests_per_second: 1.0,
            active_operations: 2,
        };
        let b = MetricsSnapshot {
            total_requests: 2,
            successful_requests: 2,
            failed_requests: 0,
            average_duration_ms: 10.0,
            requests_per_second: 3.0,
            active_operations: 0,
        };

        let aggregate = aggregate_metrics([a, b]);
        assert_eq!(aggregate.total_requests, 12);
        assert_eq!(aggregate.successful_requests, 11);
        assert_eq!(aggregate.failed_requests, 1);
        assert_eq!(aggregate.active_operations, 2);
        // Mean of means, not weighted by request count
        assert!((aggregate.average_duration_ms - 55.0).abs() < 1e-9);
        assert!((aggregate.requests_per_second - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_of_nothing_is_empty() {
        assert_eq!(aggregate_metrics(Vec::new()), MetricsSnapshot::default());
    }

    #[test]
    fn test_merge_events_dedups_and_sorts() {
        let base = Utc::now();
        let at = |secs: i64, event_type| {
            TelemetryEvent::at(base + ChronoDuration::seconds(secs), event_type, "op", Map::new())
        };

        let merged = merge_events([
            vec![at(2, TelemetryEventType::RequestEnd), at(0, TelemetryEventType::RequestStart)],
            vec![at(0, TelemetryEventType::RequestStart), at(1, TelemetryEventType::Error)],
        ]);

        let order: Vec<_> = merged.iter().map(|e| e.event_type).collect();
        assert_eq!(
            order,
            vec![
                TelemetryEventType::RequestStart,
                TelemetryEventType::Error,
                TelemetryEventType::RequestEnd
            ]
        );
    }
}
