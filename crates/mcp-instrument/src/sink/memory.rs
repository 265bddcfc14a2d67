//! In-memory sink for tests and local inspection

use super::TelemetrySink;
use crate::TelemetryResult;
use crate::event::{MetricsSnapshot, TelemetryEvent, TelemetryEventType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Default number of events a memory sink retains
pub const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

/// Keeps events in memory, evicting the oldest one at a time
#[derive(Debug)]
pub struct MemorySink {
    capacity: usize,
    events: Mutex<VecDeque<TelemetryEvent>>,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySink {
    /// Sink with the default capacity
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CAPACITY)
    }

    /// Sink retaining at most `capacity` events
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Retained events of one type
    #[must_use]
    pub fn events_by_type(&self, event_type: TelemetryEventType) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Retained events with `start <= timestamp <= end`
    #[must_use]
    pub fn events_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .cloned()
            .collect()
    }

    /// Number of retained events
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether no events are retained
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Drop every retained event
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[async_trait]
impl TelemetrySink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn record_event(&self, event: &TelemetryEvent) -> TelemetryResult<()> {
        let mut events = self.events.lock();
        events.push_back(event.clone());
        while events.len() > self.capacity {
            events.pop_front();
        }
        Ok(())
    }

    fn metrics(&self) -> Option<MetricsSnapshot> {
        let events = self.events.lock();
        Some(MetricsSnapshot::from_events(events.iter(), Utc::now()))
    }

    fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().iter().cloned().collect()
    }
}
