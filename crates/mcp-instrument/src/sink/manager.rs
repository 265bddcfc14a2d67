//! Telemetry manager and the process-wide default instance

use super::{CompositeSink, ConsoleSink, TelemetrySink};
use crate::TelemetryResult;
use crate::config::TrackingConfig;
use crate::event::{MetricsSnapshot, TelemetryEvent};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};

static GLOBAL_MANAGER: Lazy<RwLock<Option<Arc<TelemetryManager>>>> = Lazy::new(|| RwLock::new(None));

/// Owns the sinks events are forwarded to
///
/// Recording never fails; export and shutdown attempt every sink and report the
/// first failure.
#[derive(Debug)]
pub struct TelemetryManager {
    sinks: CompositeSink,
}

impl Default for TelemetryManager {
    /// A manager with a single [`ConsoleSink`]
    fn default() -> Self {
        Self::new(vec![Arc::new(ConsoleSink::new())])
    }
}

impl TelemetryManager {
    /// Manager over `sinks`
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn TelemetrySink>>) -> Self {
        Self {
            sinks: CompositeSink::new(sinks),
        }
    }

    /// Manager without sinks
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Sinks implied by a tracking configuration
    ///
    /// A console sink is attached when `console_export` is set.
    #[must_use]
    pub fn from_config(config: &TrackingConfig) -> Self {
        let manager = Self::empty();
        if config.console_export {
            manager.add_sink(Arc::new(ConsoleSink::new()));
        }
        manager
    }

    /// Attach a sink
    pub fn add_sink(&self, sink: Arc<dyn TelemetrySink>) {
        debug!(sink = sink.name(), "Telemetry sink added");
        self.sinks.add(sink);
    }

    /// Number of attached sinks
    #[must_use]
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Forward one event to every sink
    pub fn record_event(&self, event: &TelemetryEvent) {
        // The composite logs child failures itself.
        let _ = self.sinks.record_event(event);
    }

    /// Aggregated metrics of every sink that exposes them
    #[must_use]
    pub fn metrics(&self) -> Option<MetricsSnapshot> {
        self.sinks.metrics()
    }

    /// Events of every sink, deduplicated and sorted by time
    #[must_use]
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.sinks.events()
    }

    /// Export every sink
    ///
    /// # Errors
    ///
    /// Returns the first sink failure after all sinks have been attempted.
    pub async fn export_traces(&self) -> TelemetryResult<()> {
        self.sinks.export_traces().await
    }

    /// Shut every sink down
    ///
    /// # Errors
    ///
    /// Returns the first sink failure after all sinks have been attempted.
    pub async fn shutdown(&self) -> TelemetryResult<()> {
        info!(sinks = self.sink_count(), "Shutting down telemetry manager");
        self.sinks.shutdown().await
    }
}

/// Shared manager, created with [`TelemetryManager::default`] on first use
#[must_use]
pub fn global_manager() -> Arc<TelemetryManager> {
    if let Some(manager) = GLOBAL_MANAGER.read().as_ref() {
        return Arc::clone(manager);
    }
    let mut slot = GLOBAL_MANAGER.write();
    Arc::clone(slot.get_or_insert_with(|| Arc::new(TelemetryManager::default())))
}

/// Replace the shared manager
pub fn set_global_manager(manager: Arc<TelemetryManager>) {
    *GLOBAL_MANAGER.write() = Some(manager);
}

/// Forget the shared manager; the next [`global_manager`] call builds a fresh one
pub fn reset_global_manager() {
    GLOBAL_MANAGER.write().take();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TelemetryEventType;
    use crate::sink::MemorySink;
    use serde_json::Map;
    use serial_test::serial;

    #[test]
    fn test_default_has_console_sink() {
        assert_eq!(TelemetryManager::default().sink_count(), 1);
        assert_eq!(TelemetryManager::from_config(&TrackingConfig::default()).sink_count(), 0);
        let console = TrackingConfig::builder().console_export(true).build();
        assert_eq!(TelemetryManager::from_config(&console).sink_count(), 1);
    }

    #[test]
    fn test_forwards_events() {
        let memory = Arc::new(MemorySink::new());
        let manager = TelemetryManager::empty();
        manager.add_sink(memory.clone());

        manager.record_event(&TelemetryEvent::new(TelemetryEventType::SessionEnd, "s", Map::new()));
        assert_eq!(memory.len(), 1);
        assert_eq!(manager.events().len(), 1);
    }

    #[test]
    #[serial]
    fn test_global_manager_lifecycle() {
        reset_global_manager();
        let first = global_manager();
        assert!(Arc::ptr_eq(&first, &global_manager()));

        let custom = Arc::new(TelemetryManager::empty());
        set_global_manager(custom.clone());
        assert!(Arc::ptr_eq(&custom, &global_manager()));

        reset_global_manager();
        assert!(!Arc::ptr_eq(&custom, &global_manager()));
        reset_global_manager();
    }
}
