//! HTTP forwarding sink

use super::TelemetrySink;
use crate::config::TrackingConfig;
use crate::event::{MetricsSnapshot, TelemetryEvent};
use crate::{TelemetryError, TelemetryResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tracing::{debug, warn};

/// Default number of events queued between exports
pub const DEFAULT_MAX_PENDING: usize = 5_000;

/// Settings for a [`RemoteSink`]
#[derive(Debug, Clone)]
pub struct RemoteSinkConfig {
    /// URL the queued events are POSTed to; `None` makes exports a no-op
    pub endpoint: Option<String>,
    /// Extra request headers (API keys, tenant ids)
    pub headers: BTreeMap<String, String>,
    /// Request timeout
    pub timeout: Duration,
    /// Queue bound; the oldest events are dropped beyond it
    pub max_pending: usize,
    /// `service.name` sent with every batch
    pub service_name: String,
}

impl Default for RemoteSinkConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            headers: BTreeMap::new(),
            timeout: Duration::from_secs(10),
            max_pending: DEFAULT_MAX_PENDING,
            service_name: "mcp-server".to_string(),
        }
    }
}

impl RemoteSinkConfig {
    /// Endpoint, headers and timeout taken from a tracking configuration
    #[must_use]
    pub fn from_tracking(config: &TrackingConfig) -> Self {
        Self {
            endpoint: config.otlp_endpoint.clone(),
            headers: config.otlp_headers.clone(),
            timeout: config.export_timeout,
            service_name: config.service_name.clone(),
            ..Self::default()
        }
    }
}

/// Queues events and POSTs them as JSON on export
///
/// The queue only holds events until the next export, so this sink reports no
/// metrics and no retained events.
#[derive(Debug)]
pub struct RemoteSink {
    config: RemoteSinkConfig,
    client: reqwest::Client,
    pending: Mutex<VecDeque<TelemetryEvent>>,
}

impl RemoteSink {
    /// Create a sink
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::InvalidConfiguration`] for a malformed endpoint
    /// and [`TelemetryError::InitializationFailed`] if the HTTP client cannot be built.
    pub fn new(config: RemoteSinkConfig) -> TelemetryResult<Self> {
        if let Some(ref endpoint) = config.endpoint {
            url::Url::parse(endpoint).map_err(|e| {
                TelemetryError::InvalidConfiguration(format!("Invalid sink endpoint '{endpoint}': {e}"))
            })?;
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TelemetryError::InitializationFailed(format!("HTTP client: {e}")))?;

        Ok(Self {
            config,
            client,
            pending: Mutex::new(VecDeque::new()),
        })
    }

    /// Number of events waiting for the next export
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[async_trait]
impl TelemetrySink for RemoteSink {
    fn name(&self) -> &str {
        "remote"
    }

    fn record_event(&self, event: &TelemetryEvent) -> TelemetryResult<()> {
        let mut pending = self.pending.lock();
        pending.push_back(event.clone());
        while pending.len() > self.config.max_pending.max(1) {
            pending.pop_front();
        }
        Ok(())
    }

    fn metrics(&self) -> Option<MetricsSnapshot> {
        None
    }

    fn events(&self) -> Vec<TelemetryEvent> {
        Vec::new()
    }

    async fn export_traces(&self) -> TelemetryResult<()> {
        let Some(ref endpoint) = self.config.endpoint else {
            warn!("Remote sink has no endpoint configured, skipping export");
            return Ok(());
        };

        let batch: Vec<TelemetryEvent> = self.pending.lock().drain(..).collect();
        if batch.is_empty() {
            return Ok(());
        }

        let body = json!({
            "service": self.config.service_name,
            "events": batch,
        });

        let mut request = self.client.post(endpoint).json(&body);
        for (key, value) in &self.config.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request.send().await?;
        response.error_for_status()?;

        debug!(endpoint = %endpoint, events = batch.len(), "Exported telemetry events");
        Ok(())
    }
}
