//! Tracking configuration
//!
//! [`TrackingConfig`] is resolved in three layers: built-in defaults, then
//! environment variables, then values set explicitly on the builder. Explicit
//! values always win, regardless of the order the builder methods are called in.

use crate::context_injection::ContextInjectionConfig;
use crate::{TelemetryError, TelemetryResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

/// Endpoint used when the local collector sidecar is enabled without an explicit endpoint
pub const DEFAULT_COLLECTOR_ENDPOINT: &str = "http://localhost:4318";

/// Default number of events retained by a tracker
pub const DEFAULT_MAX_EVENTS: usize = 1_000;

/// Environment variable names consulted by [`TrackingConfigBuilder::with_env`]
pub mod env_keys {
    /// Service name
    pub const SERVICE_NAME: &str = "MCP_SERVICE_NAME";
    /// Service name (OpenTelemetry convention, lower precedence)
    pub const OTEL_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";
    /// Service version
    pub const SERVICE_VERSION: &str = "MCP_SERVICE_VERSION";
    /// Project / tenant identifier
    pub const PROJECT_ID: &str = "MCP_PROJECT_ID";
    /// OTLP endpoint
    pub const OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
    /// OTLP headers, `key=value` pairs separated by commas
    pub const OTLP_HEADERS: &str = "OTEL_EXPORTER_OTLP_HEADERS";
    /// Span creation switch
    pub const TRACING_ENABLED: &str = "MCP_TRACING_ENABLED";
    /// Metrics switch
    pub const METRICS_ENABLED: &str = "MCP_METRICS_ENABLED";
    /// Sampling rate between 0 and 1
    pub const SAMPLING_RATE: &str = "MCP_SAMPLING_RATE";
    /// Advisory request timeout in milliseconds
    pub const REQUEST_TIMEOUT_MS: &str = "MCP_REQUEST_TIMEOUT_MS";
    /// Console sink switch
    pub const CONSOLE_EXPORT: &str = "MCP_CONSOLE_EXPORT";
    /// Local collector sidecar switch
    pub const ROTEL_ENABLED: &str = "MCP_ROTEL_ENABLED";
}

/// Configuration for server instrumentation
///
/// Use [`TrackingConfigBuilder`] for ergonomic configuration construction.
///
/// # Example
///
/// ```rust
/// use mcp_instrument::TrackingConfig;
///
/// let config = TrackingConfig::builder()
///     .service_name("weather-server")
///     .project_id("proj-42")
///     .sampling_rate(0.25)
///     .build();
///
/// assert_eq!(config.project_id.as_deref(), Some("proj-42"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Service name for telemetry identification
    pub service_name: String,
    /// Service version
    pub service_version: String,
    /// Project or tenant identifier attached to every span
    pub project_id: Option<String>,
    /// Open spans through the tracing backend
    pub tracing_enabled: bool,
    /// Record Prometheus metrics (requires the `prometheus` feature)
    pub metrics_enabled: bool,
    /// Fraction of operations that get a recording span (0.0 to 1.0)
    pub sampling_rate: f64,
    /// Attach a console sink to the telemetry manager
    pub console_export: bool,
    /// Intent-field injection settings
    pub context_injection: ContextInjectionConfig,
    /// Attributes attached to every span
    pub default_attributes: Map<String, Value>,
    /// Advisory timeout recorded on spans; not enforced by the tracker
    pub request_timeout: Option<Duration>,
    /// OTLP collector endpoint
    pub otlp_endpoint: Option<String>,
    /// Headers sent with every export request
    pub otlp_headers: BTreeMap<String, String>,
    /// Export through a local collector sidecar
    pub rotel_enabled: bool,
    /// Methods registered without instrumentation
    pub excluded_methods: Vec<String>,
    /// Maximum number of events retained by the tracker
    pub max_events: usize,
    /// Log level filter (e.g., "info", "debug", "info,mcp_instrument=debug")
    pub log_level: String,
    /// Enable JSON-formatted log output
    pub json_logs: bool,
    /// Output logs to stderr (required for STDIO transport)
    pub stderr_output: bool,
    /// Timeout for export requests
    pub export_timeout: Duration,
    /// Port for the Prometheus scrape endpoint (requires the `prometheus` feature)
    pub prometheus_port: Option<u16>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            service_name: "mcp-server".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            project_id: None,
            tracing_enabled: true,
            metrics_enabled: true,
            sampling_rate: 1.0,
            console_export: false,
            context_injection: ContextInjectionConfig::default(),
            default_attributes: Map::new(),
            request_timeout: None,
            otlp_endpoint: None,
            otlp_headers: BTreeMap::new(),
            rotel_enabled: false,
            excluded_methods: Vec::new(),
            max_events: DEFAULT_MAX_EVENTS,
            log_level: "info".to_string(),
            json_logs: true,
            stderr_output: true,
            export_timeout: Duration::from_secs(10),
            prometheus_port: None,
        }
    }
}

impl TrackingConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> TrackingConfigBuilder {
        TrackingConfigBuilder::default()
    }

    /// Defaults overlaid with the process environment
    #[must_use]
    pub fn from_env() -> Self {
        Self::builder().with_env().build()
    }

    /// Check whether a method should be instrumented
    #[must_use]
    pub fn should_instrument(&self, method: &str) -> bool {
        !self.excluded_methods.iter().any(|m| m == method)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::InvalidConfiguration`] when the service name is
    /// empty or the OTLP endpoint is not an absolute http(s) URL.
    pub fn validate(&self) -> TelemetryResult<()> {
        if self.service_name.trim().is_empty() {
            return Err(TelemetryError::InvalidConfiguration(
                "service name must not be empty".into(),
            ));
        }

        if let Some(endpoint) = &self.otlp_endpoint {
            let url = url::Url::parse(endpoint).map_err(|e| {
                TelemetryError::InvalidConfiguration(format!("Invalid OTLP endpoint '{endpoint}': {e}"))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(TelemetryError::InvalidConfiguration(format!(
                    "OTLP endpoint must use http or https, got '{}'",
                    url.scheme()
                )));
            }
        }

        if self.context_injection.parameter_name.is_empty() {
            return Err(TelemetryError::InvalidConfiguration(
                "context parameter name must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Initialize logging (and the OTLP pipeline when enabled) with this configuration
    ///
    /// Returns a guard that ensures proper cleanup on drop.
    ///
    /// # Errors
    ///
    /// Fails when a global subscriber is already installed or the exporter cannot be built.
    pub fn init(self) -> TelemetryResult<crate::TelemetryGuard> {
        crate::TelemetryGuard::init(self)
    }
}

/// Builder for [`TrackingConfig`]
#[derive(Debug, Clone, Default)]
pub struct TrackingConfigBuilder {
    service_name: Option<String>,
    service_version: Option<String>,
    project_id: Option<String>,
    tracing_enabled: Option<bool>,
    metrics_enabled: Option<bool>,
    sampling_rate: Option<f64>,
    console_export: Option<bool>,
    context_injection: Option<ContextInjectionConfig>,
    default_attributes: Map<String, Value>,
    request_timeout: Option<Duration>,
    otlp_endpoint: Option<String>,
    otlp_headers: BTreeMap<String, String>,
    rotel_enabled: Option<bool>,
    excluded_methods: Vec<String>,
    max_events: Option<usize>,
    log_level: Option<String>,
    json_logs: Option<bool>,
    stderr_output: Option<bool>,
    export_timeout: Option<Duration>,
    prometheus_port: Option<u16>,
}

impl TrackingConfigBuilder {
    /// Set the service name
    #[must_use]
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Set the service version
    #[must_use]
    pub fn service_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = Some(version.into());
        self
    }

    /// Set the project or tenant identifier
    #[must_use]
    pub fn project_id(mut self, id: impl Into<String>) -> Self {
        self.project_id = Some(id.into());
        self
    }

    /// Enable or disable span creation
    #[must_use]
    pub fn tracing_enabled(mut self, enabled: bool) -> Self {
        self.tracing_enabled = Some(enabled);
        self
    }

    /// Enable or disable metrics recording
    #[must_use]
    pub fn metrics_enabled(mut self, enabled: bool) -> Self {
        self.metrics_enabled = Some(enabled);
        self
    }

    /// Set the sampling rate (clamped to 0.0..=1.0)
    #[must_use]
    pub fn sampling_rate(mut self, rate: f64) -> Self {
        self.sampling_rate = Some(clamp_rate(rate));
        self
    }

    /// Enable or disable the console sink
    #[must_use]
    pub fn console_export(mut self, enabled: bool) -> Self {
        self.console_export = Some(enabled);
        self
    }

    /// Set the context injection configuration
    #[must_use]
    pub fn context_injection(mut self, config: ContextInjectionConfig) -> Self {
        self.context_injection = Some(config);
        self
    }

    /// Add an attribute attached to every span
    #[must_use]
    pub fn default_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.default_attributes.insert(key.into(), value.into());
        self
    }

    /// Set the advisory request timeout
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the OTLP endpoint
    #[must_use]
    pub fn otlp_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = Some(endpoint.into());
        self
    }

    /// Add a header sent with export requests
    #[must_use]
    pub fn otlp_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.otlp_headers.insert(key.into(), value.into());
        self
    }

    /// Export through a local collector sidecar
    #[must_use]
    pub fn rotel_enabled(mut self, enabled: bool) -> Self {
        self.rotel_enabled = Some(enabled);
        self
    }

    /// Add a method to register without instrumentation
    #[must_use]
    pub fn exclude_method(mut self, method: impl Into<String>) -> Self {
        self.excluded_methods.push(method.into());
        self
    }

    /// Set the tracker's event log capacity
    #[must_use]
    pub fn max_events(mut self, max: usize) -> Self {
        self.max_events = Some(max.max(1));
        self
    }

    /// Set the log level filter
    #[must_use]
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    /// Enable or disable JSON log output
    #[must_use]
    pub fn json_logs(mut self, enabled: bool) -> Self {
        self.json_logs = Some(enabled);
        self
    }

    /// Enable or disable stderr output
    #[must_use]
    pub fn stderr_output(mut self, enabled: bool) -> Self {
        self.stderr_output = Some(enabled);
        self
    }

    /// Set the export timeout
    #[must_use]
    pub fn export_timeout(mut self, timeout: Duration) -> Self {
        self.export_timeout = Some(timeout);
        self
    }

    /// Serve Prometheus metrics on `port`
    #[must_use]
    pub fn prometheus_port(mut self, port: u16) -> Self {
        self.prometheus_port = Some(port);
        self
    }

    /// Fill every value not set explicitly from the process environment
    #[must_use]
    pub fn with_env(self) -> Self {
        self.with_env_source(|key| std::env::var(key).ok())
    }

    /// Fill every value not set explicitly from `lookup`
    ///
    /// Values that fail to parse are ignored with a warning.
    #[must_use]
    pub fn with_env_source<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        self.service_name = self
            .service_name
            .or_else(|| get(env_keys::SERVICE_NAME))
            .or_else(|| get(env_keys::OTEL_SERVICE_NAME));
        self.service_version = self.service_version.or_else(|| get(env_keys::SERVICE_VERSION));
        self.project_id = self.project_id.or_else(|| get(env_keys::PROJECT_ID));
        self.otlp_endpoint = self.otlp_endpoint.or_else(|| get(env_keys::OTLP_ENDPOINT));

        if let Some(raw) = get(env_keys::OTLP_HEADERS) {
            for (key, value) in parse_headers(&raw) {
                self.otlp_headers.entry(key).or_insert(value);
            }
        }

        self.tracing_enabled = self
            .tracing_enabled
            .or_else(|| get(env_keys::TRACING_ENABLED).and_then(|v| parse_bool(env_keys::TRACING_ENABLED, &v)));
        self.metrics_enabled = self
            .metrics_enabled
            .or_else(|| get(env_keys::METRICS_ENABLED).and_then(|v| parse_bool(env_keys::METRICS_ENABLED, &v)));
        self.console_export = self
            .console_export
            .or_else(|| get(env_keys::CONSOLE_EXPORT).and_then(|v| parse_bool(env_keys::CONSOLE_EXPORT, &v)));
        self.rotel_enabled = self
            .rotel_enabled
            .or_else(|| get(env_keys::ROTEL_ENABLED).and_then(|v| parse_bool(env_keys::ROTEL_ENABLED, &v)));

        self.sampling_rate = self.sampling_rate.or_else(|| {
            get(env_keys::SAMPLING_RATE).and_then(|v| match v.trim().parse::<f64>() {
                Ok(rate) if rate.is_finite() => Some(clamp_rate(rate)),
                _ => {
                    warn!(key = env_keys::SAMPLING_RATE, value = %v, "Ignoring unparseable sampling rate");
                    None
                }
            })
        });

        self.request_timeout = self.request_timeout.or_else(|| {
            get(env_keys::REQUEST_TIMEOUT_MS).and_then(|v| match v.trim().parse::<u64>() {
                Ok(ms) => Some(Duration::from_millis(ms)),
                Err(_) => {
                    warn!(key = env_keys::REQUEST_TIMEOUT_MS, value = %v, "Ignoring unparseable request timeout");
                    None
                }
            })
        });

        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> TrackingConfig {
        let defaults = TrackingConfig::default();
        let rotel_enabled = self.rotel_enabled.unwrap_or(defaults.rotel_enabled);

        let otlp_endpoint = match self.otlp_endpoint {
            Some(endpoint) => Some(endpoint),
            None if rotel_enabled => Some(DEFAULT_COLLECTOR_ENDPOINT.to_string()),
            None => defaults.otlp_endpoint,
        };

        TrackingConfig {
            service_name: self.service_name.unwrap_or(defaults.service_name),
            service_version: self.service_version.unwrap_or(defaults.service_version),
            project_id: self.project_id.or(defaults.project_id),
            tracing_enabled: self.tracing_enabled.unwrap_or(defaults.tracing_enabled),
            metrics_enabled: self.metrics_enabled.unwrap_or(defaults.metrics_enabled),
            sampling_rate: self.sampling_rate.unwrap_or(defaults.sampling_rate),
            console_export: self.console_export.unwrap_or(defaults.console_export),
            context_injection: self.context_injection.unwrap_or(defaults.context_injection),
            default_attributes: if self.default_attributes.is_empty() {
                defaults.default_attributes
            } else {
                self.default_attributes
            },
            request_timeout: self.request_timeout.or(defaults.request_timeout),
            otlp_endpoint,
            otlp_headers: self.otlp_headers,
            rotel_enabled,
            excluded_methods: self.excluded_methods,
            max_events: self.max_events.unwrap_or(defaults.max_events),
            log_level: self.log_level.unwrap_or(defaults.log_level),
            json_logs: self.json_logs.unwrap_or(defaults.json_logs),
            stderr_output: self.stderr_output.unwrap_or(defaults.stderr_output),
            export_timeout: self.export_timeout.unwrap_or(defaults.export_timeout),
            prometheus_port: self.prometheus_port.or(defaults.prometheus_port),
        }
    }
}

fn clamp_rate(rate: f64) -> f64 {
    if rate.is_nan() { 1.0 } else { rate.clamp(0.0, 1.0) }
}

fn parse_bool(key: &str, value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!(key, value, "Ignoring unparseable boolean");
            None
        }
    }
}

/// Parse `key=value,key2=value2` header lists
pub(crate) fn parse_headers(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn source(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = TrackingConfig::default();
        assert_eq!(config.service_name, "mcp-server");
        assert!(config.tracing_enabled);
        assert!(!config.console_export);
        assert!((config.sampling_rate - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.max_events, DEFAULT_MAX_EVENTS);
        assert!(config.context_injection.enabled);
    }

    #[test]
    fn test_builder() {
        let config = TrackingConfig::builder()
            .service_name("test-service")
            .service_version("2.0.0")
            .project_id("proj-1")
            .default_attribute("deployment.environment", "production")
            .exclude_method("ping")
            .build();

        assert_eq!(config.service_name, "test-service");
        assert_eq!(config.service_version, "2.0.0");
        assert_eq!(config.project_id.as_deref(), Some("proj-1"));
        assert_eq!(
            config.default_attributes.get("deployment.environment"),
            Some(&Value::from("production"))
        );
        assert!(!config.should_instrument("ping"));
        assert!(config.should_instrument("tools/call"));
    }

    #[test]
    fn test_sampling_rate_is_clamped() {
        assert!((TrackingConfig::builder().sampling_rate(4.0).build().sampling_rate - 1.0).abs() < f64::EPSILON);
        assert!(TrackingConfig::builder().sampling_rate(-1.0).build().sampling_rate.abs() < f64::EPSILON);
    }

    #[test]
    fn test_env_layering() {
        let env = source(&[
            (env_keys::SERVICE_NAME, "from-env"),
            (env_keys::PROJECT_ID, "env-project"),
            (env_keys::SAMPLING_RATE, "0.5"),
            (env_keys::TRACING_ENABLED, "false"),
            (env_keys::REQUEST_TIMEOUT_MS, "1500"),
            (env_keys::OTLP_HEADERS, "x-api-key=abc, x-team = core"),
        ]);

        let config = TrackingConfig::builder()
            .project_id("explicit-project")
            .with_env_source(env)
            .build();

        assert_eq!(config.service_name, "from-env");
        assert_eq!(config.project_id.as_deref(), Some("explicit-project"));
        assert!((config.sampling_rate - 0.5).abs() < f64::EPSILON);
        assert!(!config.tracing_enabled);
        assert_eq!(config.request_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.otlp_headers.get("x-api-key").map(String::as_str), Some("abc"));
        assert_eq!(config.otlp_headers.get("x-team").map(String::as_str), Some("core"));
    }

    #[test]
    fn test_unparseable_env_values_are_ignored() {
        let env = source(&[
            (env_keys::SAMPLING_RATE, "lots"),
            (env_keys::METRICS_ENABLED, "perhaps"),
        ]);
        let config = TrackingConfig::builder().with_env_source(env).build();

        assert!((config.sampling_rate - 1.0).abs() < f64::EPSILON);
        assert!(config.metrics_enabled);
    }

    #[test]
    fn test_otel_service_name_fallback() {
        let env = source(&[(env_keys::OTEL_SERVICE_NAME, "otel-name")]);
        let config = TrackingConfig::builder().with_env_source(env).build();
        assert_eq!(config.service_name, "otel-name");
    }

    #[test]
    fn test_collector_endpoint_default() {
        let config = TrackingConfig::builder().rotel_enabled(true).build();
        assert_eq!(config.otlp_endpoint.as_deref(), Some(DEFAULT_COLLECTOR_ENDPOINT));

        let config = TrackingConfig::builder()
            .rotel_enabled(true)
            .otlp_endpoint("https://collector.example.com")
            .build();
        assert_eq!(config.otlp_endpoint.as_deref(), Some("https://collector.example.com"));
    }

    #[test]
    fn test_validate() {
        assert!(TrackingConfig::default().validate().is_ok());

        let bad_endpoint = TrackingConfig::builder().otlp_endpoint("not a url").build();
        assert!(matches!(
            bad_endpoint.validate(),
            Err(TelemetryError::InvalidConfiguration(_))
        ));

        let wrong_scheme = TrackingConfig::builder().otlp_endpoint("ftp://collector").build();
        assert!(wrong_scheme.validate().is_err());

        let empty_name = TrackingConfig::builder().service_name("  ").build();
        assert!(empty_name.validate().is_err());
    }

    #[test]
    fn test_parse_headers() {
        let headers = parse_headers("a=1,,=skip,b = two ,novalue");
        assert_eq!(
            headers,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "two".to_string())
            ]
        );
    }
}
