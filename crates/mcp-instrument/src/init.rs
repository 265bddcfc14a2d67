//! Process-level telemetry initialization
//!
//! Provides the [`TelemetryGuard`] returned by [`TrackingConfig::init`].

use crate::{TelemetryError, TelemetryResult, TrackingConfig};
use tracing::info;
use tracing_subscriber::{
    Registry, filter::EnvFilter, fmt, fmt::writer::BoxMakeWriter, layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Guard that owns the installed logging and export pipeline
///
/// **The guard must outlive all instrumented code.** Dropping it flushes
/// pending spans and shuts the OTLP tracer provider down; spans ended after
/// that are lost.
///
/// ```rust,ignore
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let _telemetry = TrackingConfig::from_env().init()?;
///
///     run_server().await?;
///     Ok(())
///     // Guard dropped here after server shutdown
/// }
/// ```
pub struct TelemetryGuard {
    config: TrackingConfig,
    #[cfg(feature = "otlp")]
    tracer_provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
    #[cfg(feature = "prometheus")]
    _metrics_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl std::fmt::Debug for TelemetryGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("TelemetryGuard");
        debug.field("service_name", &self.config.service_name);
        #[cfg(feature = "otlp")]
        debug.field(
            "tracer_provider",
            &self.tracer_provider.as_ref().map(|_| "SdkTracerProvider"),
        );
        debug.finish()
    }
}

impl TelemetryGuard {
    /// Install the subscriber and exporters described by `config`
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, when a global subscriber is already
    /// installed, or when an exporter cannot be built.
    pub fn init(config: TrackingConfig) -> TelemetryResult<Self> {
        config.validate()?;

        #[cfg(feature = "otlp")]
        let tracer_provider = if config.tracing_enabled && config.otlp_endpoint.is_some() {
            let provider = init_tracer_provider(&config)?;
            opentelemetry::global::set_tracer_provider(provider.clone());
            Some(provider)
        } else {
            None
        };

        init_subscriber(
            &config,
            #[cfg(feature = "otlp")]
            tracer_provider.as_ref(),
        )?;

        #[cfg(feature = "prometheus")]
        let metrics_handle = match config.prometheus_port {
            Some(port) if config.metrics_enabled => Some(init_prometheus(port)?),
            _ => None,
        };

        info!(
            service_name = %config.service_name,
            service_version = %config.service_version,
            otlp_endpoint = config.otlp_endpoint.as_deref().unwrap_or("none"),
            json_logs = config.json_logs,
            stderr_output = config.stderr_output,
            "MCP instrumentation initialized"
        );

        Ok(Self {
            config,
            #[cfg(feature = "otlp")]
            tracer_provider,
            #[cfg(feature = "prometheus")]
            _metrics_handle: metrics_handle,
        })
    }

    /// Service name
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    /// Configuration the guard was built from
    #[must_use]
    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        info!(
            service_name = %self.config.service_name,
            "Shutting down MCP instrumentation"
        );

        #[cfg(feature = "otlp")]
        if let Some(ref provider) = self.tracer_provider
            && let Err(e) = provider.shutdown()
        {
            tracing::error!("Error shutting down tracer provider: {e}");
        }
    }
}

fn make_writer(stderr: bool) -> BoxMakeWriter {
    if stderr {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        BoxMakeWriter::new(std::io::stdout)
    }
}

/// Install the global subscriber
///
/// Exactly one of the JSON and pretty layers is present; the OpenTelemetry
/// layer is added when a provider was built.
fn init_subscriber(
    config: &TrackingConfig,
    #[cfg(feature = "otlp")] tracer_provider: Option<&opentelemetry_sdk::trace::SdkTracerProvider>,
) -> TelemetryResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| TelemetryError::InvalidConfiguration(format!("Invalid log level: {e}")))?;

    let json_layer = config.json_logs.then(|| {
        fmt::layer()
            .with_writer(make_writer(config.stderr_output))
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .json()
    });
    let pretty_layer = (!config.json_logs).then(|| {
        fmt::layer()
            .with_writer(make_writer(config.stderr_output))
            .with_target(true)
            .with_thread_ids(false)
            .pretty()
    });

    let registry = Registry::default()
        .with(env_filter)
        .with(json_layer)
        .with(pretty_layer);

    #[cfg(feature = "otlp")]
    let registry = {
        use opentelemetry::trace::TracerProvider as _;
        let otel_layer = tracer_provider
            .map(|provider| tracing_opentelemetry::layer().with_tracer(provider.tracer("mcp-instrument")));
        registry.with(otel_layer)
    };

    registry
        .try_init()
        .map_err(|e| TelemetryError::TracingError(e.to_string()))
}

/// OTLP/HTTP trace endpoint for a collector base URL
#[cfg(feature = "otlp")]
fn traces_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim_end_matches('/');
    if trimmed.ends_with("/v1/traces") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v1/traces")
    }
}

/// Build the OTLP tracer provider
///
/// Sampling is decided per operation by the tracker, so the provider samples
/// every span it is given.
#[cfg(feature = "otlp")]
fn init_tracer_provider(
    config: &TrackingConfig,
) -> TelemetryResult<opentelemetry_sdk::trace::SdkTracerProvider> {
    use opentelemetry_otlp::{WithExportConfig, WithHttpConfig};
    use opentelemetry_sdk::{
        Resource,
        trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
    };
    use std::collections::HashMap;

    let endpoint = config.otlp_endpoint.as_ref().ok_or_else(|| {
        TelemetryError::InvalidConfiguration("OTLP endpoint not configured".into())
    })?;

    let mut resource_attrs = vec![
        opentelemetry::KeyValue::new("service.name", config.service_name.clone()),
        opentelemetry::KeyValue::new("service.version", config.service_version.clone()),
    ];
    if let Some(ref project_id) = config.project_id {
        resource_attrs.push(opentelemetry::KeyValue::new(
            crate::span_attributes::MCP_PROJECT_ID,
            project_id.clone(),
        ));
    }
    let resource = Resource::builder().with_attributes(resource_attrs).build();

    let headers: HashMap<String, String> = config
        .otlp_headers
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(traces_endpoint(endpoint))
        .with_headers(headers)
        .with_timeout(config.export_timeout)
        .build()
        .map_err(|e| TelemetryError::OpenTelemetryError(e.to_string()))?;

    let provider = SdkTracerProvider::builder()
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .with_batch_exporter(exporter)
        .build();

    Ok(provider)
}

/// Install the Prometheus recorder with its scrape listener
#[cfg(feature = "prometheus")]
fn init_prometheus(port: u16) -> TelemetryResult<metrics_exporter_prometheus::PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::net::{Ipv4Addr, SocketAddr};

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let handle = PrometheusBuilder::new()
        .with_http_listener(addr)
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsError(e.to_string()))?;

    crate::metrics::init_metrics();
    info!(port, "Prometheus metrics endpoint started");

    Ok(handle)
}
