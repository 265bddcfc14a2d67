//! Process-wide initialization.
//!
//! Installing a subscriber is global, so everything lives in one test.

use mcp_instrument::{TelemetryError, TrackingConfig};
use serial_test::serial;

#[test]
#[serial]
fn test_init_installs_subscriber_once() {
    let config = TrackingConfig::builder()
        .service_name("init-test")
        .log_level("debug")
        .json_logs(true)
        .stderr_output(true)
        .build();

    let guard = config.clone().init().unwrap();
    assert_eq!(guard.service_name(), "init-test");
    assert!(guard.config().json_logs);
    tracing::info!("logged through the installed subscriber");

    let second = config.init();
    assert!(matches!(second, Err(TelemetryError::TracingError(_))));

    drop(guard);
}

#[test]
#[serial]
fn test_init_validates_before_installing() {
    let config = TrackingConfig::builder()
        .otlp_endpoint("not a url")
        .build();
    assert!(matches!(config.init(), Err(TelemetryError::InvalidConfiguration(_))));
}
