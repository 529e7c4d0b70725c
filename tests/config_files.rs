//! Integration tests for loading configuration files from disk.

use fabricd::config::{Config, ConfigError, LogFormat, ValidationError, validate};
use std::fs;

#[test]
fn full_config_round_trips_from_disk() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("fabricd.toml");
    fs::write(
        &path,
        r#"
[service]
name = "billing"
host = "node-3"

[transport]
address = "0.0.0.0:7000"
gateway_address = "203.0.113.5:443"

[metrics]
address = "0.0.0.0:9100"
dashboard_uri_path = "/stats"
cache_size = 64
queue_capacity = 1024
report_prometheus = true
prometheus_interval_secs = 15
report_statsd = true
statsd_address = "127.0.0.1:8125"
statsd_prefix = "fabric"

[discovery]
enabled = true
registry_url = "http://registry:8500/v1/services"
metrics_path = "billing-metrics"
transport_path = "billing"
gateway_path = "billing-gw"

[logging]
format = "json"
level = "debug"
"#,
    )?;

    let config = Config::load(&path)?;
    assert!(validate(&config).is_ok());
    assert_eq!(config.service.host_name(), "node-3");
    assert_eq!(config.metrics.dashboard_uri_path, "/stats");
    assert_eq!(config.metrics.prometheus_uri_path, "/prometheus");
    assert_eq!(config.metrics.cache_size, 64);
    assert_eq!(config.metrics.statsd_prefix.as_deref(), Some("fabric"));
    assert_eq!(config.metrics.statsd_interval_secs, 10);
    assert_eq!(config.discovery.gateway_path.as_deref(), Some("billing-gw"));
    assert_eq!(config.logging.format, LogFormat::Json);
    Ok(())
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn malformed_file_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fabricd.toml");
    fs::write(&path, "[service]\nname = \n").unwrap();
    assert!(matches!(Config::load(&path).unwrap_err(), ConfigError::Parse(_)));
}

#[test]
fn missing_transport_section_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fabricd.toml");
    fs::write(&path, "[service]\nname = \"billing\"\n").unwrap();
    assert!(matches!(Config::load(&path).unwrap_err(), ConfigError::Parse(_)));
}

#[test]
fn validation_reports_every_problem() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fabricd.toml");
    fs::write(
        &path,
        r#"
[service]
name = ""

[transport]
address = "127.0.0.1:7000"

[metrics]
report_statsd = true
queue_capacity = 0

[discovery]
enabled = true
"#,
    )
    .unwrap();

    let config = Config::load(&path).unwrap();
    let errors = validate(&config).unwrap_err();
    assert_eq!(errors.len(), 4, "{errors:?}");
    assert!(errors.iter().any(|e| matches!(e, ValidationError::MissingServiceName)));
    assert!(errors.iter().any(|e| matches!(e, ValidationError::MissingStatsdAddress)));
    assert!(errors.iter().any(|e| matches!(e, ValidationError::ZeroCapacity(_))));
    assert!(errors.iter().any(|e| matches!(e, ValidationError::MissingRegistryUrl)));
}
