//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("service.name is required")]
    MissingServiceName,
    #[error("{field} must start with '/', got '{path}'")]
    RelativeUriPath { field: &'static str, path: String },
    #[error("metrics.dashboard_uri_path and metrics.prometheus_uri_path are both '{0}'")]
    DuplicateUriPath(String),
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
    #[error("{0} must be greater than zero")]
    ZeroCapacity(&'static str),
    #[error("metrics.report_statsd is set but metrics.statsd_address is missing")]
    MissingStatsdAddress,
    #[error("discovery.enabled is set but discovery.registry_url is missing")]
    MissingRegistryUrl,
    #[error("discovery.registry_url must be an http(s) URL, got '{0}'")]
    InvalidRegistryUrl(String),
    #[error("discovery.gateway_path is set but transport.gateway_address is missing")]
    MissingGatewayAddress,
    #[error("metrics.address and transport.address are both {0}")]
    AddressConflict(std::net::SocketAddr),
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let metrics = &config.metrics;

    // Required fields
    if config.service.name.trim().is_empty() {
        errors.push(ValidationError::MissingServiceName);
    }

    // HTTP routes
    for (field, path) in [
        ("metrics.dashboard_uri_path", &metrics.dashboard_uri_path),
        ("metrics.prometheus_uri_path", &metrics.prometheus_uri_path),
    ] {
        if !path.starts_with('/') {
            errors.push(ValidationError::RelativeUriPath {
                field,
                path: path.clone(),
            });
        }
    }
    if metrics.report_prometheus && metrics.dashboard_uri_path == metrics.prometheus_uri_path {
        errors.push(ValidationError::DuplicateUriPath(
            metrics.dashboard_uri_path.clone(),
        ));
    }

    for (field, secs) in [
        ("metrics.runtime_interval_secs", metrics.runtime_interval_secs),
        ("metrics.prometheus_interval_secs", metrics.prometheus_interval_secs),
        ("metrics.statsd_interval_secs", metrics.statsd_interval_secs),
        ("discovery.timeout_secs", config.discovery.timeout_secs),
    ] {
        if secs == 0 {
            errors.push(ValidationError::ZeroInterval(field));
        }
    }
    if metrics.queue_capacity == 0 {
        errors.push(ValidationError::ZeroCapacity("metrics.queue_capacity"));
    }

    if metrics.report_statsd
        && metrics
            .statsd_address
            .as_deref()
            .is_none_or(|a| a.trim().is_empty())
    {
        errors.push(ValidationError::MissingStatsdAddress);
    }

    if metrics.address == config.transport.address && metrics.address.port() != 0 {
        errors.push(ValidationError::AddressConflict(metrics.address));
    }

    // Discovery
    let discovery = &config.discovery;
    if discovery.enabled {
        match discovery.registry_url.as_deref().map(str::trim) {
            None | Some("") => errors.push(ValidationError::MissingRegistryUrl),
            Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                errors.push(ValidationError::InvalidRegistryUrl(url.to_string()));
            }
            Some(_) => {}
        }
        if discovery.gateway_path.is_some() && config.transport.gateway_address.is_none() {
            errors.push(ValidationError::MissingGatewayAddress);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
