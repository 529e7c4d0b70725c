//! Default value functions for configuration.
//!
//! Separated into its own module for clarity and reuse.

use std::net::SocketAddr;

// =============================================================================
// Metrics Defaults
// =============================================================================

pub fn default_metrics_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

pub fn default_dashboard_uri_path() -> String {
    "/metrics".to_string()
}

pub fn default_prometheus_uri_path() -> String {
    "/prometheus".to_string()
}

/// Recent events kept for the dashboard.
pub fn default_cache_size() -> usize {
    fabric_metrics::observer::aggregate::DEFAULT_CACHE_SIZE
}

pub fn default_queue_capacity() -> usize {
    fabric_metrics::subject::DEFAULT_QUEUE_CAPACITY
}

/// Shared by the runtime sampler and both relays.
pub fn default_interval_secs() -> u64 {
    10
}

// =============================================================================
// Discovery Defaults
// =============================================================================

pub fn default_discovery_timeout_secs() -> u64 {
    5
}

// =============================================================================
// Logging Defaults
// =============================================================================

pub fn default_log_level() -> String {
    "info".to_string()
}
